//! **C11** — the owning struct that wires every component together. The
//! single entry point applications construct and drive; no hidden globals
//! (§9: "OrgState, MessageBus, ConversationStore, ConcurrencyController are
//! fields of a `Runtime` struct passed by `Arc` reference").

use std::sync::Arc;

use crate::bus::MessageBus;
use crate::concurrency::ConcurrencyController;
use crate::config::RuntimeConfig;
use crate::contacts::ContactRegistry;
use crate::conversation::ConversationStore;
use crate::envelope::{Payload, Send, ROOT_AGENT, USER_AGENT};
use crate::error::RuntimeError;
use crate::event::{EventHandler, NoopEventHandler};
use crate::lifecycle::AgentLifecycle;
use crate::llm_handler::{LlmHandler, LlmRegistry};
use crate::org::{AgentMeta, OrgState, Role};
use crate::scheduler::Scheduler;
use crate::shutdown::{ShutdownManager, ShutdownSummary};
use crate::status::new_status_table;
use crate::store::{ArtifactStore, FsArtifactStore, FsWorkspaceStore, WorkspaceStore};
use crate::tools::sandbox::{ProcessSandbox, Sandbox};
use crate::tools::ToolExecutor;

/// Top-level handle on a running (or not-yet-started) orchestration runtime.
/// Clone the individual `Arc` fields to hand narrower capabilities to callers
/// that don't need the whole struct (e.g. a test only needs `bus` and `org`).
pub struct Runtime {
    pub config: RuntimeConfig,
    pub org: Arc<OrgState>,
    pub contacts: Arc<ContactRegistry>,
    pub bus: Arc<MessageBus>,
    pub conversation: Arc<ConversationStore>,
    pub concurrency: Arc<ConcurrencyController>,
    pub lifecycle: Arc<AgentLifecycle>,
    pub tools: Arc<ToolExecutor>,
    pub handler: Arc<LlmHandler>,
    pub scheduler: Arc<Scheduler>,
    pub shutdown: Arc<ShutdownManager>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub workspaces: Arc<dyn WorkspaceStore>,
    events: Arc<dyn EventHandler>,
}

/// Overridable collaborators a `Runtime` is built from; every field but
/// `llm_clients` has a sensible filesystem-backed / no-op default so tests and
/// small embeddings can construct one with just a config and a mock client.
#[derive(Default)]
pub struct RuntimeBuilder {
    config: Option<RuntimeConfig>,
    llm_clients: LlmRegistry,
    events: Option<Arc<dyn EventHandler>>,
    sandbox: Option<Arc<dyn Sandbox>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        RuntimeBuilder::default()
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_llm_client(mut self, service_id: impl Into<String>, client: Arc<dyn crate::client::LlmClient>) -> Self {
        self.llm_clients.insert(service_id.into(), client);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = Some(handler);
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub async fn build(self) -> Runtime {
        let config = self.config.unwrap_or_default();
        let events = self.events.unwrap_or_else(|| Arc::new(NoopEventHandler));
        let sandbox = self.sandbox.unwrap_or_else(|| Arc::new(ProcessSandbox::new()));

        let org = Arc::new(OrgState::new(&config.runtime_dir));
        org.load_if_exists().await.ok();

        let contacts = Arc::new(ContactRegistry::new());
        let status = new_status_table();
        let bus = Arc::new(MessageBus::new(status.clone()));
        let conversation = Arc::new(ConversationStore::new(&config.runtime_dir, config.context_limit.clone()));
        let concurrency = Arc::new(ConcurrencyController::new(config.llm.max_concurrent_requests));

        let artifacts: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(&config.runtime_dir));
        let workspaces: Arc<dyn WorkspaceStore> = Arc::new(FsWorkspaceStore::new(&config.runtime_dir));

        let lifecycle = Arc::new(AgentLifecycle::new(
            org.clone(),
            contacts.clone(),
            status.clone(),
            events.clone(),
            workspaces.clone(),
        ));

        let tools = Arc::new(ToolExecutor::new(
            org.clone(),
            lifecycle.clone(),
            contacts.clone(),
            bus.clone(),
            conversation.clone(),
            artifacts.clone(),
            workspaces.clone(),
            sandbox,
            config.enabled_tool_modules.clone(),
        ));

        let handler = Arc::new(LlmHandler::new(
            org.clone(),
            lifecycle.clone(),
            contacts.clone(),
            bus.clone(),
            conversation.clone(),
            concurrency.clone(),
            tools.clone(),
            self.llm_clients,
            config.clone(),
            events.clone(),
        ));

        let scheduler = Arc::new(Scheduler::new(
            org.clone(),
            bus.clone(),
            lifecycle.clone(),
            handler.clone(),
            events.clone(),
            config.llm.max_concurrent_requests,
            config.max_steps,
            config.idle_warning_ms,
        ));
        scheduler.register_interruption_notifier().await;

        let shutdown = Arc::new(ShutdownManager::new(
            scheduler.stop_handle(),
            bus.clone(),
            org.clone(),
            conversation.clone(),
            events.clone(),
            config.shutdown_timeout_ms,
        ));

        let runtime = Runtime {
            config,
            org,
            contacts,
            bus,
            conversation,
            concurrency,
            lifecycle,
            tools,
            handler,
            scheduler,
            shutdown,
            artifacts,
            workspaces,
            events,
        };
        runtime.ensure_reserved_agents().await;
        runtime
    }
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates `root` and `user` in OrgState on first boot if absent; both are
    /// pinned to the built-in `system` role and never terminate (§4.2).
    async fn ensure_reserved_agents(&self) {
        if self.org.get_agent(ROOT_AGENT).await.is_ok() {
            return;
        }
        let role_id = "role-system".to_string();
        if self.org.get_role(&role_id).await.is_err() {
            self.org
                .create_role(
                    role_id.clone(),
                    "system".to_string(),
                    "You are the root orchestrator agent.".to_string(),
                    vec!["org".to_string()],
                    "default".to_string(),
                    ROOT_AGENT.to_string(),
                )
                .await
                .ok();
        }
        self.org
            .create_agent(ROOT_AGENT.to_string(), &role_id, None)
            .await
            .ok();
        self.org
            .create_agent(USER_AGENT.to_string(), &role_id, None)
            .await
            .ok();
        self.contacts.register_agent(ROOT_AGENT, None, &[]).await;
        self.contacts.register_agent(USER_AGENT, None, &[]).await;
    }

    /// Convenience wrapper: sends a message from `user` to `root`, the typical
    /// external entry point (§8 scenario S1).
    pub async fn send_to_root(&self, text: impl Into<String>) -> String {
        self.send_to_agent(ROOT_AGENT, text).await
    }

    /// Convenience wrapper: sends a message from `user` to an arbitrary agent.
    pub async fn send_to_agent(&self, agent_id: &str, text: impl Into<String>) -> String {
        let outcome = self
            .bus
            .send(Send::new(USER_AGENT, agent_id, Payload::text(text)))
            .await;
        outcome.message_id
    }

    pub async fn create_role(
        &self,
        name: impl Into<String>,
        role_prompt: impl Into<String>,
        tool_groups: Vec<String>,
        llm_service_id: impl Into<String>,
    ) -> Result<Role, RuntimeError> {
        let id = format!("role-{}", uuid::Uuid::new_v4());
        self.org
            .create_role(id, name.into(), role_prompt.into(), tool_groups, llm_service_id.into(), ROOT_AGENT.to_string())
            .await
            .map_err(|e| RuntimeError::Persistence(e.to_string()))
    }

    pub async fn spawn_agent(&self, role_id: &str, parent_agent_id: &str) -> Result<AgentMeta, RuntimeError> {
        self.lifecycle
            .spawn(role_id, parent_agent_id, &[])
            .await
            .map_err(RuntimeError::from)
    }

    /// Runs the scheduler loop to completion (until shutdown drains). Intended
    /// to be spawned as its own `tokio::task` by the embedding application.
    pub async fn run(&self) {
        self.scheduler.run().await;
    }

    /// Requests graceful shutdown and blocks until drained or the configured
    /// timeout elapses.
    pub async fn shutdown(&self) -> ShutdownSummary {
        self.shutdown.request().await;
        let agent_ids: Vec<String> = self
            .org
            .list_agents()
            .await
            .into_iter()
            .filter(|m| m.terminated_at.is_none())
            .map(|m| m.id)
            .collect();
        self.shutdown.drain(&self.scheduler, &agent_ids).await
    }

    pub fn events(&self) -> Arc<dyn EventHandler> {
        self.events.clone()
    }
}
