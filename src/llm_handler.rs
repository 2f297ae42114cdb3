//! **C8** — the per-message tool-calling loop engine (§4.8).
//!
//! `LlmHandler::handle` is the single polymorphic entry point mentioned in §9:
//! no trait-object-per-agent hierarchy, just one function parameterized by the
//! agent's own id, role, and conversation. The scheduler calls it once per
//! dispatched message inside a detached task.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use tokio::sync::Mutex;

use crate::client::{CancelSignal, ChatMessage, LlmClient, LlmError, ToolDefinition};
use crate::concurrency::ConcurrencyController;
use crate::config::RuntimeConfig;
use crate::contacts::ContactRegistry;
use crate::conversation::{ConversationStore, UsageBand};
use crate::envelope::{Envelope, Payload, Send, USER_AGENT};
use crate::error::RuntimeError;
use crate::event::{EventHandler, RuntimeEvent};
use crate::lifecycle::{AgentLifecycle, ComputeStatus};
use crate::org::OrgState;
use crate::tools::{ToolContext, ToolExecutor};

lazy_static! {
    /// A fixed, English-only pattern set for the step-5g "described a tool
    /// intent but didn't call one" re-prompt heuristic. Disabled unless
    /// [`RuntimeConfig::enable_tool_intent_heuristic`] is set.
    static ref TOOL_INTENT_PATTERNS: Vec<&'static str> = vec![
        "i will now call",
        "i will use the",
        "let me call",
        "calling the",
        "i'm going to invoke",
    ];
}

fn looks_like_tool_intent(text: &str) -> bool {
    let lower = text.to_lowercase();
    TOOL_INTENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Per-agent LLM-service lookup, keyed by [`crate::org::Role::llm_service_id`].
pub type LlmRegistry = HashMap<String, Arc<dyn LlmClient>>;

/// **C8**. One shared instance per runtime; `handle` is safe to call
/// concurrently for distinct agents (the scheduler guarantees it is never
/// called twice concurrently for the *same* agent).
pub struct LlmHandler {
    org: Arc<OrgState>,
    lifecycle: Arc<AgentLifecycle>,
    contacts: Arc<ContactRegistry>,
    bus: Arc<crate::bus::MessageBus>,
    conversation: Arc<ConversationStore>,
    concurrency: Arc<ConcurrencyController>,
    tools: Arc<ToolExecutor>,
    llm_clients: LlmRegistry,
    config: RuntimeConfig,
    events: Arc<dyn EventHandler>,
    active_cancels: Mutex<HashMap<String, CancelSignal>>,
}

impl LlmHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        org: Arc<OrgState>,
        lifecycle: Arc<AgentLifecycle>,
        contacts: Arc<ContactRegistry>,
        bus: Arc<crate::bus::MessageBus>,
        conversation: Arc<ConversationStore>,
        concurrency: Arc<ConcurrencyController>,
        tools: Arc<ToolExecutor>,
        llm_clients: LlmRegistry,
        config: RuntimeConfig,
        events: Arc<dyn EventHandler>,
    ) -> Self {
        LlmHandler {
            org,
            lifecycle,
            contacts,
            bus,
            conversation,
            concurrency,
            tools,
            llm_clients,
            config,
            events,
            active_cancels: Mutex::new(HashMap::new()),
        }
    }

    /// `Abort(agentId, cascade=false)`: cancels `agent_id`'s in-flight LLM
    /// call if any, clears its bus queue, and sets status `stopping` (§4.6).
    /// Idempotent: repeated calls against an already-stopping agent are a no-op
    /// beyond re-signalling an already-fired [`CancelSignal`].
    pub async fn abort(&self, agent_id: &str) -> Result<(), RuntimeError> {
        if let Some(status) = self.lifecycle.status_of(agent_id).await {
            if !matches!(status, ComputeStatus::WaitingLlm | ComputeStatus::Processing) {
                return Ok(());
            }
        }
        if let Some(cancel) = self.active_cancels.lock().await.get(agent_id) {
            cancel.cancel();
        }
        self.lifecycle
            .set_status(agent_id, ComputeStatus::Stopping)
            .await
            .ok();
        self.bus.clear_queue(agent_id).await;
        self.lifecycle
            .set_status(agent_id, ComputeStatus::Stopped)
            .await
            .ok();
        Ok(())
    }

    fn resolve_client(&self, llm_service_id: &str) -> Option<Arc<dyn LlmClient>> {
        self.llm_clients
            .get(llm_service_id)
            .or_else(|| self.llm_clients.get("default"))
            .cloned()
    }

    /// Step 1-2 of §4.8: seeds the conversation with a system prompt built
    /// from the role prompt, the known-contacts list, and the tool-group
    /// summary, if the conversation does not already have one.
    async fn ensure_system_prompt(&self, agent_id: &str, role_prompt: &str) {
        if self.conversation.message_count(agent_id).await > 0 {
            return;
        }
        let contacts = self.contacts.list_contacts(agent_id).await;
        let contacts_desc = if contacts.is_empty() {
            "(none yet)".to_string()
        } else {
            contacts
                .iter()
                .map(|(id, info)| match &info.description {
                    Some(desc) => format!("{} ({}: {})", id, info.role, desc),
                    None => format!("{} ({})", id, info.role),
                })
                .collect::<Vec<_>>()
                .join(", ")
        };
        let prompt = format!("{}\n\nKnown contacts: {}\n", role_prompt, contacts_desc);
        self.conversation
            .append(agent_id, &ChatMessage::system(prompt))
            .await;
    }

    /// Drains the agent's interruption queue and, per §4.8/testable-property-8,
    /// removes a trailing assistant-with-tool_calls entry before appending the
    /// interruptions as user turns. Returns `true` if any interruption was applied.
    async fn apply_interruptions(&self, agent_id: &str) -> bool {
        let interruptions = self.bus.drain_interruptions(agent_id).await;
        if interruptions.is_empty() {
            return false;
        }
        self.conversation.drop_trailing_tool_call_turn(agent_id).await;
        for envelope in &interruptions {
            let text = envelope.payload.text.clone().unwrap_or_default();
            self.conversation
                .append(agent_id, &ChatMessage::user(text))
                .await;
        }
        true
    }

    async fn escalate_error(
        &self,
        agent_id: &str,
        parent_agent_id: Option<&str>,
        error_type: &str,
        message: &str,
        original_message_id: Option<&str>,
        task_id: Option<&str>,
    ) {
        self.conversation
            .append(
                agent_id,
                &ChatMessage::system(format!("[self-diagnostic] {}: {}", error_type, message)),
            )
            .await;
        if let Some(parent) = parent_agent_id {
            let mut payload = Payload::error(error_type, message);
            payload.extra.insert(
                "agentId".to_string(),
                serde_json::Value::String(agent_id.to_string()),
            );
            if let Some(id) = original_message_id {
                payload
                    .extra
                    .insert("originalMessageId".to_string(), serde_json::Value::String(id.to_string()));
            }
            let mut send = Send::new(agent_id.to_string(), parent.to_string(), payload);
            if let Some(task_id) = task_id {
                send = send.with_task_id(task_id.to_string());
            }
            self.bus.send(send).await;
        }
        self.events
            .on_event(&RuntimeEvent::LlmCallFailed {
                agent_id: agent_id.to_string(),
                message: message.to_string(),
            })
            .await;
    }

    /// `handle(ctx, message)` — one full turn (§4.8).
    pub async fn handle(&self, agent_id: &str, message: Envelope) -> Result<(), RuntimeError> {
        let meta = self.org.get_agent(agent_id).await.map_err(|_| RuntimeError::AgentNotFound(agent_id.to_string()))?;
        let parent = meta.parent_agent_id.clone();
        let role = self.org.get_role(&meta.role_id).await?;

        // Step 1.
        if self.conversation.is_context_exceeded(agent_id).await {
            self.escalate_error(
                agent_id,
                parent.as_deref(),
                "context_limit_exceeded",
                "conversation token usage is at or above the hard limit",
                Some(&message.id),
                message.task_id.as_deref(),
            )
            .await;
            self.lifecycle.set_status(agent_id, ComputeStatus::Idle).await.ok();
            return Ok(());
        }

        // Step 2.
        self.lifecycle.set_status(agent_id, ComputeStatus::Processing).await.ok();
        self.ensure_system_prompt(agent_id, &role.role_prompt).await;

        // Step 3.
        let mut user_text = message.payload.text.clone().unwrap_or_default();
        if !message.payload.attachments.is_empty() {
            user_text.push_str("\n\n--- attachments ---\n");
            for attachment in &message.payload.attachments {
                for (content, _meta) in self.fetch_attachment(attachment).await {
                    user_text.push_str(&content);
                    user_text.push('\n');
                }
            }
        }
        self.conversation
            .append(agent_id, &ChatMessage::user(user_text))
            .await;

        // Step 4.
        if matches!(
            self.conversation.usage_band(agent_id).await,
            UsageBand::Warning | UsageBand::Critical
        ) {
            let pct = self.conversation.usage_percent(agent_id).await;
            self.conversation
                .append(
                    agent_id,
                    &ChatMessage::system(format!(
                        "context status advisory: usage at {:.0}% of the configured limit",
                        pct * 100.0
                    )),
                )
                .await;
            self.events
                .on_event(&RuntimeEvent::ContextThresholdCrossed {
                    agent_id: agent_id.to_string(),
                    usage_percent: pct,
                })
                .await;
        }

        let client = self
            .resolve_client(&role.llm_service_id)
            .ok_or_else(|| RuntimeError::LlmCallFailed("no llm client configured".to_string()))?;
        let tool_defs = self.tool_definitions(&role.tool_groups);
        let ctx = ToolContext::new(agent_id, message.task_id.clone());

        // Step 5.
        for iteration in 0..self.config.max_tool_rounds {
            // 5a.
            match self.lifecycle.status_of(agent_id).await {
                Some(ComputeStatus::Stopped) | Some(ComputeStatus::Stopping) | Some(ComputeStatus::Terminating) => {
                    return Ok(());
                }
                Some(ComputeStatus::Idle) => return Ok(()),
                _ => {}
            }

            // 5b.
            self.apply_interruptions(agent_id).await;

            // 5c.
            self.lifecycle.set_status(agent_id, ComputeStatus::WaitingLlm).await.ok();
            let cancel = CancelSignal::new();
            self.active_cancels
                .lock()
                .await
                .insert(agent_id.to_string(), cancel.clone());

            let conversation = self.conversation.messages(agent_id).await;
            let outcome = self
                .concurrency
                .execute(agent_id, client.as_ref(), &conversation, &tool_defs, Some(cancel))
                .await;
            self.active_cancels.lock().await.remove(agent_id);

            let reply = match outcome {
                Ok(Ok(reply)) => reply,
                Ok(Err(LlmError::Aborted)) => {
                    // 5d.
                    self.conversation
                        .append(agent_id, &ChatMessage::assistant("[aborted]"))
                        .await;
                    return Ok(());
                }
                Ok(Err(LlmError::Failed(msg))) => {
                    // 5e.
                    self.escalate_error(
                        agent_id,
                        parent.as_deref(),
                        "llm_call_failed",
                        &msg,
                        Some(&message.id),
                        message.task_id.as_deref(),
                    )
                    .await;
                    self.lifecycle.set_status(agent_id, ComputeStatus::Idle).await.ok();
                    return Ok(());
                }
                Err(concurrency_err) => {
                    self.escalate_error(
                        agent_id,
                        parent.as_deref(),
                        "llm_call_failed",
                        &concurrency_err.to_string(),
                        Some(&message.id),
                        message.task_id.as_deref(),
                    )
                    .await;
                    self.lifecycle.set_status(agent_id, ComputeStatus::Idle).await.ok();
                    return Ok(());
                }
            };

            // 5f.
            self.conversation
                .append_with_usage(agent_id, &reply.message, &reply.usage)
                .await;
            self.lifecycle.set_status(agent_id, ComputeStatus::Processing).await.ok();
            self.events
                .on_event(&RuntimeEvent::LlmCallCompleted {
                    agent_id: agent_id.to_string(),
                    iteration,
                    usage: Some(reply.usage.clone()),
                })
                .await;

            if reply.message.tool_calls.is_empty() {
                // 5g.
                if self.config.enable_tool_intent_heuristic
                    && looks_like_tool_intent(&reply.message.content)
                    && iteration + 1 < self.config.max_tool_rounds
                {
                    self.conversation
                        .append(
                            agent_id,
                            &ChatMessage::system(
                                "Your previous reply described an action without calling a tool. \
                                 Call the appropriate tool now, or reply with your final answer."
                                    .to_string(),
                            ),
                        )
                        .await;
                    continue;
                }
                let mut send = Send::new(agent_id.to_string(), USER_AGENT.to_string(), Payload::text(reply.message.content));
                if let Some(task_id) = &message.task_id {
                    send = send.with_task_id(task_id.clone());
                }
                self.bus.send(send).await;
                self.lifecycle.set_status(agent_id, ComputeStatus::Idle).await.ok();
                return Ok(());
            }

            // 5h.
            for tool_call in &reply.message.tool_calls {
                match self.lifecycle.status_of(agent_id).await {
                    Some(ComputeStatus::Stopped) | Some(ComputeStatus::Stopping) | Some(ComputeStatus::Terminating) => {
                        return Ok(());
                    }
                    _ => {}
                }

                self.events
                    .on_event(&RuntimeEvent::ToolCallStarted {
                        agent_id: agent_id.to_string(),
                        tool_name: tool_call.name.clone(),
                        iteration,
                    })
                    .await;

                let result = self
                    .tools
                    .execute(&ctx, &role.tool_groups, &tool_call.name, &tool_call.arguments)
                    .await;

                let (tool_result_text, success, error_text) = match &result {
                    Ok(value) => (value.to_string(), true, None),
                    Err(e) => (
                        serde_json::json!({ "error": e.to_string() }).to_string(),
                        false,
                        Some(e.to_string()),
                    ),
                };

                self.events
                    .on_event(&RuntimeEvent::ToolCallCompleted {
                        agent_id: agent_id.to_string(),
                        tool_name: tool_call.name.clone(),
                        success,
                        error: error_text,
                    })
                    .await;

                self.conversation
                    .append(agent_id, &ChatMessage::tool_result(tool_call.id.clone(), tool_result_text))
                    .await;
            }

            // 5i.
            if ctx.yield_requested.get() {
                self.lifecycle.set_status(agent_id, ComputeStatus::Idle).await.ok();
                return Ok(());
            }
        }

        // Step 6.
        self.escalate_error(
            agent_id,
            parent.as_deref(),
            "max_tool_rounds_exceeded",
            "the turn did not reach a terminal state within maxToolRounds",
            Some(&message.id),
            message.task_id.as_deref(),
        )
        .await;
        self.lifecycle.set_status(agent_id, ComputeStatus::Idle).await.ok();
        Ok(())
    }

    fn tool_definitions(&self, role_tool_groups: &[String]) -> Vec<ToolDefinition> {
        crate::tools::TOOLS
            .iter()
            .filter(|t| role_tool_groups.is_empty() || role_tool_groups.iter().any(|g| g == t.group.as_str()))
            .map(|t| ToolDefinition {
                name: t.name.to_string(),
                description: t.description.to_string(),
                parameters_schema: serde_json::json!({ "type": "object" }),
            })
            .collect()
    }

    async fn fetch_attachment(&self, attachment: &crate::envelope::Attachment) -> Option<(String, Option<String>)> {
        Some((format!("[attachment: {}]", attachment.artifact_ref), attachment.mime_type.clone()))
    }
}

