//! **C7** — the fixed, enumerated tool set and its dispatcher.
//!
//! Tools are variants over an enumerated name dispatched through a `match`,
//! not a trait-object-per-tool hierarchy (§9: "tool executors are variants
//! over an enumerated tool-id"). Every call returns a JSON value or a
//! structured [`ToolError`] — never a panic.

pub mod sandbox;

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::contacts::{ContactRegistry, PresetContact};
use crate::envelope::{Payload, Send, ROOT_AGENT, USER_AGENT};
use crate::lifecycle::AgentLifecycle;
use crate::org::OrgState;
use crate::store::{ArtifactMeta, ArtifactStore, WorkspaceStore};
use sandbox::Sandbox;

#[derive(Debug, Clone)]
pub enum ToolError {
    ToolNotAvailable(String),
    ToolArgumentParseFailed(String),
    ToolExecutionFailed(String),
    PathTraversalBlocked(String),
    WorkspaceNotBound(String),
    FileNotFound(String),
    PermissionDenied(String),
    CodeTooLarge(usize),
    ResultTooLarge(usize),
    NonJsonSerializableReturn(String),
    JsExecutionFailed(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::ToolNotAvailable(name) => write!(f, "tool_not_available: {}", name),
            ToolError::ToolArgumentParseFailed(msg) => {
                write!(f, "tool_argument_parse_failed: {}", msg)
            }
            ToolError::ToolExecutionFailed(msg) => write!(f, "tool_execution_failed: {}", msg),
            ToolError::PathTraversalBlocked(path) => {
                write!(f, "path_traversal_blocked: {}", path)
            }
            ToolError::WorkspaceNotBound(id) => write!(f, "workspace_not_bound: {}", id),
            ToolError::FileNotFound(path) => write!(f, "file_not_found: {}", path),
            ToolError::PermissionDenied(msg) => write!(f, "permission_denied: {}", msg),
            ToolError::CodeTooLarge(len) => write!(f, "code_too_large: {} bytes", len),
            ToolError::ResultTooLarge(len) => write!(f, "result_too_large: {} bytes", len),
            ToolError::NonJsonSerializableReturn(msg) => {
                write!(f, "non_json_serializable_return: {}", msg)
            }
            ToolError::JsExecutionFailed(msg) => write!(f, "js_execution_failed: {}", msg),
        }
    }
}
impl std::error::Error for ToolError {}

impl From<crate::store::StoreError> for ToolError {
    fn from(e: crate::store::StoreError) -> Self {
        match e {
            crate::store::StoreError::NotFound(r) => ToolError::FileNotFound(r),
            crate::store::StoreError::PathTraversalBlocked(p) => ToolError::PathTraversalBlocked(p),
            crate::store::StoreError::WorkspaceNotBound(id) => ToolError::WorkspaceNotBound(id),
            crate::store::StoreError::Io(msg) => ToolError::ToolExecutionFailed(msg),
        }
    }
}

/// The capability group a tool belongs to, used for role-based gating (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolGroup {
    Org,
    Artifact,
    Workspace,
    Command,
    Context,
    Console,
}

impl ToolGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolGroup::Org => "org",
            ToolGroup::Artifact => "artifact",
            ToolGroup::Workspace => "workspace",
            ToolGroup::Command => "command",
            ToolGroup::Context => "context",
            ToolGroup::Console => "console",
        }
    }
}

/// Schema metadata for one tool, used both for capability gating and for
/// building the OpenAI-shape [`crate::client::ToolDefinition`] array sent to
/// the LLM.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub group: ToolGroup,
    pub description: &'static str,
}

/// The fixed tool enumeration from §4.7, in table order.
pub const TOOLS: &[ToolDescriptor] = &[
    ToolDescriptor { name: "find_role_by_name", group: ToolGroup::Org, description: "Look up a role by name." },
    ToolDescriptor { name: "create_role", group: ToolGroup::Org, description: "Create a new role; createdBy is set to the caller." },
    ToolDescriptor { name: "spawn_agent", group: ToolGroup::Org, description: "Spawn a child agent under the caller; does not send a message." },
    ToolDescriptor { name: "spawn_agent_with_task", group: ToolGroup::Org, description: "Spawn a child agent and send it an initial message in one step." },
    ToolDescriptor { name: "send_message", group: ToolGroup::Org, description: "Send a message to a known contact." },
    ToolDescriptor { name: "terminate_agent", group: ToolGroup::Org, description: "Terminate a descendant agent, cascading to its descendants." },
    ToolDescriptor { name: "put_artifact", group: ToolGroup::Artifact, description: "Store an opaque artifact and return its reference." },
    ToolDescriptor { name: "get_artifact", group: ToolGroup::Artifact, description: "Retrieve a previously stored artifact by reference." },
    ToolDescriptor { name: "read_file", group: ToolGroup::Workspace, description: "Read a file from the caller's workspace." },
    ToolDescriptor { name: "write_file", group: ToolGroup::Workspace, description: "Write a file into the caller's workspace, creating it lazily." },
    ToolDescriptor { name: "list_files", group: ToolGroup::Workspace, description: "List files under a workspace directory." },
    ToolDescriptor { name: "get_workspace_info", group: ToolGroup::Workspace, description: "Report whether the caller has a bound workspace." },
    ToolDescriptor { name: "run_command", group: ToolGroup::Command, description: "Run a shell command with a bounded timeout." },
    ToolDescriptor { name: "run_javascript", group: ToolGroup::Command, description: "Run a JavaScript snippet in a restricted sandbox." },
    ToolDescriptor { name: "compress_context", group: ToolGroup::Context, description: "Compress the caller's conversation history to a summary." },
    ToolDescriptor { name: "get_context_status", group: ToolGroup::Context, description: "Report the caller's current token usage band." },
    ToolDescriptor { name: "console_print", group: ToolGroup::Console, description: "Emit a diagnostic line; has no effect on conversation state." },
];

pub fn find_tool(name: &str) -> Option<&'static ToolDescriptor> {
    TOOLS.iter().find(|t| t.name == name)
}

/// The context a single tool call executes under; built fresh per call by
/// [`crate::llm_handler::LlmHandler`].
pub struct ToolContext {
    pub caller_agent_id: String,
    pub task_id: Option<String>,
    /// Set to `true` by `send_message`/`spawn_agent_with_task`/terminate-self
    /// calls that should end the current turn immediately (§4.8 step 5i).
    pub yield_requested: std::cell::Cell<bool>,
}

impl ToolContext {
    pub fn new(caller_agent_id: impl Into<String>, task_id: Option<String>) -> Self {
        ToolContext {
            caller_agent_id: caller_agent_id.into(),
            task_id,
            yield_requested: std::cell::Cell::new(false),
        }
    }
}

#[derive(Deserialize)]
struct CreateRoleArgs {
    name: String,
    role_prompt: String,
    #[serde(default)]
    tool_groups: Vec<String>,
    #[serde(default = "default_llm_service_id")]
    llm_service_id: String,
}
fn default_llm_service_id() -> String {
    "default".to_string()
}

#[derive(Deserialize)]
struct FindRoleArgs {
    name: String,
}

#[derive(Deserialize)]
struct SpawnAgentArgs {
    role_id: String,
    #[serde(default)]
    task_brief: Option<String>,
    #[serde(default)]
    presets: Vec<PresetContact>,
}

#[derive(Deserialize)]
struct SpawnAgentWithTaskArgs {
    role_id: String,
    #[serde(default)]
    task_brief: Option<String>,
    initial_message: String,
    #[serde(default)]
    presets: Vec<PresetContact>,
}

#[derive(Deserialize)]
struct SendMessageArgs {
    to: String,
    payload: String,
    #[serde(default)]
    quick_replies: Vec<String>,
}

#[derive(Deserialize)]
struct TerminateAgentArgs {
    agent_id: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct PutArtifactArgs {
    #[serde(rename = "type")]
    artifact_type: String,
    content: String,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Deserialize)]
struct GetArtifactArgs {
    #[serde(rename = "ref")]
    artifact_ref: String,
}

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
}

#[derive(Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct ListFilesArgs {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Deserialize)]
struct RunCommandArgs {
    command: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Deserialize)]
struct RunJavascriptArgs {
    code: String,
    #[serde(default)]
    input: Option<String>,
}

#[derive(Deserialize)]
struct CompressContextArgs {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default = "default_keep_recent")]
    keep_recent_count: usize,
}
fn default_keep_recent() -> usize {
    10
}

#[derive(Deserialize)]
struct ConsolePrintArgs {
    text: String,
}

/// **C7**. Holds `Arc` references to every collaborator a tool call might
/// need; built once by [`crate::runtime::Runtime`] and shared across all
/// agents' handlers.
pub struct ToolExecutor {
    org: Arc<OrgState>,
    lifecycle: Arc<AgentLifecycle>,
    contacts: Arc<ContactRegistry>,
    bus: Arc<crate::bus::MessageBus>,
    conversation: Arc<crate::conversation::ConversationStore>,
    artifacts: Arc<dyn ArtifactStore>,
    workspaces: Arc<dyn WorkspaceStore>,
    sandbox: Arc<dyn Sandbox>,
    enabled_tool_modules: Vec<String>,
}

impl ToolExecutor {
    pub fn new(
        org: Arc<OrgState>,
        lifecycle: Arc<AgentLifecycle>,
        contacts: Arc<ContactRegistry>,
        bus: Arc<crate::bus::MessageBus>,
        conversation: Arc<crate::conversation::ConversationStore>,
        artifacts: Arc<dyn ArtifactStore>,
        workspaces: Arc<dyn WorkspaceStore>,
        sandbox: Arc<dyn Sandbox>,
        enabled_tool_modules: Vec<String>,
    ) -> Self {
        ToolExecutor {
            org,
            lifecycle,
            contacts,
            bus,
            conversation,
            artifacts,
            workspaces,
            sandbox,
            enabled_tool_modules,
        }
    }

    /// Returns `true` if `caller_role`'s `tool_groups` permit `tool_name` and
    /// the tool's module is enabled at the runtime level (empty
    /// `enabled_tool_modules` means every module is on, see
    /// [`crate::config::RuntimeConfig::enabled_tool_modules`]).
    /// Empty role `tool_groups` means "all" (§3); `root` is pinned to `org` alone.
    pub fn is_tool_available(&self, caller_agent_id: &str, role_tool_groups: &[String], tool_name: &str) -> bool {
        let descriptor = match find_tool(tool_name) {
            Some(d) => d,
            None => return false,
        };
        if !self.enabled_tool_modules.is_empty()
            && !self.enabled_tool_modules.iter().any(|g| g == descriptor.group.as_str())
        {
            return false;
        }
        if caller_agent_id == ROOT_AGENT {
            return descriptor.group == ToolGroup::Org;
        }
        if role_tool_groups.is_empty() {
            return true;
        }
        role_tool_groups.iter().any(|g| g == descriptor.group.as_str())
    }

    /// Dispatches one tool call. `role_tool_groups` is the caller's role's
    /// gating set (empty = unrestricted); callers look this up via
    /// [`OrgState::get_role`] before invoking.
    pub async fn execute(
        &self,
        ctx: &ToolContext,
        role_tool_groups: &[String],
        tool_name: &str,
        arguments_json: &str,
    ) -> Result<Value, ToolError> {
        if !self.is_tool_available(&ctx.caller_agent_id, role_tool_groups, tool_name) {
            return Err(ToolError::ToolNotAvailable(tool_name.to_string()));
        }

        match tool_name {
            "find_role_by_name" => self.find_role_by_name(arguments_json).await,
            "create_role" => self.create_role(ctx, arguments_json).await,
            "spawn_agent" => self.spawn_agent(ctx, arguments_json).await,
            "spawn_agent_with_task" => self.spawn_agent_with_task(ctx, arguments_json).await,
            "send_message" => self.send_message(ctx, arguments_json).await,
            "terminate_agent" => self.terminate_agent(ctx, arguments_json).await,
            "put_artifact" => self.put_artifact(arguments_json).await,
            "get_artifact" => self.get_artifact(arguments_json).await,
            "read_file" => self.read_file(ctx, arguments_json).await,
            "write_file" => self.write_file(ctx, arguments_json).await,
            "list_files" => self.list_files(ctx, arguments_json).await,
            "get_workspace_info" => self.get_workspace_info(ctx).await,
            "run_command" => self.run_command(arguments_json).await,
            "run_javascript" => self.run_javascript(arguments_json).await,
            "compress_context" => self.compress_context(ctx, arguments_json).await,
            "get_context_status" => self.get_context_status(ctx).await,
            "console_print" => self.console_print(arguments_json),
            other => Err(ToolError::ToolNotAvailable(other.to_string())),
        }
    }

    fn parse<T: for<'de> Deserialize<'de>>(arguments_json: &str) -> Result<T, ToolError> {
        serde_json::from_str(arguments_json).map_err(|e| ToolError::ToolArgumentParseFailed(e.to_string()))
    }

    async fn find_role_by_name(&self, arguments_json: &str) -> Result<Value, ToolError> {
        let args: FindRoleArgs = Self::parse(arguments_json)?;
        match self.org.find_role_by_name(&args.name).await {
            Some(role) => Ok(json!({ "id": role.id, "name": role.name })),
            None => Ok(json!({ "found": false })),
        }
    }

    async fn create_role(&self, ctx: &ToolContext, arguments_json: &str) -> Result<Value, ToolError> {
        let args: CreateRoleArgs = Self::parse(arguments_json)?;
        let id = format!("role-{}", uuid::Uuid::new_v4());
        let role = self
            .org
            .create_role(
                id,
                args.name,
                args.role_prompt,
                args.tool_groups,
                args.llm_service_id,
                ctx.caller_agent_id.clone(),
            )
            .await
            .map_err(|e| ToolError::ToolExecutionFailed(e.to_string()))?;
        Ok(json!({ "id": role.id, "name": role.name }))
    }

    async fn spawn_agent(&self, ctx: &ToolContext, arguments_json: &str) -> Result<Value, ToolError> {
        let args: SpawnAgentArgs = Self::parse(arguments_json)?;
        let meta = self
            .lifecycle
            .spawn(&args.role_id, &ctx.caller_agent_id, &args.presets)
            .await
            .map_err(|e| ToolError::ToolExecutionFailed(e.to_string()))?;
        let role = self.org.get_role(&meta.role_id).await.ok();
        Ok(json!({
            "id": meta.id,
            "roleId": meta.role_id,
            "roleName": role.map(|r| r.name),
            "taskBrief": args.task_brief,
        }))
    }

    async fn spawn_agent_with_task(
        &self,
        ctx: &ToolContext,
        arguments_json: &str,
    ) -> Result<Value, ToolError> {
        let args: SpawnAgentWithTaskArgs = Self::parse(arguments_json)?;
        let meta = self
            .lifecycle
            .spawn(&args.role_id, &ctx.caller_agent_id, &args.presets)
            .await
            .map_err(|e| ToolError::ToolExecutionFailed(e.to_string()))?;
        let role = self.org.get_role(&meta.role_id).await.ok();
        let send = Send::new(
            ctx.caller_agent_id.clone(),
            meta.id.clone(),
            Payload::text(args.initial_message),
        );
        let outcome = self.bus.send(send).await;
        ctx.yield_requested.set(true);
        Ok(json!({
            "id": meta.id,
            "roleId": meta.role_id,
            "roleName": role.map(|r| r.name),
            "messageId": outcome.message_id,
        }))
    }

    async fn send_message(&self, ctx: &ToolContext, arguments_json: &str) -> Result<Value, ToolError> {
        let args: SendMessageArgs = Self::parse(arguments_json)?;
        if args.quick_replies.len() > 10 || args.quick_replies.iter().any(|q| q.trim().is_empty()) {
            return Err(ToolError::ToolArgumentParseFailed(
                "quickReplies must have at most 10 non-empty entries".to_string(),
            ));
        }
        let known = args.to == USER_AGENT
            || args.to == ROOT_AGENT
            || self.contacts.is_known(&ctx.caller_agent_id, &args.to).await;
        if !known {
            return Err(ToolError::ToolExecutionFailed(format!(
                "recipient is not a known contact: {}",
                args.to
            )));
        }
        let mut payload = Payload::text(args.payload);
        payload.quick_replies = args.quick_replies;
        let mut send = Send::new(ctx.caller_agent_id.clone(), args.to.clone(), payload);
        if let Some(task_id) = &ctx.task_id {
            send = send.with_task_id(task_id.clone());
        }
        let outcome = self.bus.send(send).await;
        ctx.yield_requested.set(true);
        Ok(json!({
            "messageId": outcome.message_id,
            "rejected": outcome.rejected,
            "reason": outcome.reason,
        }))
    }

    async fn terminate_agent(&self, ctx: &ToolContext, arguments_json: &str) -> Result<Value, ToolError> {
        let args: TerminateAgentArgs = Self::parse(arguments_json)?;
        if args.agent_id == ROOT_AGENT || args.agent_id == USER_AGENT {
            return Err(ToolError::ToolExecutionFailed(format!(
                "reserved_agent_not_terminable: {}",
                args.agent_id
            )));
        }
        let removed = self
            .lifecycle
            .terminate(&ctx.caller_agent_id, &args.agent_id, args.reason)
            .await
            .map_err(|e| ToolError::ToolExecutionFailed(e.to_string()))?;
        for agent_id in &removed {
            self.bus.clear_queue(agent_id).await;
            self.conversation.remove(agent_id).await;
        }
        Ok(json!({ "ok": true, "terminatedAgentId": args.agent_id }))
    }

    async fn put_artifact(&self, arguments_json: &str) -> Result<Value, ToolError> {
        let args: PutArtifactArgs = Self::parse(arguments_json)?;
        let meta = ArtifactMeta {
            artifact_type: args.artifact_type,
            mime_type: args.mime_type,
        };
        let artifact_ref = self
            .artifacts
            .put_artifact(&meta.artifact_type, args.content.as_bytes(), Some(meta))
            .await?;
        Ok(json!({ "ref": artifact_ref }))
    }

    async fn get_artifact(&self, arguments_json: &str) -> Result<Value, ToolError> {
        let args: GetArtifactArgs = Self::parse(arguments_json)?;
        let (content, meta) = self.artifacts.get_artifact(&args.artifact_ref).await?;
        Ok(json!({
            "content": String::from_utf8_lossy(&content),
            "type": meta.artifact_type,
            "mimeType": meta.mime_type,
        }))
    }

    async fn read_file(&self, ctx: &ToolContext, arguments_json: &str) -> Result<Value, ToolError> {
        let args: ReadFileArgs = Self::parse(arguments_json)?;
        for owner_id in self.lifecycle.workspace_ancestry(&ctx.caller_agent_id).await {
            if let Ok(content) = self.workspaces.read_file(&owner_id, &args.path).await {
                return Ok(json!({ "content": content }));
            }
        }
        Err(ToolError::FileNotFound(args.path))
    }

    async fn write_file(&self, ctx: &ToolContext, arguments_json: &str) -> Result<Value, ToolError> {
        let args: WriteFileArgs = Self::parse(arguments_json)?;
        self.workspaces
            .write_file(&ctx.caller_agent_id, &args.path, &args.content)
            .await?;
        Ok(json!({ "ok": true }))
    }

    async fn list_files(&self, ctx: &ToolContext, arguments_json: &str) -> Result<Value, ToolError> {
        let args: ListFilesArgs = Self::parse(arguments_json)?;
        let files = self
            .workspaces
            .list_files(&ctx.caller_agent_id, args.path.as_deref())
            .await?;
        Ok(json!({ "files": files }))
    }

    async fn get_workspace_info(&self, ctx: &ToolContext) -> Result<Value, ToolError> {
        let bound = self.workspaces.has_workspace(&ctx.caller_agent_id).await;
        Ok(json!({ "bound": bound }))
    }

    async fn run_command(&self, arguments_json: &str) -> Result<Value, ToolError> {
        let args: RunCommandArgs = Self::parse(arguments_json)?;
        let output = self
            .sandbox
            .run_command(&args.command, args.timeout_ms.unwrap_or(60_000))
            .await?;
        Ok(json!({ "output": output }))
    }

    async fn run_javascript(&self, arguments_json: &str) -> Result<Value, ToolError> {
        let args: RunJavascriptArgs = Self::parse(arguments_json)?;
        let output = self
            .sandbox
            .run_javascript(&args.code, args.input.as_deref())
            .await?;
        Ok(json!({ "output": output }))
    }

    async fn compress_context(&self, ctx: &ToolContext, arguments_json: &str) -> Result<Value, ToolError> {
        let args: CompressContextArgs = Self::parse(arguments_json)?;
        let original_count = self.conversation.message_count(&ctx.caller_agent_id).await;
        self.conversation
            .compress(&ctx.caller_agent_id, args.keep_recent_count)
            .await;
        let new_count = self.conversation.message_count(&ctx.caller_agent_id).await;
        Ok(json!({
            "ok": true,
            "originalCount": original_count,
            "newCount": new_count,
            "summary": args.summary,
        }))
    }

    async fn get_context_status(&self, ctx: &ToolContext) -> Result<Value, ToolError> {
        let usage_percent = self.conversation.usage_percent(&ctx.caller_agent_id).await;
        let band = self.conversation.usage_band(&ctx.caller_agent_id).await;
        Ok(json!({
            "usagePercent": usage_percent,
            "band": format!("{:?}", band),
        }))
    }

    fn console_print(&self, arguments_json: &str) -> Result<Value, ToolError> {
        let args: ConsolePrintArgs = Self::parse(arguments_json)?;
        log::info!("console_print: {}", args.text);
        Ok(json!({ "ok": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::new_status_table;

    async fn executor() -> (ToolExecutor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let org = Arc::new(OrgState::new(dir.path()));
        let status = new_status_table();
        let contacts = Arc::new(ContactRegistry::new());
        let workspaces: Arc<dyn WorkspaceStore> =
            Arc::new(crate::store::FsWorkspaceStore::new(dir.path()));
        let lifecycle = Arc::new(AgentLifecycle::new(
            org.clone(),
            contacts.clone(),
            status.clone(),
            Arc::new(crate::event::NoopEventHandler),
            workspaces.clone(),
        ));
        let bus = Arc::new(crate::bus::MessageBus::new(status.clone()));
        let conversation = Arc::new(crate::conversation::ConversationStore::new(
            dir.path(),
            crate::config::ContextLimitConfig::default(),
        ));
        let artifacts = Arc::new(crate::store::FsArtifactStore::new(dir.path()));
        workspaces.assign_workspace("agent-x").await.unwrap();
        let sandbox = Arc::new(sandbox::ProcessSandbox::new());
        (
            ToolExecutor::new(org, lifecycle, contacts, bus, conversation, artifacts, workspaces, sandbox, Vec::new()),
            dir,
        )
    }

    #[tokio::test]
    async fn write_then_read_file_round_trips() {
        let (executor, _dir) = executor().await;
        let ctx = ToolContext::new("agent-x", None);
        executor
            .execute(&ctx, &[], "write_file", r#"{"path":"a.txt","content":"hi"}"#)
            .await
            .unwrap();
        let result = executor
            .execute(&ctx, &[], "read_file", r#"{"path":"a.txt"}"#)
            .await
            .unwrap();
        assert_eq!(result["content"], "hi");
    }

    #[tokio::test]
    async fn path_traversal_is_blocked() {
        let (executor, _dir) = executor().await;
        let ctx = ToolContext::new("agent-x", None);
        let err = executor
            .execute(&ctx, &[], "write_file", r#"{"path":"../escape.txt","content":"x"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PathTraversalBlocked(_)));
    }

    #[tokio::test]
    async fn unassigned_agent_gets_workspace_not_bound() {
        let (executor, _dir) = executor().await;
        let ctx = ToolContext::new("agent-unassigned", None);
        let err = executor
            .execute(&ctx, &[], "write_file", r#"{"path":"a.txt","content":"x"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::WorkspaceNotBound(_)));
    }

    #[tokio::test]
    async fn root_is_pinned_to_org_group() {
        let (executor, _dir) = executor().await;
        let ctx = ToolContext::new("root", None);
        let err = executor
            .execute(&ctx, &[], "write_file", r#"{"path":"a.txt","content":"x"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ToolNotAvailable(_)));
    }

    #[tokio::test]
    async fn malformed_arguments_are_reported_not_panicked() {
        let (executor, _dir) = executor().await;
        let ctx = ToolContext::new("agent-x", None);
        let err = executor
            .execute(&ctx, &[], "console_print", "not json")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ToolArgumentParseFailed(_)));
    }
}
