//! Crate-wide error hierarchy.
//!
//! Every fallible public entry point returns `Result<T, RuntimeError>` (or a
//! narrower component error that converts into it via `From`). This mirrors
//! the reference codebase's own pattern for `OrchestrationError` / `CouncilError`
//! / `ToolError`: a plain enum with a hand-written `Display` impl and a blanket
//! `impl Error for X {}`, no `thiserror`.

use std::fmt;

use crate::bus::BusError;
use crate::concurrency::ConcurrencyError;
use crate::lifecycle::LifecycleError;
use crate::org::OrgError;
use crate::tools::ToolError;

/// Errors surfaced by the runtime's public API.
#[derive(Debug, Clone)]
pub enum RuntimeError {
    /// No `AgentMeta` exists for the given id.
    AgentNotFound(String),
    /// A `terminate_agent` call targeted an agent that is not a descendant of the caller.
    NotChildAgent { caller: String, target: String },
    /// A tool call arrived without a resolvable caller agent.
    MissingCallerAgent,
    /// `spawn_agent` was called without a valid `parentAgentId`.
    InvalidParentAgentId(String),
    /// The role referenced by id or name does not exist.
    RoleNotFound(String),
    /// The requested tool is outside the caller's role's `toolGroups`.
    ToolNotAvailable(String),
    /// The LLM call ultimately failed after exhausting retries.
    LlmCallFailed(String),
    /// The LLM call was cancelled (not treated as an error for escalation purposes).
    LlmCallAborted,
    /// `maxToolRounds` was reached without the handler reaching a terminal state.
    MaxToolRoundsExceeded,
    /// `usagePercent` is at or above `hardLimit`; no further LLM calls are permitted.
    ContextLimitExceeded,
    /// A workspace path escaped the sandbox (absolute path or `..` segment).
    PathTraversalBlocked(String),
    /// The caller has no assigned workspace.
    WorkspaceNotBound,
    /// A workspace-relative path did not resolve to an existing file.
    FileNotFound(String),
    /// A persistence or workspace operation was denied by the OS.
    PermissionDenied(String),
    /// Bus rejected a send because the recipient is shutting down or gone.
    Bus(BusError),
    /// ConcurrencyController rejected or failed a request.
    Concurrency(ConcurrencyError),
    /// AgentLifecycle rejected a spawn/terminate request.
    Lifecycle(LifecycleError),
    /// ToolExecutor-level failure (see [`ToolError`] for the full enumeration).
    Tool(ToolError),
    /// Persistence (org state / conversation / workspace metadata) I/O or (de)serialization failure.
    Persistence(String),
    /// A fatal, programmer-fault-class error (e.g. corrupt persistence on boot).
    /// Handlers never raise this for routine conditions; it is reserved for the
    /// process-exit path described in the error propagation policy.
    Fatal(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::AgentNotFound(id) => write!(f, "agent_not_found: {}", id),
            RuntimeError::NotChildAgent { caller, target } => write!(
                f,
                "not_child_agent: {} is not a descendant of {}",
                target, caller
            ),
            RuntimeError::MissingCallerAgent => write!(f, "missing_caller_agent"),
            RuntimeError::InvalidParentAgentId(id) => {
                write!(f, "invalid_parentAgentId: {}", id)
            }
            RuntimeError::RoleNotFound(id) => write!(f, "role not found: {}", id),
            RuntimeError::ToolNotAvailable(name) => write!(f, "tool_not_available: {}", name),
            RuntimeError::LlmCallFailed(msg) => write!(f, "llm_call_failed: {}", msg),
            RuntimeError::LlmCallAborted => write!(f, "llm_call_aborted"),
            RuntimeError::MaxToolRoundsExceeded => write!(f, "max_tool_rounds_exceeded"),
            RuntimeError::ContextLimitExceeded => write!(f, "context_limit_exceeded"),
            RuntimeError::PathTraversalBlocked(path) => {
                write!(f, "path_traversal_blocked: {}", path)
            }
            RuntimeError::WorkspaceNotBound => write!(f, "workspace_not_bound"),
            RuntimeError::FileNotFound(path) => write!(f, "file_not_found: {}", path),
            RuntimeError::PermissionDenied(msg) => write!(f, "permission_denied: {}", msg),
            RuntimeError::Bus(e) => write!(f, "{}", e),
            RuntimeError::Concurrency(e) => write!(f, "{}", e),
            RuntimeError::Lifecycle(e) => write!(f, "{}", e),
            RuntimeError::Tool(e) => write!(f, "{}", e),
            RuntimeError::Persistence(msg) => write!(f, "persistence error: {}", msg),
            RuntimeError::Fatal(msg) => write!(f, "fatal: {}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<BusError> for RuntimeError {
    fn from(e: BusError) -> Self {
        RuntimeError::Bus(e)
    }
}

impl From<ConcurrencyError> for RuntimeError {
    fn from(e: ConcurrencyError) -> Self {
        RuntimeError::Concurrency(e)
    }
}

impl From<LifecycleError> for RuntimeError {
    fn from(e: LifecycleError) -> Self {
        RuntimeError::Lifecycle(e)
    }
}

impl From<ToolError> for RuntimeError {
    fn from(e: ToolError) -> Self {
        RuntimeError::Tool(e)
    }
}

impl From<OrgError> for RuntimeError {
    fn from(e: OrgError) -> Self {
        match e {
            OrgError::RoleNotFound(id) => RuntimeError::RoleNotFound(id),
            OrgError::RoleNameTaken(name) => RuntimeError::Persistence(format!("role name already in use: {}", name)),
            OrgError::AgentNotFound(id) => RuntimeError::AgentNotFound(id),
        }
    }
}
