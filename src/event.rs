//! Runtime observability layer.
//!
//! Provides a callback-based observer for the scheduler, lifecycle, bus, and
//! tool-calling loop. Implement [`EventHandler`] to receive real-time
//! notifications; both of its methods default to no-ops, so callers only
//! override what they care about. The handler is shared as `Arc<dyn
//! EventHandler>` across the [`crate::runtime::Runtime`] and all of its
//! components.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentmesh::event::{EventHandler, RuntimeEvent};
//! use async_trait::async_trait;
//!
//! struct Logger;
//!
//! #[async_trait]
//! impl EventHandler for Logger {
//!     async fn on_event(&self, event: &RuntimeEvent) {
//!         match event {
//!             RuntimeEvent::AgentDispatched { agent_id, .. } => {
//!                 println!("dispatching {}", agent_id);
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::client::TokenUsage;
use crate::status::ComputeStatus;

/// Every event the runtime can emit.
///
/// Each variant carries enough identifiers (`agent_id`, occasionally `task_id`)
/// for a handler to correlate events without tracking hidden state.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A new agent was created by [`crate::lifecycle::AgentLifecycle::spawn`].
    AgentSpawned {
        agent_id: String,
        role_id: String,
        parent_agent_id: String,
    },
    /// An agent's [`ComputeStatus`] transitioned.
    AgentStatusChanged {
        agent_id: String,
        from: ComputeStatus,
        to: ComputeStatus,
    },
    /// An agent (and, for cascading terminations, its descendants) was removed.
    AgentTerminated {
        agent_id: String,
        terminated_by: String,
        reason: Option<String>,
    },
    /// The scheduler has been idle for `idle_warning_ms` without activity for this agent.
    AgentIdleWarning { agent_id: String, idle_ms: u64 },

    /// The bus accepted a message and queued it for immediate delivery.
    MessageQueued {
        message_id: String,
        from: String,
        to: String,
    },
    /// The bus rejected a send because the recipient is stopping/stopped/terminating.
    MessageRejected {
        from: String,
        to: String,
        reason: String,
    },
    /// A message arrived for an agent that is mid-turn; it was routed to the
    /// agent's interruption queue instead of its main queue.
    InterruptionDelivered { agent_id: String, message_id: String },

    /// The scheduler picked an agent and launched a detached handler task.
    AgentDispatched { agent_id: String, message_id: String },
    /// A dispatched handler completed (successfully or with a caught failure).
    AgentHandlerCompleted { agent_id: String, ok: bool },

    /// `ConcurrencyController::execute` accepted and is about to run a request.
    LlmRequestAdmitted { agent_id: String, queue_depth: usize },
    /// `ConcurrencyController::execute` queued a request because the global cap was reached.
    LlmRequestQueued { agent_id: String, queue_depth: usize },
    /// An in-flight or queued LLM request was cancelled via `Cancel`.
    LlmRequestCancelled { agent_id: String },
    /// An LLM call completed successfully.
    LlmCallCompleted {
        agent_id: String,
        iteration: usize,
        usage: Option<TokenUsage>,
    },
    /// An LLM call failed after exhausting retries.
    LlmCallFailed { agent_id: String, message: String },

    /// A tool call was parsed from an assistant reply and is about to execute.
    ToolCallStarted {
        agent_id: String,
        tool_name: String,
        iteration: usize,
    },
    /// A tool call finished (success or structured failure).
    ToolCallCompleted {
        agent_id: String,
        tool_name: String,
        success: bool,
        error: Option<String>,
    },

    /// A handler's conversation crossed the warning/critical/hard-limit usage threshold.
    ContextThresholdCrossed { agent_id: String, usage_percent: f64 },

    /// Graceful shutdown was requested.
    ShutdownRequested,
    /// Graceful shutdown finished draining; carries the same summary that is logged.
    ShutdownCompleted {
        pending_messages: usize,
        active_agents: usize,
        timed_out: bool,
    },
}

/// Trait for receiving runtime events.
///
/// The default implementation is a no-op; override [`on_event`](EventHandler::on_event)
/// to observe any subset of [`RuntimeEvent`] variants. Implementors must be
/// `Send + Sync` since the handler is shared across tokio tasks via `Arc`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called for every event emitted by the runtime. Default: no-op.
    async fn on_event(&self, _event: &RuntimeEvent) {}
}

/// An [`EventHandler`] that emits nothing; the default handler when the
/// application does not register one.
pub struct NoopEventHandler;

#[async_trait]
impl EventHandler for NoopEventHandler {}

/// An [`EventHandler`] that logs every event via the `log` facade at `debug` level.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn on_event(&self, event: &RuntimeEvent) {
        log::debug!("runtime event: {:?}", event);
    }
}
