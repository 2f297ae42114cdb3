//! The LLM client contract.
//!
//! The runtime consumes a remote LLM exclusively through [`LlmClient`]: a
//! narrow `chat(messages, tools, cancel) -> message` trait object. Concrete
//! provider wire protocols (OpenAI, Claude, Gemini, ...) are explicitly out of
//! scope for this crate — they sit behind this same trait in applications that
//! embed the runtime. The only implementation shipped here is
//! [`crate::clients::mock::MockLlmClient`], a deterministic test double.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentmesh::client::{LlmClient, ChatMessage, Role};
//!
//! # async fn run(client: Arc<dyn LlmClient>) -> Result<(), Box<dyn std::error::Error>> {
//! let messages = vec![ChatMessage {
//!     role: Role::User,
//!     content: "Who are you?".into(),
//!     tool_call_id: None,
//!     tool_calls: vec![],
//! }];
//! let reply = client.chat(&messages, &[], None).await?;
//! println!("{}", reply.content);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Notify;

/// The role of a single turn in a conversation, mirroring the OpenAI
/// chat-completion shape named in the LLM client contract.
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    System,
    User,
    Assistant,
    /// A tool-result turn. `tool_call_id` on the [`ChatMessage`] correlates it
    /// back to the assistant's originating call.
    Tool,
}

/// A single native tool call requested by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back on the follow-up `Role::Tool` message.
    pub id: String,
    /// Name of the tool being invoked; must match one of the [`ToolDefinition`]s sent.
    pub name: String,
    /// Raw JSON-encoded arguments string, exactly as returned by the provider
    /// (parsing/validation happens in [`crate::tools`]).
    pub arguments: String,
}

/// One turn in a conversation sent to / received from the LLM.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set only on `Role::Tool` messages; correlates to the originating [`ToolCall::id`].
    pub tool_call_id: Option<String>,
    /// Set only on assistant messages that requested tool calls.
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: vec![],
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: vec![],
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: vec![],
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_calls: vec![],
        }
    }
}

/// Tool schema handed to the LLM, derived from [`crate::tools::ToolDescriptor`]
/// after capability gating has been applied.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Token accounting returned by the provider on every reply.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Cooperative cancellation signal passed to [`LlmClient::chat`].
///
/// Cloning shares the same underlying notification; [`CancelSignal::cancel`]
/// is idempotent and wakes every clone's [`CancelSignal::cancelled`] waiter.
#[derive(Clone)]
pub struct CancelSignal {
    notify: Arc<Notify>,
    flag: Arc<std::sync::atomic::AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        CancelSignal {
            notify: Arc::new(Notify::new()),
            flag: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Idempotent: a second call is a no-op.
    pub fn cancel(&self) {
        if !self.flag.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Resolves once [`CancelSignal::cancel`] has been called. Resolves
    /// immediately if it already was.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// The assistant's reply to a [`LlmClient::chat`] call.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub message: ChatMessage,
    pub usage: TokenUsage,
}

/// Error raised by an [`LlmClient`] implementation.
#[derive(Debug, Clone)]
pub enum LlmError {
    /// The call was cancelled via the supplied [`CancelSignal`]; this is not
    /// treated as an error by [`crate::llm_handler::LlmHandler`] — no parent
    /// escalation occurs, only a local abort diagnostic.
    Aborted,
    /// The call failed after the client's own internal retry policy was exhausted.
    Failed(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::Aborted => write!(f, "llm_call_aborted"),
            LlmError::Failed(msg) => write!(f, "llm_call_failed: {}", msg),
        }
    }
}

impl Error for LlmError {}

/// The narrow external contract the runtime uses to reach a remote LLM.
///
/// Implementations are expected to encapsulate their own retry policy;
/// [`crate::llm_handler::LlmHandler`] treats a returned `Err` as final and
/// escalates to the parent agent. Cancellation is cooperative: implementations
/// should race their own request against [`CancelSignal::cancelled`] and return
/// [`LlmError::Aborted`] if it resolves first.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        cancel: Option<CancelSignal>,
    ) -> Result<ChatReply, LlmError>;

    /// Identifier of the upstream model, surfaced for logging/observability only.
    fn model_name(&self) -> &str {
        "unknown"
    }
}
