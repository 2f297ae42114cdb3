//! A deterministic, scripted [`LlmClient`] used throughout the test harness.
//!
//! Mirrors the role `MockProtocol`/`TestProtocol` play in the reference
//! codebase's tool-protocol test module: a hand-wound stand-in for a real
//! network client so that scheduler, handler, and concurrency tests stay fast
//! and deterministic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{
    CancelSignal, ChatMessage, ChatReply, LlmClient, LlmError, Role, TokenUsage, ToolCall,
    ToolDefinition,
};

/// One scripted outcome for a [`MockLlmClient`] call.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Respond with plain text content and no tool calls.
    Text(String),
    /// Respond with a tool call; `arguments` is the raw JSON-encoded string
    /// the handler will attempt to parse.
    ToolCall {
        name: String,
        arguments: String,
    },
    /// Fail the call as if retries had been exhausted.
    Fail(String),
}

/// A scripted, in-memory [`LlmClient`].
///
/// Replies are consumed in order from an internal queue; once exhausted, every
/// further call returns a fixed fallback text reply so long-running handler
/// loops terminate instead of panicking. An optional artificial delay and an
/// optional shared [`CancelSignal`] let tests exercise the concurrency
/// controller's queueing and cancellation paths.
pub struct MockLlmClient {
    script: Mutex<Vec<ScriptedReply>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl MockLlmClient {
    pub fn new(script: Vec<ScriptedReply>) -> Self {
        MockLlmClient {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(0),
        }
    }

    /// Convenience constructor: a single plain-text reply.
    pub fn with_text_reply(text: impl Into<String>) -> Self {
        Self::new(vec![ScriptedReply::Text(text.into())])
    }

    /// Simulate network latency; useful for concurrency-cap tests (S7) where
    /// overlapping in-flight calls must be observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
        cancel: Option<CancelSignal>,
    ) -> Result<ChatReply, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            if let Some(cancel) = &cancel {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    _ = cancel.cancelled() => return Err(LlmError::Aborted),
                }
            } else {
                tokio::time::sleep(self.delay).await;
            }
        }
        if let Some(cancel) = &cancel {
            if cancel.is_cancelled() {
                return Err(LlmError::Aborted);
            }
        }

        let next = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                None
            } else {
                Some(script.remove(0))
            }
        };

        let reply = match next {
            Some(ScriptedReply::Text(text)) => ChatMessage {
                role: Role::Assistant,
                content: text,
                tool_call_id: None,
                tool_calls: vec![],
            },
            Some(ScriptedReply::ToolCall { name, arguments }) => ChatMessage {
                role: Role::Assistant,
                content: String::new(),
                tool_call_id: None,
                tool_calls: vec![ToolCall {
                    id: format!("call_{}", self.calls.load(Ordering::SeqCst)),
                    name,
                    arguments,
                }],
            },
            Some(ScriptedReply::Fail(msg)) => return Err(LlmError::Failed(msg)),
            None => ChatMessage {
                role: Role::Assistant,
                content: "(mock: script exhausted)".to_string(),
                tool_call_id: None,
                tool_calls: vec![],
            },
        };

        Ok(ChatReply {
            message: reply,
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 10,
                total_tokens: 20,
            },
        })
    }

    fn model_name(&self) -> &str {
        "mock-llm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_are_consumed_in_order() {
        let client = MockLlmClient::new(vec![
            ScriptedReply::Text("first".into()),
            ScriptedReply::Text("second".into()),
        ]);
        let r1 = client.chat(&[], &[], None).await.unwrap();
        let r2 = client.chat(&[], &[], None).await.unwrap();
        assert_eq!(r1.message.content, "first");
        assert_eq!(r2.message.content, "second");
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_a_delayed_call() {
        let client = MockLlmClient::new(vec![ScriptedReply::Text("too late".into())])
            .with_delay(Duration::from_secs(5));
        let cancel = CancelSignal::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel2.cancel();
        });
        let result = client.chat(&[], &[], Some(cancel)).await;
        assert!(matches!(result, Err(LlmError::Aborted)));
    }
}
