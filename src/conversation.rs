//! **C4** — per-agent conversation history and token accounting.
//!
//! Each agent owns exactly one conversation: an ordered list of
//! [`ChatMessage`]s plus a running [`TokenUsage`] total reported by the LLM
//! client on every reply. `usage_percent` drives the warning/critical/hard-limit
//! thresholds in [`crate::config::ContextLimitConfig`]; crossing hard-limit is
//! what makes [`crate::llm_handler::LlmHandler`] refuse further calls with
//! `context_limit_exceeded`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::client::{ChatMessage, Role, TokenUsage, ToolCall};
use crate::config::ContextLimitConfig;

/// Where a conversation's usage currently sits relative to its configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageBand {
    Normal,
    Warning,
    Critical,
    HardLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMessage {
    role: String,
    content: String,
    tool_call_id: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ConversationRecord {
    messages: Vec<StoredMessage>,
    prompt_tokens: usize,
    completion_tokens: usize,
}

fn role_to_str(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn str_to_role(s: &str) -> Role {
    match s {
        "system" => Role::System,
        "user" => Role::User,
        "tool" => Role::Tool,
        _ => Role::Assistant,
    }
}

/// **C4**. One instance per runtime, keyed by agent id; each agent's history is
/// persisted as its own `conversations/<agent_id>.json` file.
pub struct ConversationStore {
    conversations: RwLock<HashMap<String, ConversationRecord>>,
    limits: ContextLimitConfig,
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(runtime_dir: impl AsRef<Path>, limits: ContextLimitConfig) -> Self {
        ConversationStore {
            conversations: RwLock::new(HashMap::new()),
            limits,
            dir: runtime_dir.as_ref().join("conversations"),
        }
    }

    fn path_for(&self, agent_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", agent_id))
    }

    pub async fn load_if_exists(&self, agent_id: &str) -> Result<(), std::io::Error> {
        let path = self.path_for(agent_id);
        if !path.exists() {
            return Ok(());
        }
        let data = fs::read_to_string(&path)?;
        let record: ConversationRecord = serde_json::from_str(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.conversations
            .write()
            .await
            .insert(agent_id.to_string(), record);
        Ok(())
    }

    pub async fn persist(&self, agent_id: &str) -> Result<(), std::io::Error> {
        let conversations = self.conversations.read().await;
        let record = match conversations.get(agent_id) {
            Some(r) => r,
            None => return Ok(()),
        };
        fs::create_dir_all(&self.dir)?;
        let data = serde_json::to_string_pretty(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(self.path_for(agent_id), data)
    }

    /// Appends a message with no accompanying usage, e.g. the system prompt or
    /// an inbound user/tool message that didn't come from an LLM reply.
    pub async fn append(&self, agent_id: &str, message: &ChatMessage) {
        let mut conversations = self.conversations.write().await;
        let record = conversations.entry(agent_id.to_string()).or_default();
        record.messages.push(StoredMessage {
            role: role_to_str(&message.role).to_string(),
            content: message.content.clone(),
            tool_call_id: message.tool_call_id.clone(),
            tool_calls: message.tool_calls.clone(),
        });
    }

    /// Removes the last message if it is an assistant turn that requested
    /// tool calls (§4.8 "interruption protocol" / testable property 8).
    pub async fn drop_trailing_tool_call_turn(&self, agent_id: &str) {
        let mut conversations = self.conversations.write().await;
        if let Some(record) = conversations.get_mut(agent_id) {
            if matches!(record.messages.last(), Some(m) if m.role == "assistant" && !m.tool_calls.is_empty()) {
                record.messages.pop();
            }
        }
    }

    /// Appends an assistant reply and folds its [`TokenUsage`] into the running total.
    pub async fn append_with_usage(&self, agent_id: &str, message: &ChatMessage, usage: &TokenUsage) {
        self.append(agent_id, message).await;
        let mut conversations = self.conversations.write().await;
        let record = conversations.entry(agent_id.to_string()).or_default();
        record.prompt_tokens += usage.prompt_tokens;
        record.completion_tokens += usage.completion_tokens;
    }

    pub async fn messages(&self, agent_id: &str) -> Vec<ChatMessage> {
        self.conversations
            .read()
            .await
            .get(agent_id)
            .map(|record| {
                record
                    .messages
                    .iter()
                    .map(|m| ChatMessage {
                        role: str_to_role(&m.role),
                        content: m.content.clone(),
                        tool_call_id: m.tool_call_id.clone(),
                        tool_calls: m.tool_calls.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn message_count(&self, agent_id: &str) -> usize {
        self.conversations
            .read()
            .await
            .get(agent_id)
            .map(|r| r.messages.len())
            .unwrap_or(0)
    }

    pub async fn total_tokens(&self, agent_id: &str) -> usize {
        self.conversations
            .read()
            .await
            .get(agent_id)
            .map(|r| r.prompt_tokens + r.completion_tokens)
            .unwrap_or(0)
    }

    pub async fn usage_percent(&self, agent_id: &str) -> f64 {
        let total = self.total_tokens(agent_id).await;
        total as f64 / self.limits.max_tokens as f64
    }

    pub async fn usage_band(&self, agent_id: &str) -> UsageBand {
        let pct = self.usage_percent(agent_id).await;
        if pct >= self.limits.hard_limit_threshold {
            UsageBand::HardLimit
        } else if pct >= self.limits.critical_threshold {
            UsageBand::Critical
        } else if pct >= self.limits.warning_threshold {
            UsageBand::Warning
        } else {
            UsageBand::Normal
        }
    }

    pub async fn is_context_exceeded(&self, agent_id: &str) -> bool {
        self.usage_band(agent_id).await == UsageBand::HardLimit
    }

    /// Drops every message except the system prompt (message 0, if present)
    /// and the most recent `keep_last` turns, replacing the gap with a single
    /// synthetic system note. Token totals are left untouched — they reflect
    /// tokens actually spent, not history currently held in memory.
    pub async fn compress(&self, agent_id: &str, keep_last: usize) {
        let mut conversations = self.conversations.write().await;
        let record = match conversations.get_mut(agent_id) {
            Some(r) => r,
            None => return,
        };
        if record.messages.len() <= keep_last + 1 {
            return;
        }
        let system = record
            .messages
            .first()
            .filter(|m| m.role == "system")
            .cloned();
        let tail_start = record.messages.len().saturating_sub(keep_last);
        let tail = record.messages[tail_start..].to_vec();
        let mut compressed = Vec::new();
        if let Some(system) = system {
            compressed.push(system);
        }
        compressed.push(StoredMessage {
            role: "system".to_string(),
            content: "(earlier conversation history compressed)".to_string(),
            tool_call_id: None,
            tool_calls: vec![],
        });
        compressed.extend(tail);
        record.messages = compressed;
    }

    pub async fn remove(&self, agent_id: &str) {
        self.conversations.write().await.remove(agent_id);
        let _ = fs::remove_file(self.path_for(agent_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::new(
            tempfile::tempdir().unwrap().into_path(),
            ContextLimitConfig {
                max_tokens: 100,
                warning_threshold: 0.5,
                critical_threshold: 0.8,
                hard_limit_threshold: 0.9,
            },
        )
    }

    #[tokio::test]
    async fn usage_band_crosses_thresholds() {
        let store = store();
        store
            .append_with_usage(
                "a",
                &ChatMessage::assistant("hi"),
                &TokenUsage {
                    prompt_tokens: 40,
                    completion_tokens: 10,
                    total_tokens: 50,
                },
            )
            .await;
        assert_eq!(store.usage_band("a").await, UsageBand::Warning);

        store
            .append_with_usage(
                "a",
                &ChatMessage::assistant("more"),
                &TokenUsage {
                    prompt_tokens: 40,
                    completion_tokens: 5,
                    total_tokens: 45,
                },
            )
            .await;
        assert!(store.is_context_exceeded("a").await);
    }

    #[tokio::test]
    async fn tool_calls_survive_append_and_reload() {
        let store = store();
        let assistant_turn = ChatMessage {
            role: Role::Assistant,
            content: String::new(),
            tool_call_id: None,
            tool_calls: vec![ToolCall {
                id: "call-1".to_string(),
                name: "read_file".to_string(),
                arguments: "{\"path\":\"notes.md\"}".to_string(),
            }],
        };
        store.append("a", &assistant_turn).await;
        store.append("a", &ChatMessage::tool_result("call-1", "contents")).await;

        let messages = store.messages("a").await;
        assert_eq!(messages[0].tool_calls.len(), 1);
        assert_eq!(messages[0].tool_calls[0].id, "call-1");
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("call-1"));
    }

    #[tokio::test]
    async fn drop_trailing_tool_call_turn_only_drops_pending_calls() {
        let store = store();
        store.append("a", &ChatMessage::user("do something")).await;
        let assistant_turn = ChatMessage {
            role: Role::Assistant,
            content: String::new(),
            tool_call_id: None,
            tool_calls: vec![ToolCall {
                id: "call-1".to_string(),
                name: "read_file".to_string(),
                arguments: "{}".to_string(),
            }],
        };
        store.append("a", &assistant_turn).await;
        store.drop_trailing_tool_call_turn("a").await;
        let messages = store.messages("a").await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "do something");
    }

    #[tokio::test]
    async fn compress_keeps_system_prompt_and_tail() {
        let store = store();
        store.append("a", &ChatMessage::system("you are an agent")).await;
        for i in 0..10 {
            store.append("a", &ChatMessage::user(format!("turn {}", i))).await;
        }
        store.compress("a", 2).await;
        let messages = store.messages("a").await;
        assert_eq!(messages[0].content, "you are an agent");
        assert_eq!(messages.last().unwrap().content, "turn 9");
        assert!(messages.len() < 11);
    }
}
