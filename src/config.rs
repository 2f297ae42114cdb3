//! Runtime configuration.
//!
//! A plain struct with a [`Default`] impl: every tunable is a field
//! constructed in code, not parsed from an external file format.

use std::path::PathBuf;

/// Token-accounting thresholds used by [`crate::conversation::ConversationStore`].
#[derive(Debug, Clone)]
pub struct ContextLimitConfig {
    /// Hard cap on total tokens (prompt + completion) per conversation.
    pub max_tokens: usize,
    /// Fraction of `max_tokens` at which a context-status advisory is appended (default 0.70).
    pub warning_threshold: f64,
    /// Fraction of `max_tokens` considered critical (default 0.85). Informational only.
    pub critical_threshold: f64,
    /// Fraction of `max_tokens` at which [`crate::conversation::ConversationStore::is_context_exceeded`]
    /// returns `true` and the handler refuses further LLM calls (default 0.95).
    pub hard_limit_threshold: f64,
}

impl Default for ContextLimitConfig {
    fn default() -> Self {
        ContextLimitConfig {
            max_tokens: 128_000,
            warning_threshold: 0.70,
            critical_threshold: 0.85,
            hard_limit_threshold: 0.95,
        }
    }
}

/// Tunables for the LLM concurrency controller and retry policy.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Maximum retries before a call is escalated as `llm_call_failed` (default 3).
    pub max_retries: u32,
    /// Global cap on simultaneous in-flight LLM calls (default 4).
    pub max_concurrent_requests: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            max_retries: 3,
            max_concurrent_requests: 4,
        }
    }
}

/// Top-level runtime configuration, covering every tunable the runtime
/// exposes for scheduling, concurrency, context limits, and shutdown.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Safety cap on scheduler main-loop iterations; `0` means unbounded (default 200).
    pub max_steps: usize,
    /// Cap on tool-calling rounds within a single `LlmHandler::handle` turn (default 200).
    pub max_tool_rounds: usize,
    /// Soft cap on conversation length before compression is advised (default 500).
    pub max_context_messages: usize,
    /// Token-accounting thresholds.
    pub context_limit: ContextLimitConfig,
    /// Idle-warning threshold per agent, in milliseconds (default 300_000 / 5 minutes).
    pub idle_warning_ms: u64,
    /// Drain deadline for graceful shutdown, in milliseconds (default 30_000).
    pub shutdown_timeout_ms: u64,
    /// LLM retry/concurrency tunables.
    pub llm: LlmConfig,
    /// Base directory for persistence: `org.json`, `conversations/`, `workspaces/`, `artifacts/`.
    pub runtime_dir: PathBuf,
    /// Enables the step-5g "looks like a tool-intent description" re-prompt heuristic.
    /// Default-off: the exact pattern set is inherently fuzzy and language-specific
    /// (see the Open Questions section of the design notes).
    pub enable_tool_intent_heuristic: bool,
    /// `log`/`env_logger` filter string honored when `RUST_LOG` is unset (default `"info"`).
    pub log_level: String,
    /// Enabled optional tool modules, by [`crate::tools::ToolGroup`] name. Empty
    /// means every built-in tool module is available (subject to per-role
    /// `tool_groups` gating in [`crate::tools::ToolExecutor::is_tool_available`]).
    pub enabled_tool_modules: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_steps: 200,
            max_tool_rounds: 200,
            max_context_messages: 500,
            context_limit: ContextLimitConfig::default(),
            idle_warning_ms: 300_000,
            shutdown_timeout_ms: 30_000,
            llm: LlmConfig::default(),
            runtime_dir: PathBuf::from("./agentmesh-runtime"),
            enable_tool_intent_heuristic: false,
            log_level: "info".to_string(),
            enabled_tool_modules: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Start from defaults and override the runtime directory — the most common
    /// single override in tests and examples.
    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = dir.into();
        self
    }

    /// Convenience builder for `max_tool_rounds`.
    pub fn with_max_tool_rounds(mut self, n: usize) -> Self {
        self.max_tool_rounds = n;
        self
    }

    /// Convenience builder for the LLM concurrency cap.
    pub fn with_max_concurrent_requests(mut self, n: usize) -> Self {
        self.llm.max_concurrent_requests = n;
        self
    }
}
