//! A concurrent multi-agent orchestration runtime: a per-recipient message
//! bus, a scheduler enforcing global concurrency and per-agent serialization,
//! an LLM concurrency controller, and a bounded tool-calling loop, for
//! populations of cooperating agents organized as a parent/child tree rooted
//! at two reserved identities, `root` and `user`.
//!
//! Construct a [`runtime::Runtime`] via [`runtime::Runtime::builder`], register
//! an [`client::LlmClient`] per LLM service id, spawn [`runtime::Runtime::run`]
//! as a background task, and drive the population through
//! [`runtime::Runtime::send_to_root`] or [`tools::ToolExecutor`]-mediated
//! `spawn_agent`/`send_message` calls.

pub mod bus;
pub mod client;
pub mod clients;
pub mod concurrency;
pub mod config;
pub mod contacts;
pub mod conversation;
pub mod envelope;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod llm_handler;
pub mod org;
pub mod runtime;
pub mod scheduler;
pub mod shutdown;
pub mod status;
pub mod store;
pub mod tools;

pub use error::RuntimeError;
pub use runtime::Runtime;
