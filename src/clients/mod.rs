//! Reference [`crate::client::LlmClient`] implementations.
//!
//! This crate ships exactly one: [`mock::MockLlmClient`], a deterministic
//! scripted client used by the test harness and by applications bootstrapping
//! against the runtime before wiring a real provider. Real wire-format clients
//! are explicitly out of scope (see [`crate::client`]).

pub mod mock;
