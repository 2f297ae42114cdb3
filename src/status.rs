//! The per-agent compute-status type shared between [`crate::bus::MessageBus`]
//! (which needs to know whether to reject/interrupt a send) and
//! [`crate::lifecycle::AgentLifecycle`] (which owns the transitions).
//!
//! Kept in its own module so neither of those two depends on the other just to
//! share this enum — `bus` reads it, `lifecycle` writes it, both through a
//! jointly-held [`StatusTable`].

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The per-agent finite state controlling whether new messages are accepted
/// and whether in-flight LLM calls may be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeStatus {
    Idle,
    WaitingLlm,
    Processing,
    Stopping,
    Stopped,
    Terminating,
}

impl ComputeStatus {
    /// `true` for the three states in which the bus rejects inbound sends (§4.1, §4.6).
    pub fn rejects_sends(self) -> bool {
        matches!(
            self,
            ComputeStatus::Stopping | ComputeStatus::Stopped | ComputeStatus::Terminating
        )
    }

    /// `true` for the two states in which an arriving immediate message is an
    /// interruption rather than an ordinary queued message (§4.1).
    pub fn is_mid_turn(self) -> bool {
        matches!(self, ComputeStatus::WaitingLlm | ComputeStatus::Processing)
    }
}

/// The shared status map. Agents not present are treated as freshly spawned /
/// `Idle` by convention; [`crate::lifecycle::AgentLifecycle::spawn`] inserts an
/// explicit `Idle` entry, so absence in practice only happens for unknown ids.
pub type StatusTable = Arc<RwLock<HashMap<String, ComputeStatus>>>;

pub fn new_status_table() -> StatusTable {
    Arc::new(RwLock::new(HashMap::new()))
}
