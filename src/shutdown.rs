//! **C10** — cooperative two-phase shutdown (§4.10).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bus::MessageBus;
use crate::conversation::ConversationStore;
use crate::event::{EventHandler, RuntimeEvent};
use crate::org::OrgState;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone)]
pub struct ShutdownSummary {
    pub pending_messages: usize,
    pub active_agents: usize,
    pub timed_out: bool,
    pub duration: Duration,
}

/// **C10**. Shares `stop_requested` with [`crate::scheduler::Scheduler`] so a
/// single flag gates both "stop accepting new dispatch" and "the scheduler
/// loop should exit once drained."
pub struct ShutdownManager {
    stop_requested: Arc<AtomicBool>,
    force_exit_requested: AtomicBool,
    bus: Arc<MessageBus>,
    org: Arc<OrgState>,
    conversation: Arc<ConversationStore>,
    events: Arc<dyn EventHandler>,
    timeout: Duration,
}

impl ShutdownManager {
    pub fn new(
        stop_requested: Arc<AtomicBool>,
        bus: Arc<MessageBus>,
        org: Arc<OrgState>,
        conversation: Arc<ConversationStore>,
        events: Arc<dyn EventHandler>,
        timeout_ms: u64,
    ) -> Self {
        ShutdownManager {
            stop_requested,
            force_exit_requested: AtomicBool::new(false),
            bus,
            org,
            conversation,
            events,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Phase 1: request a stop. A second call while already requested forces
    /// immediate exit on the caller's next [`ShutdownManager::drain`] poll.
    pub async fn request(&self) -> bool {
        let already = self.stop_requested.swap(true, Ordering::SeqCst);
        if already {
            self.force_exit_requested.store(true, Ordering::SeqCst);
        }
        self.events.on_event(&RuntimeEvent::ShutdownRequested).await;
        already
    }

    /// Phase 2: wait for `scheduler`'s active-processing set and the bus to
    /// drain (up to `shutdown_timeout_ms`), then persist every conversation
    /// and org state, force-deliver remaining delayed messages, and return a
    /// summary.
    pub async fn drain(&self, scheduler: &Scheduler, agent_ids: &[String]) -> ShutdownSummary {
        let start = Instant::now();
        let mut timed_out = false;

        while scheduler.active_count().await > 0 || self.bus.has_pending().await {
            if self.force_exit_requested.load(Ordering::SeqCst) {
                break;
            }
            if start.elapsed() >= self.timeout {
                timed_out = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        for agent_id in agent_ids {
            self.conversation.persist(agent_id).await.ok();
        }
        self.org.persist().await.ok();

        let force_delivered = self.bus.force_deliver_all_delayed().await;
        let pending_messages = self.bus.pending_count().await;
        let summary = ShutdownSummary {
            pending_messages,
            active_agents: scheduler.active_count().await,
            timed_out,
            duration: start.elapsed(),
        };

        log::info!(
            "shutdown complete: pending_messages={} active_agents={} timed_out={} duration={:?} force_delivered={}",
            summary.pending_messages,
            summary.active_agents,
            summary.timed_out,
            summary.duration,
            force_delivered,
        );

        self.events
            .on_event(&RuntimeEvent::ShutdownCompleted {
                pending_messages: summary.pending_messages,
                active_agents: summary.active_agents,
                timed_out: summary.timed_out,
            })
            .await;

        summary
    }
}
