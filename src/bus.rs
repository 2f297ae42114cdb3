//! **C1** — the per-recipient message bus.
//!
//! Owns an immediate FIFO queue and a delayed queue per recipient, plus a
//! separate per-recipient interruption queue fed whenever an immediate message
//! arrives for an agent that is mid-turn. All queue mutations go through a
//! single internal lock, so `send` and `receive_next` never interleave partial
//! state, matching the concurrency model in the design notes.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};

use crate::envelope::{new_message_id, Envelope, Send};
use crate::status::StatusTable;

/// Errors the bus can report. `Rejected` is not really an error from the
/// caller's point of view — producers are expected to inspect
/// [`SendOutcome::rejected`] — but modeling it here keeps `send_message` (the
/// tool-facing entry point in [`crate::tools`]) able to use `?`.
#[derive(Debug, Clone)]
pub enum BusError {
    Rejected { reason: String },
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Rejected { reason } => write!(f, "{}", reason),
        }
    }
}

impl std::error::Error for BusError {}

/// Result of [`MessageBus::send`].
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message_id: String,
    pub scheduled_delivery_time: Option<i64>,
    pub rejected: bool,
    pub reason: Option<String>,
}

impl SendOutcome {
    fn accepted(message_id: String, scheduled_delivery_time: Option<i64>) -> Self {
        SendOutcome {
            message_id,
            scheduled_delivery_time,
            rejected: false,
            reason: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        SendOutcome {
            message_id: String::new(),
            scheduled_delivery_time: None,
            rejected: true,
            reason: Some(reason.into()),
        }
    }
}

struct DelayedEntry {
    deliver_at: i64,
    enqueue_index: u64,
    envelope: Envelope,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deliver_at == other.deliver_at && self.enqueue_index == other.enqueue_index
    }
}
impl Eq for DelayedEntry {}

impl Ord for DelayedEntry {
    // Reversed so `BinaryHeap` (a max-heap) pops the *smallest* (deliver_at, enqueue_index).
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deliver_at
            .cmp(&self.deliver_at)
            .then_with(|| other.enqueue_index.cmp(&self.enqueue_index))
    }
}
impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Receives a fire-and-forget notification whenever the bus routes an
/// immediate message into an agent's interruption queue. Registered via
/// [`MessageBus::on_interruption`]; invoked from a detached task so it can
/// never block `send`.
#[async_trait]
pub trait InterruptionHandler: Send + Sync {
    async fn on_interruption(&self, agent_id: &str, envelope: &Envelope);
}

#[derive(Default)]
struct BusState {
    immediate: HashMap<String, VecDeque<Envelope>>,
    delayed: BinaryHeap<DelayedEntry>,
    interruptions: HashMap<String, VecDeque<Envelope>>,
}

impl BusState {
    fn immediate_queue(&mut self, agent_id: &str) -> &mut VecDeque<Envelope> {
        self.immediate.entry(agent_id.to_string()).or_default()
    }

    fn interruption_queue(&mut self, agent_id: &str) -> &mut VecDeque<Envelope> {
        self.interruptions.entry(agent_id.to_string()).or_default()
    }
}

/// **C1**. See the module docs and §4.1 of the design for the full contract.
pub struct MessageBus {
    state: Mutex<BusState>,
    status: StatusTable,
    waiters: Notify,
    enqueue_counter: AtomicU64,
    interruption_handler: Mutex<Option<Arc<dyn InterruptionHandler>>>,
}

impl MessageBus {
    pub fn new(status: StatusTable) -> Self {
        MessageBus {
            state: Mutex::new(BusState::default()),
            status,
            waiters: Notify::new(),
            enqueue_counter: AtomicU64::new(0),
            interruption_handler: Mutex::new(None),
        }
    }

    /// Registers the scheduler's interruption callback. Only one handler may
    /// be registered at a time; a later call replaces the former.
    pub async fn on_interruption(&self, handler: Arc<dyn InterruptionHandler>) {
        *self.interruption_handler.lock().await = Some(handler);
    }

    /// `Send(msg) → {messageId, scheduledDeliveryTime?, rejected?, reason?}`.
    ///
    /// `delay_ms` is coerced: non-positive becomes immediate. If the recipient
    /// is `stopping`/`stopped`/`terminating`, the message is rejected outright.
    /// If it is `waiting_llm`/`processing`, an immediate message is routed to
    /// the agent's interruption queue instead of its main queue, and the
    /// registered [`InterruptionHandler`] is notified asynchronously.
    pub async fn send(&self, req: Send) -> SendOutcome {
        let status = self.status.read().await.get(&req.to).copied();
        if let Some(status) = status {
            if status.rejects_sends() {
                let reason = match status {
                    crate::status::ComputeStatus::Stopping => "agent_stopping",
                    crate::status::ComputeStatus::Stopped => "agent_stopped",
                    crate::status::ComputeStatus::Terminating => "agent_terminating",
                    _ => unreachable!(),
                };
                return SendOutcome::rejected(reason);
            }
        }

        let delay_ms = if req.delay_ms < 0 { 0 } else { req.delay_ms };
        let id = new_message_id();

        if delay_ms > 0 {
            let deliver_at = Utc::now().timestamp_millis() + delay_ms;
            let envelope = req.into_envelope(id.clone(), Some(deliver_at));
            let index = self.enqueue_counter.fetch_add(1, Ordering::SeqCst);
            let mut state = self.state.lock().await;
            state.delayed.push(DelayedEntry {
                deliver_at,
                enqueue_index: index,
                envelope,
            });
            return SendOutcome::accepted(id, Some(deliver_at));
        }

        let is_interruption = status.map(|s| s.is_mid_turn()).unwrap_or(false);
        let envelope = req.into_envelope(id.clone(), None);

        if is_interruption {
            let to = envelope.to.clone();
            let mut state = self.state.lock().await;
            state.interruption_queue(&to).push_back(envelope.clone());
            drop(state);
            if let Some(handler) = self.interruption_handler.lock().await.clone() {
                let envelope = envelope.clone();
                tokio::spawn(async move {
                    handler.on_interruption(&envelope.to, &envelope).await;
                });
            }
        } else {
            let to = envelope.to.clone();
            let mut state = self.state.lock().await;
            state.immediate_queue(&to).push_back(envelope);
            drop(state);
            self.waiters.notify_waiters();
        }

        SendOutcome::accepted(id, None)
    }

    /// `ReceiveNext(agentId) → msg | nil` — FIFO pop from the immediate queue.
    pub async fn receive_next(&self, agent_id: &str) -> Option<Envelope> {
        self.state.lock().await.immediate_queue(agent_id).pop_front()
    }

    /// Drains `agent_id`'s interruption queue, returning its contents in
    /// arrival order. Atomic: a concurrent `send` either lands entirely before
    /// or entirely after this call.
    pub async fn drain_interruptions(&self, agent_id: &str) -> Vec<Envelope> {
        let mut state = self.state.lock().await;
        state.interruption_queue(agent_id).drain(..).collect()
    }

    /// `DeliverDueMessages() → count` — moves every delayed entry with
    /// `deliverAt ≤ now` to its recipient's immediate queue, preserving order.
    pub async fn deliver_due_messages(&self) -> usize {
        let now = Utc::now().timestamp_millis();
        let mut state = self.state.lock().await;
        let mut moved = Vec::new();
        while let Some(top) = state.delayed.peek() {
            if top.deliver_at > now {
                break;
            }
            moved.push(state.delayed.pop().unwrap());
        }
        let count = moved.len();
        for entry in moved {
            state.immediate_queue(&entry.envelope.to).push_back(entry.envelope);
        }
        drop(state);
        if count > 0 {
            self.waiters.notify_waiters();
        }
        count
    }

    /// `ForceDeliverAllDelayed() → count` — flushes all delayed entries
    /// regardless of time; used during shutdown drain.
    pub async fn force_deliver_all_delayed(&self) -> usize {
        let mut state = self.state.lock().await;
        let all: Vec<DelayedEntry> = state.delayed.drain().collect();
        let count = all.len();
        for entry in all {
            state.immediate_queue(&entry.envelope.to).push_back(entry.envelope);
        }
        drop(state);
        if count > 0 {
            self.waiters.notify_waiters();
        }
        count
    }

    /// `WaitForMessage(timeout) → bool` — blocks until any immediate queue
    /// becomes non-empty or `timeout` elapses.
    pub async fn wait_for_message(&self, timeout: Duration) -> bool {
        if self.has_pending().await {
            return true;
        }
        matches!(
            tokio::time::timeout(timeout, self.waiters.notified()).await,
            Ok(())
        )
    }

    /// `true` if any recipient's immediate queue is non-empty.
    pub async fn has_pending(&self) -> bool {
        self.state
            .lock()
            .await
            .immediate
            .values()
            .any(|q| !q.is_empty())
    }

    pub async fn queue_depth(&self, agent_id: &str) -> usize {
        self.state
            .lock()
            .await
            .immediate
            .get(agent_id)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// `DelayedCount(agentId?)` — total delayed entries, or only those
    /// addressed to `agent_id` when given.
    pub async fn delayed_count(&self, agent_id: Option<&str>) -> usize {
        let state = self.state.lock().await;
        match agent_id {
            Some(id) => state.delayed.iter().filter(|e| e.envelope.to == id).count(),
            None => state.delayed.len(),
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.immediate.values().map(|q| q.len()).sum()
    }

    /// `ClearQueue(agentId)` — drops both the immediate and interruption
    /// queues for `agent_id`. Called on transition to `stopping`/`stopped`/
    /// `terminating` (§4.6).
    pub async fn clear_queue(&self, agent_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(q) = state.immediate.get_mut(agent_id) {
            q.clear();
        }
        if let Some(q) = state.interruptions.get_mut(agent_id) {
            q.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Payload;
    use crate::status::{new_status_table, ComputeStatus};

    fn bus() -> MessageBus {
        MessageBus::new(new_status_table())
    }

    #[tokio::test]
    async fn zero_and_absent_delay_are_equivalent() {
        let bus = bus();
        let r1 = bus
            .send(Send::new("user", "a", Payload::text("hi")).with_delay_ms(0))
            .await;
        let r2 = bus.send(Send::new("user", "a", Payload::text("hi"))).await;
        assert!(r1.scheduled_delivery_time.is_none());
        assert!(r2.scheduled_delivery_time.is_none());
        assert_eq!(bus.queue_depth("a").await, 2);
    }

    #[tokio::test]
    async fn negative_delay_is_normalized() {
        let bus = bus();
        let r = bus
            .send(Send::new("user", "a", Payload::text("hi")).with_delay_ms(-5))
            .await;
        assert!(r.scheduled_delivery_time.is_none());
        assert_eq!(bus.queue_depth("a").await, 1);
    }

    #[tokio::test]
    async fn fifo_under_equal_deadlines() {
        let bus = bus();
        for i in 0..5 {
            bus.send(
                Send::new("user", "a", Payload::text(i.to_string())).with_delay_ms(1),
            )
            .await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.deliver_due_messages().await;
        for i in 0..5 {
            let msg = bus.receive_next("a").await.unwrap();
            assert_eq!(msg.payload.text.unwrap(), i.to_string());
        }
    }

    #[tokio::test]
    async fn rejects_sends_to_stopped_agent() {
        let bus = bus();
        bus.status
            .write()
            .await
            .insert("a".to_string(), ComputeStatus::Stopped);
        let r = bus.send(Send::new("user", "a", Payload::text("hi"))).await;
        assert!(r.rejected);
        assert_eq!(r.reason.unwrap(), "agent_stopped");
        assert_eq!(bus.queue_depth("a").await, 0);
    }

    #[tokio::test]
    async fn mid_turn_immediate_send_becomes_an_interruption() {
        let bus = bus();
        bus.status
            .write()
            .await
            .insert("a".to_string(), ComputeStatus::WaitingLlm);
        bus.send(Send::new("user", "a", Payload::text("stop"))).await;
        assert_eq!(bus.queue_depth("a").await, 0);
        let interruptions = bus.drain_interruptions("a").await;
        assert_eq!(interruptions.len(), 1);
        assert_eq!(interruptions[0].payload.text.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn force_deliver_empties_delayed_queue() {
        let bus = bus();
        bus.send(Send::new("user", "a", Payload::text("later")).with_delay_ms(60_000))
            .await;
        assert_eq!(bus.delayed_count(None).await, 1);
        let moved = bus.force_deliver_all_delayed().await;
        assert_eq!(moved, 1);
        assert_eq!(bus.delayed_count(None).await, 0);
        assert_eq!(bus.queue_depth("a").await, 1);
    }
}
