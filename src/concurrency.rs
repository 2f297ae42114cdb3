//! **C5** — the global LLM concurrency controller.
//!
//! A single semaphore-backed gate in front of every [`crate::client::LlmClient`]
//! call the runtime makes, so the configured `max_concurrent_requests` bounds
//! total in-flight calls regardless of how many agents are active. Per-agent
//! dedup refuses a second concurrent call for an agent that already has one
//! admitted or queued, since an agent's own turn is always serialized by
//! [`crate::scheduler::Scheduler`] — a second request for the same id signals a
//! caller bug, not legitimate concurrency.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};

use crate::client::{CancelSignal, ChatMessage, ChatReply, LlmClient, LlmError, ToolDefinition};

#[derive(Debug, Clone)]
pub enum ConcurrencyError {
    /// `agent_id` already has an admitted-or-queued request in flight.
    AlreadyInFlight(String),
}

impl fmt::Display for ConcurrencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrencyError::AlreadyInFlight(id) => {
                write!(f, "agent already has an in-flight LLM request: {}", id)
            }
        }
    }
}
impl std::error::Error for ConcurrencyError {}

/// `GetStats()` (§4.5): `active` holds a semaphore permit and is inside
/// `client.chat`; `queue_length` is admitted but still waiting on one.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyStats {
    pub active: usize,
    pub queue_length: usize,
    pub capacity: usize,
    pub total: u64,
    pub completed: u64,
    pub rejected: u64,
}

/// **C5**. One instance per runtime, shared by every agent's
/// [`crate::llm_handler::LlmHandler`].
pub struct ConcurrencyController {
    semaphore: Arc<Semaphore>,
    capacity: AtomicUsize,
    in_flight_agents: Mutex<HashSet<String>>,
    total: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
}

impl ConcurrencyController {
    pub fn new(max_concurrent_requests: usize) -> Self {
        ConcurrencyController {
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests)),
            capacity: AtomicUsize::new(max_concurrent_requests),
            in_flight_agents: Mutex::new(HashSet::new()),
            total: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Admits (queueing behind the global cap if necessary) and executes one
    /// `chat` call on behalf of `agent_id`, returning the client's own
    /// `Result<ChatReply, LlmError>` unchanged. Returns
    /// [`ConcurrencyError::AlreadyInFlight`] immediately, without queueing or
    /// calling the client, if the agent already has a call admitted or waiting —
    /// callers are expected to serialize per-agent turns upstream (the
    /// scheduler), so this is a defensive guard, not a queueing mechanism.
    pub async fn execute(
        &self,
        agent_id: &str,
        client: &dyn LlmClient,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        cancel: Option<CancelSignal>,
    ) -> Result<Result<ChatReply, LlmError>, ConcurrencyError> {
        {
            let mut in_flight = self.in_flight_agents.lock().await;
            if !in_flight.insert(agent_id.to_string()) {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(ConcurrencyError::AlreadyInFlight(agent_id.to_string()));
            }
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        let _permit = self.semaphore.acquire().await;
        let result = client.chat(messages, tools, cancel).await;
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.in_flight_agents.lock().await.remove(agent_id);
        Ok(result)
    }

    pub async fn stats(&self) -> ConcurrencyStats {
        let capacity = self.capacity.load(Ordering::Relaxed);
        let available = self.semaphore.available_permits();
        let active = capacity.saturating_sub(available);
        let admitted = self.in_flight_agents.lock().await.len();
        ConcurrencyStats {
            active,
            queue_length: admitted.saturating_sub(active),
            capacity,
            total: self.total.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    pub async fn is_in_flight(&self, agent_id: &str) -> bool {
        self.in_flight_agents.lock().await.contains(agent_id)
    }

    /// `Cancel(agentId)` (§4.5): drops `agent_id` from the admitted set,
    /// whether it is still queued for a permit or already executing — actual
    /// abort of a running call is the caller's concern (see
    /// [`crate::llm_handler::LlmHandler::abort`], which holds the
    /// [`CancelSignal`]). Idempotent: a no-op if `agent_id` has nothing in flight.
    pub async fn cancel(&self, agent_id: &str) {
        self.in_flight_agents.lock().await.remove(agent_id);
    }

    /// Reconfigures the global concurrency cap. Raising it admits immediately;
    /// lowering it only affects future acquisitions, not calls already holding
    /// a permit.
    pub async fn update_max_concurrent(&self, n: usize) {
        let previous = self.capacity.swap(n, Ordering::SeqCst);
        if n > previous {
            self.semaphore.add_permits(n - previous);
        } else if n < previous {
            self.semaphore.forget_permits(previous - n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::MockLlmClient;
    use std::time::Duration;

    #[tokio::test]
    async fn rejects_second_concurrent_call_for_same_agent() {
        let controller = Arc::new(ConcurrencyController::new(4));
        let client = Arc::new(
            MockLlmClient::with_text_reply("hi").with_delay(Duration::from_millis(50)),
        );
        let c1 = controller.clone();
        let cl1 = client.clone();
        let handle = tokio::spawn(async move { c1.execute("a", cl1.as_ref(), &[], &[], None).await });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let client2 = MockLlmClient::with_text_reply("hi");
        let err = controller.execute("a", &client2, &[], &[], None).await.unwrap_err();
        assert!(matches!(err, ConcurrencyError::AlreadyInFlight(_)));
        handle.await.unwrap().unwrap().unwrap();
        assert_eq!(controller.stats().await.rejected, 1);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_frees_the_dedup_slot() {
        let controller = ConcurrencyController::new(4);
        controller.cancel("never-admitted").await;
        controller.cancel("never-admitted").await;

        let client = MockLlmClient::with_text_reply("hi").with_delay(Duration::from_millis(50));
        let controller = Arc::new(controller);
        let c1 = controller.clone();
        let handle = tokio::spawn(async move { c1.execute("a", &client, &[], &[], None).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(controller.is_in_flight("a").await);

        controller.cancel("a").await;
        assert!(!controller.is_in_flight("a").await);

        let client2 = MockLlmClient::with_text_reply("hi");
        controller.execute("a", &client2, &[], &[], None).await.unwrap().unwrap();
        handle.await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn update_max_concurrent_changes_capacity() {
        let controller = ConcurrencyController::new(1);
        assert_eq!(controller.stats().await.capacity, 1);
        controller.update_max_concurrent(3).await;
        assert_eq!(controller.stats().await.capacity, 3);
        controller.update_max_concurrent(1).await;
        assert_eq!(controller.stats().await.capacity, 1);
    }

    #[tokio::test]
    async fn caps_global_in_flight_calls() {
        let controller = Arc::new(ConcurrencyController::new(1));
        let client_a =
            Arc::new(MockLlmClient::with_text_reply("a").with_delay(Duration::from_millis(40)));
        let client_b = Arc::new(MockLlmClient::with_text_reply("b"));

        let c1 = controller.clone();
        let ca = client_a.clone();
        let handle = tokio::spawn(async move { c1.execute("a", ca.as_ref(), &[], &[], None).await });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let stats = controller.stats().await;
        assert_eq!(stats.active, 1);

        let start = std::time::Instant::now();
        controller
            .execute("b", client_b.as_ref(), &[], &[], None)
            .await
            .unwrap()
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
        handle.await.unwrap().unwrap().unwrap();
    }
}
