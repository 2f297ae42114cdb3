//! **C9** — the runtime scheduler: the single main loop that drains due
//! delayed messages, picks the next eligible agent, and dispatches its
//! handler in a detached task (§4.9).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::bus::{InterruptionHandler, MessageBus};
use crate::envelope::{Envelope, Payload, Send};
use crate::event::{EventHandler, RuntimeEvent};
use crate::lifecycle::AgentLifecycle;
use crate::llm_handler::LlmHandler;
use crate::org::OrgState;

struct SchedulerInterruptionNotifier {
    events: Arc<dyn EventHandler>,
}

#[async_trait]
impl InterruptionHandler for SchedulerInterruptionNotifier {
    async fn on_interruption(&self, agent_id: &str, envelope: &Envelope) {
        self.events
            .on_event(&RuntimeEvent::InterruptionDelivered {
                agent_id: agent_id.to_string(),
                message_id: envelope.id.clone(),
            })
            .await;
    }
}

/// **C9**. Constructed once by [`crate::runtime::Runtime`] and driven by
/// [`Scheduler::run`] inside its own `tokio::task`.
pub struct Scheduler {
    org: Arc<OrgState>,
    bus: Arc<MessageBus>,
    lifecycle: Arc<AgentLifecycle>,
    handler: Arc<LlmHandler>,
    events: Arc<dyn EventHandler>,
    active_processing: Arc<Mutex<HashSet<String>>>,
    idle_warned: Arc<Mutex<HashSet<String>>>,
    max_in_flight: usize,
    max_steps: usize,
    idle_warning_ms: u64,
    stop_requested: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        org: Arc<OrgState>,
        bus: Arc<MessageBus>,
        lifecycle: Arc<AgentLifecycle>,
        handler: Arc<LlmHandler>,
        events: Arc<dyn EventHandler>,
        max_in_flight: usize,
        max_steps: usize,
        idle_warning_ms: u64,
    ) -> Self {
        Scheduler {
            org,
            bus,
            lifecycle,
            handler,
            events,
            active_processing: Arc::new(Mutex::new(HashSet::new())),
            idle_warned: Arc::new(Mutex::new(HashSet::new())),
            max_in_flight,
            max_steps,
            idle_warning_ms,
            stop_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop_requested.clone()
    }

    pub async fn active_count(&self) -> usize {
        self.active_processing.lock().await.len()
    }

    /// Registers the scheduler's bus-side interruption observer; called once
    /// during [`crate::runtime::Runtime`] construction.
    pub async fn register_interruption_notifier(&self) {
        self.bus
            .on_interruption(Arc::new(SchedulerInterruptionNotifier {
                events: self.events.clone(),
            }))
            .await;
    }

    /// The main loop described in §4.9. Runs until `stop_requested` is set and
    /// no further dispatch is possible; does not itself force-deliver delayed
    /// messages or persist state — that is [`crate::shutdown::ShutdownManager`]'s job.
    pub async fn run(&self) {
        let mut step = 0usize;
        loop {
            if self.stop_requested.load(Ordering::SeqCst) && !self.bus.has_pending().await {
                break;
            }
            if self.max_steps != 0 && step >= self.max_steps {
                log::warn!("scheduler reached max_steps ({}), stopping", self.max_steps);
                break;
            }
            step += 1;

            self.bus.deliver_due_messages().await;
            self.check_idle_agents().await;

            if !self.try_dispatch().await {
                if !self.bus.has_pending().await {
                    self.bus.wait_for_message(Duration::from_millis(100)).await;
                } else {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
            tokio::task::yield_now().await;
        }
    }

    /// `try_dispatch(cap)`: picks the first eligible (agent, message) pair and
    /// launches its handler in a detached task. Returns `true` iff a dispatch
    /// happened.
    async fn try_dispatch(&self) -> bool {
        {
            let active = self.active_processing.lock().await;
            if active.len() >= self.max_in_flight {
                return false;
            }
        }

        let agents = self.org.list_agents().await;
        for meta in agents {
            if meta.terminated_at.is_some() {
                continue;
            }
            let agent_id = meta.id.clone();
            {
                let mut active = self.active_processing.lock().await;
                if active.contains(&agent_id) {
                    continue;
                }
                if let Some(message) = self.bus.receive_next(&agent_id).await {
                    active.insert(agent_id.clone());
                    drop(active);
                    self.dispatch(agent_id, message);
                    return true;
                }
            }
        }
        false
    }

    fn dispatch(&self, agent_id: String, message: Envelope) {
        let handler = self.handler.clone();
        let lifecycle = self.lifecycle.clone();
        let events = self.events.clone();
        let org = self.org.clone();
        let bus = self.bus.clone();
        let active_processing = self.active_processing.clone();
        let message_id = message.id.clone();

        tokio::spawn(async move {
            events
                .on_event(&RuntimeEvent::AgentDispatched {
                    agent_id: agent_id.clone(),
                    message_id: message_id.clone(),
                })
                .await;
            lifecycle.touch(&agent_id).await;
            let task_id = message.task_id.clone();
            let result = handler.handle(&agent_id, message).await;
            let ok = match result {
                Ok(()) => true,
                Err(e) => {
                    log::error!("handler failed for agent {}: {}", agent_id, e);
                    lifecycle
                        .set_status(&agent_id, crate::lifecycle::ComputeStatus::Idle)
                        .await
                        .ok();
                    Self::escalate_dispatch_failure(
                        &org,
                        &bus,
                        &agent_id,
                        &e.to_string(),
                        &message_id,
                        task_id.as_deref(),
                    )
                    .await;
                    false
                }
            };
            events
                .on_event(&RuntimeEvent::AgentHandlerCompleted {
                    agent_id: agent_id.clone(),
                    ok,
                })
                .await;
            active_processing.lock().await.remove(&agent_id);
        });
    }

    /// Forwards a dispatch failure to `agent_id`'s parent as an error envelope
    /// (§4.9); an agent with no parent (e.g. `root`) simply has nowhere to
    /// escalate to and the failure stays logged only.
    async fn escalate_dispatch_failure(
        org: &Arc<OrgState>,
        bus: &Arc<MessageBus>,
        agent_id: &str,
        message: &str,
        original_message_id: &str,
        task_id: Option<&str>,
    ) {
        let parent = match org.get_agent(agent_id).await {
            Ok(meta) => meta.parent_agent_id,
            Err(_) => None,
        };
        let parent = match parent {
            Some(parent) => parent,
            None => return,
        };
        let mut payload = Payload::error("dispatch_failed", message);
        payload.extra.insert(
            "agentId".to_string(),
            serde_json::Value::String(agent_id.to_string()),
        );
        payload.extra.insert(
            "originalMessageId".to_string(),
            serde_json::Value::String(original_message_id.to_string()),
        );
        let mut send = Send::new(agent_id.to_string(), parent, payload);
        if let Some(task_id) = task_id {
            send = send.with_task_id(task_id.to_string());
        }
        bus.send(send).await;
    }

    /// Emits `AgentIdleWarning` at most once per idle episode: the warning is
    /// idempotent until [`AgentLifecycle::touch`] (any dispatch) resets it.
    async fn check_idle_agents(&self) {
        for meta in self.org.list_agents().await {
            if meta.terminated_at.is_some() {
                continue;
            }
            let idle_ms = match self.lifecycle.idle_ms(&meta.id).await {
                Some(ms) => ms,
                None => continue,
            };
            let mut warned = self.idle_warned.lock().await;
            if idle_ms >= self.idle_warning_ms {
                if warned.insert(meta.id.clone()) {
                    self.events
                        .on_event(&RuntimeEvent::AgentIdleWarning {
                            agent_id: meta.id.clone(),
                            idle_ms,
                        })
                        .await;
                }
            } else {
                warned.remove(&meta.id);
            }
        }
    }
}

