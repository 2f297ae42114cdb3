//! Black-box end-to-end coverage for the scenarios in SPEC_FULL.md §8.
//!
//! Drives the runtime only through its public surface (`Runtime`, `MessageBus`,
//! `AgentLifecycle`) the way an embedding application would, never reaching
//! into component internals.

use std::sync::Arc;
use std::time::Duration;

use agentmesh::client::LlmClient;
use agentmesh::clients::mock::MockLlmClient;
use agentmesh::config::RuntimeConfig;
use agentmesh::envelope::{Payload, Send, ROOT_AGENT, USER_AGENT};
use agentmesh::lifecycle::ComputeStatus;
use agentmesh::runtime::Runtime;

fn init_logging() {
    let _ = env_logger::try_init();
}

fn scratch_config() -> RuntimeConfig {
    let dir = tempfile::tempdir().unwrap().into_path();
    RuntimeConfig::default().with_runtime_dir(dir)
}

async fn runtime_with(client: Arc<dyn LlmClient>) -> Runtime {
    Runtime::builder()
        .with_config(scratch_config())
        .with_llm_client("default", client)
        .build()
        .await
}

/// S1: a message to `root` eventually produces a non-empty reply to `user`.
#[tokio::test]
async fn happy_path_spawn_and_reply() {
    init_logging();
    let client = Arc::new(MockLlmClient::with_text_reply("hello back"));
    let runtime = runtime_with(client).await;

    let scheduler = runtime.scheduler.clone();
    let handle = tokio::spawn(async move { scheduler.run().await });

    runtime.send_to_root("hello").await;

    let mut reply_text = None;
    for _ in 0..200 {
        if let Some(envelope) = runtime.bus.receive_next(USER_AGENT).await {
            if envelope.from == ROOT_AGENT {
                reply_text = envelope.payload.text;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(reply_text.is_some_and(|t| !t.is_empty()));
    runtime.shutdown().await;
    handle.await.ok();
}

/// S2 / S3: zero and negative delay both behave as an immediate send.
#[tokio::test]
async fn zero_and_negative_delay_are_equivalent_to_immediate() {
    init_logging();
    let client = Arc::new(MockLlmClient::with_text_reply("noop"));
    let runtime = runtime_with(client).await;

    let zero = runtime
        .bus
        .send(Send::new(ROOT_AGENT, "agent-a", Payload::text("zero")).with_delay_ms(0))
        .await;
    assert!(!zero.rejected);
    assert!(zero.scheduled_delivery_time.is_none());

    let negative = runtime
        .bus
        .send(Send::new(ROOT_AGENT, "agent-a", Payload::text("negative")).with_delay_ms(-5))
        .await;
    assert!(!negative.rejected);
    assert!(negative.scheduled_delivery_time.is_none());

    assert_eq!(runtime.bus.queue_depth("agent-a").await, 2);
}

/// S4: five delayed messages with the same deadline become available in send order.
#[tokio::test]
async fn fifo_under_same_deadline() {
    init_logging();
    let client = Arc::new(MockLlmClient::with_text_reply("noop"));
    let runtime = runtime_with(client).await;

    for i in 0..5 {
        runtime
            .bus
            .send(Send::new(ROOT_AGENT, "agent-b", Payload::text(i.to_string())).with_delay_ms(1))
            .await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    runtime.bus.deliver_due_messages().await;

    let mut seen = Vec::new();
    while let Some(envelope) = runtime.bus.receive_next("agent-b").await {
        seen.push(envelope.payload.text.unwrap());
    }
    assert_eq!(seen, vec!["0", "1", "2", "3", "4"]);
}

/// S6: terminating the root of a chain cascades to every descendant.
#[tokio::test]
async fn terminate_cascades_to_descendants() {
    init_logging();
    let client = Arc::new(MockLlmClient::with_text_reply("noop"));
    let runtime = runtime_with(client).await;

    let role = runtime
        .create_role("worker", "you do work", vec![], "default")
        .await
        .unwrap();
    let a = runtime.spawn_agent(&role.id, ROOT_AGENT).await.unwrap();
    let b = runtime.spawn_agent(&role.id, &a.id).await.unwrap();
    let c = runtime.spawn_agent(&role.id, &b.id).await.unwrap();

    let removed = runtime
        .lifecycle
        .terminate(ROOT_AGENT, &a.id, Some("test".to_string()))
        .await
        .unwrap();
    assert_eq!(removed.len(), 3);
    assert!(removed.contains(&a.id));

    for id in [&a.id, &b.id, &c.id] {
        let meta = runtime.org.get_agent(id).await.unwrap();
        assert!(meta.terminated_at.is_some());
        assert_eq!(meta.terminated_by.as_deref(), Some(ROOT_AGENT));
    }
}

/// S7: with maxConcurrent=2, at most 2 agents are ever `waiting_llm`
/// simultaneously, and all agents eventually complete exactly once.
#[tokio::test]
async fn concurrency_cap_under_load() {
    init_logging();
    let client = Arc::new(MockLlmClient::new(vec![]).with_delay(Duration::from_millis(40)));
    let mut config = scratch_config();
    config.llm.max_concurrent_requests = 2;
    let runtime = Runtime::builder()
        .with_config(config)
        .with_llm_client("default", client.clone())
        .build()
        .await;

    let role = runtime
        .create_role("worker", "you do work", vec![], "default")
        .await
        .unwrap();

    let mut agent_ids = Vec::new();
    for _ in 0..10 {
        let meta = runtime.spawn_agent(&role.id, ROOT_AGENT).await.unwrap();
        runtime.send_to_agent(&meta.id, "go").await;
        agent_ids.push(meta.id);
    }

    let scheduler = runtime.scheduler.clone();
    let handle = tokio::spawn(async move { scheduler.run().await });

    for _ in 0..300 {
        let mut waiting = 0;
        for id in &agent_ids {
            if runtime.lifecycle.status_of(id).await == Some(ComputeStatus::WaitingLlm) {
                waiting += 1;
            }
        }
        assert!(waiting <= 2, "observed {} agents waiting_llm at once", waiting);
        if client.call_count() >= 10 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    runtime.shutdown().await;
    handle.await.ok();
    assert_eq!(client.call_count(), 10);
}

/// S8: aborting a waiting agent sets it to `Stopped`, rejects further sends,
/// and leaves its queue empty.
#[tokio::test]
async fn rejection_after_abort() {
    init_logging();
    let client = Arc::new(MockLlmClient::with_text_reply("noop"));
    let runtime = runtime_with(client).await;

    let role = runtime
        .create_role("worker", "you do work", vec![], "default")
        .await
        .unwrap();
    let meta = runtime.spawn_agent(&role.id, ROOT_AGENT).await.unwrap();

    runtime
        .lifecycle
        .set_status(&meta.id, ComputeStatus::WaitingLlm)
        .await
        .unwrap();
    runtime.handler.abort(&meta.id).await.unwrap();

    assert_eq!(
        runtime.lifecycle.status_of(&meta.id).await,
        Some(ComputeStatus::Stopped)
    );

    let outcome = runtime
        .bus
        .send(Send::new(ROOT_AGENT, &meta.id, Payload::text("late")))
        .await;
    assert!(outcome.rejected);
    assert_eq!(outcome.reason.as_deref(), Some("agent_stopped"));
    assert_eq!(runtime.bus.queue_depth(&meta.id).await, 0);
}
