//! End-to-end delivery behavior over the in-memory store and virtual time

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::watch;

use warranty_mail_pipeline::email::{
    Clock, DeliveryOutcome, EmailQueueStore, ManualClock, MemoryEmailStore, MessageStatus,
    NewMessage, PassTrigger, Priority, StoreError,
};
use warranty_mail_pipeline::resilience::{
    CircuitBreaker, Connectivity, ErrorKind, OfflineQueue, QueryError, ResilienceError,
    RetryConfig, RetryExecutor,
};

use common::{processor, start_time, ScriptedTransport};

fn fixture() -> (Arc<MemoryEmailStore>, Arc<ScriptedTransport>, Arc<ManualClock>) {
    (
        Arc::new(MemoryEmailStore::new()),
        ScriptedTransport::new(),
        Arc::new(ManualClock::new(start_time())),
    )
}

#[tokio::test]
async fn test_urgent_message_recovers_after_two_failures() {
    let (store, transport, clock) = fixture();
    transport.fail_times("Claim approved", 2);
    let processor = processor(store.clone(), transport.clone(), clock.clone());

    let queued = store
        .insert(
            NewMessage::new("owner@example.com", "Claim approved", "<p>Approved</p>")
                .with_priority(Priority::Urgent)
                .with_max_retries(3),
            clock.now(),
        )
        .await
        .unwrap();

    let first = processor.run_pass(PassTrigger::Scheduled).await.unwrap();
    assert_eq!(first.retried, 1);

    let after_first = store.get(queued.id).await.unwrap().unwrap();
    assert_eq!(after_first.status, MessageStatus::Retry);
    assert_eq!(after_first.attempts, 1);
    assert_eq!(after_first.next_retry_at, clock.now() + ChronoDuration::minutes(1));

    // Not yet due: nothing is attempted
    clock.advance(ChronoDuration::seconds(30));
    let early = processor.run_pass(PassTrigger::Scheduled).await.unwrap();
    assert_eq!(early.processed, 0);

    clock.set(after_first.next_retry_at);
    let second = processor.run_pass(PassTrigger::Scheduled).await.unwrap();
    assert_eq!(second.retried, 1);

    let after_second = store.get(queued.id).await.unwrap().unwrap();
    assert_eq!(after_second.attempts, 2);
    assert_eq!(after_second.next_retry_at, clock.now() + ChronoDuration::minutes(5));

    clock.set(after_second.next_retry_at);
    let third = processor.run_pass(PassTrigger::Scheduled).await.unwrap();
    assert_eq!(third.sent, 1);

    let sent = store.get(queued.id).await.unwrap().unwrap();
    assert_eq!(sent.status, MessageStatus::Sent);
    assert_eq!(sent.attempts, 3);
    assert_eq!(sent.sent_at, Some(clock.now()));
    assert_eq!(sent.provider_message_id(), Some("prov-Claim approved"));
    assert_eq!(transport.attempts().len(), 3);
}

#[tokio::test]
async fn test_message_fails_permanently_after_max_retries() {
    let (store, transport, clock) = fixture();
    transport.fail_always("Warranty expiring");
    let processor = processor(store.clone(), transport.clone(), clock.clone());

    let queued = store
        .insert(
            NewMessage::new("owner@example.com", "Warranty expiring", "").with_max_retries(2),
            clock.now(),
        )
        .await
        .unwrap();

    processor.run_pass(PassTrigger::Scheduled).await.unwrap();
    clock.advance(ChronoDuration::minutes(1));
    let last = processor.run_pass(PassTrigger::Scheduled).await.unwrap();
    assert_eq!(last.failed, 1);

    let failed = store.get(queued.id).await.unwrap().unwrap();
    assert_eq!(failed.status, MessageStatus::Failed);
    assert_eq!(failed.attempts, 2);
    assert_eq!(failed.failed_at, Some(clock.now()));
    assert!(failed
        .error_message
        .as_deref()
        .is_some_and(|e| e.contains("provider unavailable")));

    // Terminal rows are never picked up again
    clock.advance(ChronoDuration::hours(6));
    let after = processor.run_pass(PassTrigger::Scheduled).await.unwrap();
    assert_eq!(after.processed, 0);
    assert_eq!(transport.attempts().len(), 2);
}

#[tokio::test]
async fn test_retry_gaps_follow_ladder_then_clamp() {
    let (store, transport, clock) = fixture();
    transport.fail_always("Service reminder");
    let processor = processor(store.clone(), transport, clock.clone());

    let queued = store
        .insert(
            NewMessage::new("owner@example.com", "Service reminder", "").with_max_retries(10),
            clock.now(),
        )
        .await
        .unwrap();

    let mut gaps = Vec::new();
    for _ in 0..6 {
        processor.run_pass(PassTrigger::Scheduled).await.unwrap();
        let message = store.get(queued.id).await.unwrap().unwrap();
        gaps.push((message.next_retry_at - clock.now()).num_minutes());
        clock.set(message.next_retry_at);
    }

    assert_eq!(gaps, vec![1, 5, 15, 60, 120, 120]);
}

#[tokio::test]
async fn test_batch_order_is_priority_then_age() {
    let (store, transport, clock) = fixture();
    let processor = processor(store.clone(), transport.clone(), clock.clone());

    for (subject, priority) in [
        ("low", Priority::Low),
        ("normal-old", Priority::Normal),
        ("high", Priority::High),
        ("normal-new", Priority::Normal),
        ("urgent", Priority::Urgent),
    ] {
        store
            .insert(
                NewMessage::new("owner@example.com", subject, "").with_priority(priority),
                clock.now(),
            )
            .await
            .unwrap();
        clock.advance(ChronoDuration::seconds(1));
    }

    let summary = processor.run_pass(PassTrigger::Api).await.unwrap();
    assert_eq!(summary.sent, 5);
    assert_eq!(
        transport.attempts(),
        vec!["urgent", "high", "normal-old", "normal-new", "low"]
    );
}

#[tokio::test]
async fn test_scheduled_message_waits_for_send_after() {
    let (store, transport, clock) = fixture();
    let processor = processor(store.clone(), transport.clone(), clock.clone());

    let send_after = clock.now() + ChronoDuration::days(7);
    store
        .insert(
            NewMessage::new("owner@example.com", "Registration anniversary", "").with_send_after(send_after),
            clock.now(),
        )
        .await
        .unwrap();

    assert_eq!(processor.run_pass(PassTrigger::Scheduled).await.unwrap().processed, 0);

    clock.set(send_after);
    assert_eq!(processor.run_pass(PassTrigger::Scheduled).await.unwrap().sent, 1);
}

#[tokio::test]
async fn test_outcomes_on_terminal_messages_are_rejected() {
    let (store, transport, clock) = fixture();
    let processor = processor(store.clone(), transport, clock.clone());

    let queued = store
        .insert(NewMessage::new("owner@example.com", "Receipt", ""), clock.now())
        .await
        .unwrap();
    processor.run_pass(PassTrigger::Api).await.unwrap();

    let err = store
        .record_outcome(
            queued.id,
            2,
            DeliveryOutcome::Failed {
                error: "late failure".to_string(),
            },
            clock.now(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    let message = store.get(queued.id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Sent);
    assert_eq!(message.attempts, 1);
    assert!(message.error_message.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_passes_send_each_message_once() {
    let (store, transport, clock) = fixture();

    for i in 0..40 {
        store
            .insert(NewMessage::new("owner@example.com", format!("msg-{}", i), ""), clock.now())
            .await
            .unwrap();
    }

    let processors: Vec<_> = (0..4)
        .map(|_| Arc::new(processor(store.clone(), transport.clone(), clock.clone())))
        .collect();

    let handles: Vec<_> = processors
        .iter()
        .cloned()
        .map(|p| tokio::spawn(async move { p.run_pass(PassTrigger::Scheduled).await.unwrap() }))
        .collect();

    let mut sent = 0;
    for handle in handles {
        sent += handle.await.unwrap().sent;
    }

    assert_eq!(sent, 40);
    let mut attempts = transport.attempts();
    attempts.sort();
    attempts.dedup();
    assert_eq!(attempts.len(), 40);
    assert_eq!(transport.attempts().len(), 40);
    assert_eq!(store.stats().await.unwrap().sent, 40);
}

#[tokio::test]
async fn test_abandoned_claim_is_recovered() {
    let (store, transport, clock) = fixture();
    let processor = processor(store.clone(), transport.clone(), clock.clone());

    let queued = store
        .insert(NewMessage::new("owner@example.com", "Claim update", ""), clock.now())
        .await
        .unwrap();

    // A worker claims the message and dies before recording an outcome
    store.claim(queued.id, clock.now()).await.unwrap().unwrap();

    clock.advance(ChronoDuration::minutes(5));
    let early = processor.run_pass(PassTrigger::Scheduled).await.unwrap();
    assert_eq!(early.stale_released, 0);
    assert_eq!(early.processed, 0);

    clock.advance(ChronoDuration::minutes(11));
    let recovered = processor.run_pass(PassTrigger::Scheduled).await.unwrap();
    assert_eq!(recovered.stale_released, 1);
    assert_eq!(recovered.sent, 1);

    let message = store.get(queued.id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Sent);
    assert_eq!(message.attempts, 1);
}

#[tokio::test]
async fn test_one_failure_does_not_block_the_batch() {
    let (store, transport, clock) = fixture();
    transport.fail_always("bounced");
    let processor = processor(store.clone(), transport.clone(), clock.clone());

    for subject in ["before", "bounced", "after"] {
        store
            .insert(NewMessage::new("owner@example.com", subject, ""), clock.now())
            .await
            .unwrap();
        clock.advance(ChronoDuration::seconds(1));
    }

    let summary = processor.run_pass(PassTrigger::Api).await.unwrap();
    assert!(summary.success);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.sent, 2);
    assert_eq!(summary.retried, 1);
}

#[tokio::test]
async fn test_non_retryable_query_runs_once() {
    let executor = RetryExecutor::new(Arc::new(CircuitBreaker::new()), RetryConfig::default());
    let calls = Arc::new(AtomicU32::new(0));

    let counter = calls.clone();
    let result: Result<(), ResilienceError> = executor
        .query_with_retry(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(QueryError::new(ErrorKind::Other, "duplicate key value"))
            }
        })
        .await;

    assert!(matches!(result, Err(ResilienceError::Query(ref e)) if e.kind == ErrorKind::Other));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_offline_operations_replay_in_submission_order() {
    let executor = Arc::new(RetryExecutor::new(
        Arc::new(CircuitBreaker::new()),
        RetryConfig {
            initial_delay_ms: 1,
            max_delay_ms: 5,
            ..Default::default()
        },
    ));
    let queue = Arc::new(OfflineQueue::new(executor, Connectivity::Offline));
    let (tx, rx) = watch::channel(Connectivity::Offline);
    let listener = queue.spawn_listener(rx);

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut waiters = Vec::new();
    for i in 1..=3 {
        let q = queue.clone();
        let order = order.clone();
        waiters.push(tokio::spawn(async move {
            q.execute(move || {
                    let order = order.clone();
                    async move {
                        order.lock().unwrap().push(i);
                        Ok::<_, QueryError>(i)
                    }
                })
                .await
        }));

        while queue.queue_depth() < i {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
    assert!(order.lock().unwrap().is_empty());

    tx.send(Connectivity::Online).unwrap();

    for (expected, waiter) in (1..=3).zip(waiters) {
        assert_eq!(waiter.await.unwrap().unwrap(), expected);
    }
    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(queue.queue_depth(), 0);

    drop(tx);
    listener.await.unwrap();
}
