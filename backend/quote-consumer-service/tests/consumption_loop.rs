//! Consumption loop behaviour against a scripted stream and a controllable sink
//!
//! Timing-sensitive tests run on a paused tokio clock, so retry backoff,
//! breaker cooldown and fallback delays elapse instantly and deterministically.

use async_trait::async_trait;
use idempotent_consumer::{IdempotencyStore, InMemoryIdempotencyStore};
use parking_lot::Mutex;
use quote_consumer::{
    MessageStream, QuoteConsumer, QuoteRecord, QuoteSink, RawMessage, RecordApplier, SinkError,
    StreamError,
};
use resilience::{
    CircuitBreakerConfig, CircuitState, ConsumerResilienceConfig, RetryConfig, ShutdownSignal,
    ShutdownTrigger,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

enum Step {
    Deliver(RawMessage),
    Fail,
}

/// Replays a fixed script, then waits forever (or triggers shutdown when drained)
struct ScriptedStream {
    steps: VecDeque<Step>,
    on_drained: Option<ShutdownTrigger>,
    closed: Arc<AtomicBool>,
}

impl ScriptedStream {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            on_drained: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn stop_when_drained(mut self, trigger: ShutdownTrigger) -> Self {
        self.on_drained = Some(trigger);
        self
    }
}

#[async_trait]
impl MessageStream for ScriptedStream {
    async fn fetch_next(&mut self) -> Result<RawMessage, StreamError> {
        match self.steps.pop_front() {
            Some(Step::Deliver(message)) => Ok(message),
            Some(Step::Fail) => Err(StreamError::Closed),
            None => {
                if let Some(trigger) = self.on_drained.take() {
                    trigger.trigger();
                }
                std::future::pending().await
            }
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Fails the first `failures` persists, then succeeds
struct FlakySink {
    failures: AtomicU32,
    calls: AtomicU32,
    saved: Mutex<Vec<String>>,
    latency: Duration,
}

impl FlakySink {
    fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            saved: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        })
    }

    fn healthy() -> Arc<Self> {
        Self::failing(0)
    }

    /// Always succeeds, but yields for `latency` inside every persist
    fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            saved: Mutex::new(Vec::new()),
            latency,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn saved(&self) -> Vec<String> {
        self.saved.lock().clone()
    }
}

#[async_trait]
impl QuoteSink for FlakySink {
    async fn persist(&self, quote: &QuoteRecord) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SinkError::Unavailable("database unreachable".to_string()));
        }
        self.saved.lock().push(quote.id.clone());
        Ok(())
    }
}

fn quote(id: &str) -> Step {
    Step::Deliver(RawMessage::from_payload(format!(
        r#"{{"id":"{id}","ticker":"ABC","price":10.5,"observedAt":"2024-03-01T12:00:00Z"}}"#
    )))
}

fn raw(payload: &str) -> Step {
    Step::Deliver(RawMessage::from_payload(payload))
}

/// 3 attempts 2 s apart, breaker trips after 2 failures for 30 s
fn worker_defaults() -> ConsumerResilienceConfig {
    ConsumerResilienceConfig {
        retry: RetryConfig::fixed(3, Duration::from_secs(2)),
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            cooldown: Duration::from_secs(30),
        },
        open_fallback_delay: Duration::from_secs(5),
        error_fallback_delay: Duration::from_secs(1),
    }
}

fn applier(
    store: Arc<InMemoryIdempotencyStore>,
    sink: Arc<FlakySink>,
) -> Arc<RecordApplier> {
    Arc::new(RecordApplier::new(store, sink, Duration::from_secs(10)))
}

#[tokio::test]
async fn test_duplicate_ids_applied_once_in_order() {
    let (trigger, shutdown) = ShutdownSignal::channel();
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let sink = FlakySink::healthy();
    let stream =
        ScriptedStream::new(vec![quote("m1"), quote("m1"), quote("m2")]).stop_when_drained(trigger);
    let closed = stream.closed.clone();

    let consumer = QuoteConsumer::new(
        stream,
        applier(store.clone(), sink.clone()),
        worker_defaults(),
        shutdown,
    );
    let stats = consumer.run().await;

    assert_eq!(stats.applied, 2);
    assert_eq!(stats.skipped, 1);
    assert_eq!(sink.saved(), vec!["m1", "m2"]);
    assert!(store.contains("m1").await.unwrap());
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_undecodable_messages_never_reach_breaker() {
    let (trigger, shutdown) = ShutdownSignal::channel();
    let sink = FlakySink::healthy();
    let stream = ScriptedStream::new(vec![
        raw("not json"),
        raw(r#"{"ticker":"ABC","price":1,"observedAt":"2024-03-01T12:00:00Z"}"#),
        raw(""),
        quote("m1"),
    ])
    .stop_when_drained(trigger);

    let mut config = worker_defaults();
    config.circuit_breaker.failure_threshold = 1;
    let consumer = QuoteConsumer::new(
        stream,
        applier(Arc::new(InMemoryIdempotencyStore::new()), sink.clone()),
        config,
        shutdown,
    );
    let breaker = consumer.breaker();
    let stats = consumer.run().await;

    assert_eq!(stats.decode_failures, 3);
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.unexpected_errors, 0);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.consecutive_failures(), 0);
    assert_eq!(sink.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recovered_by_retry() {
    let (trigger, shutdown) = ShutdownSignal::channel();
    let sink = FlakySink::failing(2);
    let stream = ScriptedStream::new(vec![quote("m1")]).stop_when_drained(trigger);

    let consumer = QuoteConsumer::new(
        stream,
        applier(Arc::new(InMemoryIdempotencyStore::new()), sink.clone()),
        worker_defaults(),
        shutdown,
    );
    let breaker = consumer.breaker();
    let stats = consumer.run().await;

    assert_eq!(stats.applied, 1);
    assert_eq!(stats.unexpected_errors, 0);
    assert_eq!(sink.calls(), 3);
    assert_eq!(sink.saved(), vec!["m1"]);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failure_trips_breaker_and_holds_quote() {
    let (trigger, shutdown) = ShutdownSignal::channel();
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let sink = FlakySink::failing(u32::MAX);
    let stream = ScriptedStream::new(vec![quote("q1"), quote("q2"), quote("q3")]);

    let consumer = QuoteConsumer::new(
        stream,
        applier(store.clone(), sink.clone()),
        worker_defaults(),
        shutdown,
    );
    let breaker = consumer.breaker();
    let handle = tokio::spawn(consumer.run());

    // q1 fails at 0s, 2s, 4s; q2 at 5s, 7s, 9s and trips the breaker
    tokio::time::sleep(Duration::from_millis(9_500)).await;
    assert_eq!(sink.calls(), 6);
    assert_eq!(breaker.state(), CircuitState::Open);

    // q3 is held and rejected every 5 s without touching the sink
    tokio::time::sleep(Duration::from_millis(28_500)).await;
    assert_eq!(sink.calls(), 6);
    assert_eq!(breaker.state(), CircuitState::Open);

    // Cooldown over at 39 s, the next offer at 40 s is the single trial
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(sink.calls(), 7);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(sink.calls(), 9);
    assert_eq!(breaker.state(), CircuitState::Open);

    trigger.trigger();
    let stats = handle.await.unwrap();

    assert_eq!(stats.applied, 0);
    assert_eq!(stats.breaker_rejections, 6);
    assert_eq!(stats.unexpected_errors, 3);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_resumes_with_held_quote_first() {
    let (trigger, shutdown) = ShutdownSignal::channel();
    // q1 and q2 exhaust their retries and open the breaker, then the sink heals
    let sink = FlakySink::failing(6);
    let stream = ScriptedStream::new(vec![quote("q1"), quote("q2"), quote("q3"), quote("q4")])
        .stop_when_drained(trigger);

    let consumer = QuoteConsumer::new(
        stream,
        applier(Arc::new(InMemoryIdempotencyStore::new()), sink.clone()),
        worker_defaults(),
        shutdown,
    );
    let breaker = consumer.breaker();
    let stats = consumer.run().await;

    assert_eq!(stats.unexpected_errors, 2);
    assert!(stats.breaker_rejections > 0);
    assert_eq!(stats.applied, 2);
    assert_eq!(sink.saved(), vec!["q3", "q4"]);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_open_fallback_delay() {
    let (trigger, shutdown) = ShutdownSignal::channel();
    let sink = FlakySink::failing(u32::MAX);
    let stream = ScriptedStream::new(vec![quote("q1"), quote("q2")]);
    let closed = stream.closed.clone();

    let config = ConsumerResilienceConfig {
        retry: RetryConfig::fixed(1, Duration::from_secs(1)),
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(3600),
        },
        open_fallback_delay: Duration::from_secs(3600),
        error_fallback_delay: Duration::from_secs(1),
    };
    let consumer = QuoteConsumer::new(
        stream,
        applier(Arc::new(InMemoryIdempotencyStore::new()), sink.clone()),
        config,
        shutdown,
    );
    let handle = tokio::spawn(consumer.run());

    tokio::time::sleep(Duration::from_secs(10)).await;
    trigger.trigger();

    let stats = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop should stop promptly")
        .unwrap();

    assert_eq!(stats.unexpected_errors, 1);
    assert_eq!(stats.breaker_rejections, 1);
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_retry_backoff() {
    let (trigger, shutdown) = ShutdownSignal::channel();
    let sink = FlakySink::failing(u32::MAX);
    let stream = ScriptedStream::new(vec![quote("q1"), quote("q2")]);

    let mut config = worker_defaults();
    config.retry = RetryConfig::fixed(5, Duration::from_secs(60));
    let consumer = QuoteConsumer::new(
        stream,
        applier(Arc::new(InMemoryIdempotencyStore::new()), sink.clone()),
        config,
        shutdown,
    );
    let handle = tokio::spawn(consumer.run());

    tokio::time::sleep(Duration::from_secs(1)).await;
    trigger.trigger();

    let stats = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop should stop promptly")
        .unwrap();

    // q1 was interrupted, not dropped, and q2 was never fetched
    assert_eq!(sink.calls(), 1);
    assert_eq!(stats.unexpected_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_waiting_for_messages() {
    let (trigger, shutdown) = ShutdownSignal::channel();
    let stream = ScriptedStream::new(Vec::new());
    let closed = stream.closed.clone();

    let consumer = QuoteConsumer::new(
        stream,
        applier(Arc::new(InMemoryIdempotencyStore::new()), FlakySink::healthy()),
        worker_defaults(),
        shutdown,
    );
    let handle = tokio::spawn(consumer.run());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!closed.load(Ordering::SeqCst));
    trigger.trigger();

    let stats = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop should stop promptly")
        .unwrap();

    assert_eq!(stats, Default::default());
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_error_counted_and_loop_continues() {
    let (trigger, shutdown) = ShutdownSignal::channel();
    let sink = FlakySink::healthy();
    let stream = ScriptedStream::new(vec![Step::Fail, quote("m1")]).stop_when_drained(trigger);

    let consumer = QuoteConsumer::new(
        stream,
        applier(Arc::new(InMemoryIdempotencyStore::new()), sink.clone()),
        worker_defaults(),
        shutdown,
    );
    let stats = consumer.run().await;

    assert_eq!(stats.unexpected_errors, 1);
    assert_eq!(stats.applied, 1);
    assert_eq!(sink.saved(), vec!["m1"]);
}

#[tokio::test(start_paused = true)]
async fn test_workers_sharing_a_store_apply_each_id_once() {
    let store = Arc::new(InMemoryIdempotencyStore::new());
    // The persist yields, so the second worker sees m1 while the first is
    // still inside the sink.
    let sink = FlakySink::slow(Duration::from_millis(10));
    let shared = applier(store.clone(), sink.clone());

    let (first_trigger, first_shutdown) = ShutdownSignal::channel();
    let (second_trigger, second_shutdown) = ShutdownSignal::channel();

    let first = QuoteConsumer::new(
        ScriptedStream::new(vec![quote("m1"), quote("m2")]).stop_when_drained(first_trigger),
        shared.clone(),
        worker_defaults(),
        first_shutdown,
    );
    let second = QuoteConsumer::new(
        ScriptedStream::new(vec![quote("m1"), quote("m3")]).stop_when_drained(second_trigger),
        shared,
        worker_defaults(),
        second_shutdown,
    );

    let (first_stats, second_stats) = tokio::join!(first.run(), second.run());

    assert_eq!(first_stats.applied + second_stats.applied, 3);
    assert_eq!(first_stats.skipped + second_stats.skipped, 1);
    assert_eq!(sink.calls(), 3);
    assert_eq!(store.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_delivery_of_one_id_runs_sink_once() {
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let sink = FlakySink::slow(Duration::from_millis(10));
    let shared = applier(store.clone(), sink.clone());

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let (trigger, shutdown) = ShutdownSignal::channel();
            let consumer = QuoteConsumer::new(
                ScriptedStream::new(vec![quote("m1")]).stop_when_drained(trigger),
                shared.clone(),
                worker_defaults(),
                shutdown,
            );
            tokio::spawn(consumer.run())
        })
        .collect();

    let mut applied = 0;
    let mut skipped = 0;
    for worker in workers {
        let stats = worker.await.unwrap();
        applied += stats.applied;
        skipped += stats.skipped;
    }

    assert_eq!(sink.calls(), 1);
    assert_eq!(applied, 1);
    assert_eq!(skipped, 3);
    assert_eq!(sink.saved(), vec!["m1"]);
}
