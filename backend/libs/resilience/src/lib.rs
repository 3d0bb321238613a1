/// Resilience patterns for stream consumers
///
/// This library provides the building blocks of a resilient consumption pipeline:
/// - **Circuit Breaker**: Fails fast once a dependency keeps failing, tries one call again after a cooldown
/// - **Retry**: Bounded attempts with fixed or exponential backoff and jitter
/// - **Timeout**: Deadlines around individual calls
/// - **Shutdown**: Cooperative cancellation shared by every blocking wait
/// - **Preset Configurations**: Pre-tuned settings for Kafka consumers
///
/// # Example: breaker around a retried call
///
/// ```rust,no_run
/// use resilience::{presets, with_retry, CircuitBreaker, ShutdownSignal};
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::kafka_consumer_config();
///     let breaker = CircuitBreaker::new(config.circuit_breaker);
///     let (_trigger, shutdown) = ShutdownSignal::channel();
///
///     let result = breaker
///         .call(|| with_retry(&config.retry, &shutdown, || async {
///             // Your storage call here
///             Ok::<_, String>(())
///         }))
///         .await;
/// }
/// ```
pub mod circuit_breaker;
pub mod metrics;
pub mod presets;
pub mod retry;
pub mod shutdown;
pub mod timeout;

// Re-export main types for convenience
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use presets::{kafka_consumer_backoff_config, kafka_consumer_config, ConsumerResilienceConfig};
pub use retry::{with_retry, RetryConfig, RetryError};
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
pub use timeout::{with_timeout, TimeoutError};
