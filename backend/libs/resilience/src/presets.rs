/// Preset configurations for common consumer dependencies
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryConfig;
use std::time::Duration;

/// Configuration bundle for a consumer pipeline
#[derive(Debug, Clone)]
pub struct ConsumerResilienceConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Pause after the breaker rejected a call
    pub open_fallback_delay: Duration,
    /// Pause after an unexpected failure escaped the pipeline
    pub error_fallback_delay: Duration,
}

/// Kafka consumer applying records to a storage sink
///
/// - Retry: 3 attempts, fixed 2s between attempts
/// - Circuit breaker: 2 fully-retried failures, 30s cooldown
/// - Fallback: 5s while open, 2s after unexpected errors
pub fn kafka_consumer_config() -> ConsumerResilienceConfig {
    ConsumerResilienceConfig {
        retry: RetryConfig::fixed(3, Duration::from_secs(2)),
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            cooldown: Duration::from_secs(30),
        },
        open_fallback_delay: Duration::from_secs(5),
        error_fallback_delay: Duration::from_secs(2),
    }
}

/// Same shape with exponential backoff, for sinks that recover slowly
///
/// - Retry: 5 attempts, 200ms doubling up to 10s, jittered
/// - Circuit breaker: 5 fully-retried failures, 60s cooldown
pub fn kafka_consumer_backoff_config() -> ConsumerResilienceConfig {
    ConsumerResilienceConfig {
        retry: RetryConfig {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        },
        open_fallback_delay: Duration::from_secs(15),
        error_fallback_delay: Duration::from_secs(2),
    }
}
