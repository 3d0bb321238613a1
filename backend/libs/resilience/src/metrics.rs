/// Prometheus metrics for resilience patterns
///
/// Collectors compile to no-ops unless the `metrics` feature is enabled.
pub use imp::{CircuitBreakerMetrics, RetryMetrics, TimeoutMetrics};

#[cfg(feature = "metrics")]
mod imp {
    use once_cell::sync::Lazy;
    use prometheus::{
        register_histogram, register_histogram_vec, register_int_counter_vec, Histogram,
        HistogramVec, IntCounterVec,
    };

    static CIRCUIT_BREAKER_STATE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
        register_int_counter_vec!(
            "resilience_circuit_breaker_state_transitions_total",
            "Total number of circuit breaker state transitions",
            &["from", "to"]
        )
        .expect("Failed to register circuit breaker state transitions metric")
    });

    static CIRCUIT_BREAKER_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
        register_int_counter_vec!(
            "resilience_circuit_breaker_calls_total",
            "Circuit breaker calls by state at admission and result",
            &["state", "result"]
        )
        .expect("Failed to register circuit breaker calls metric")
    });

    static CIRCUIT_BREAKER_OPEN_DURATION: Lazy<Histogram> = Lazy::new(|| {
        register_histogram!(
            "resilience_circuit_breaker_open_duration_seconds",
            "Time spent open before the first half-open trial"
        )
        .expect("Failed to register circuit breaker open duration metric")
    });

    static RETRY_ATTEMPTS: Lazy<HistogramVec> = Lazy::new(|| {
        register_histogram_vec!(
            "resilience_retry_attempts",
            "Attempts made per retried operation, by final result",
            &["result"],
            vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0]
        )
        .expect("Failed to register retry attempts metric")
    });

    static TIMEOUT_OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
        register_int_counter_vec!(
            "resilience_timeout_operations_total",
            "Operations run under a deadline, by result",
            &["result"]
        )
        .expect("Failed to register timeout operations metric")
    });

    pub struct CircuitBreakerMetrics;

    impl CircuitBreakerMetrics {
        pub fn record_state_transition(from: &str, to: &str) {
            CIRCUIT_BREAKER_STATE_TRANSITIONS
                .with_label_values(&[from, to])
                .inc();
        }

        pub fn record_call(state: &str, result: &str) {
            CIRCUIT_BREAKER_CALLS
                .with_label_values(&[state, result])
                .inc();
        }

        pub fn record_open_duration(duration_secs: f64) {
            CIRCUIT_BREAKER_OPEN_DURATION.observe(duration_secs);
        }
    }

    pub struct RetryMetrics;

    impl RetryMetrics {
        pub fn record_attempts(result: &str, attempts: u32) {
            RETRY_ATTEMPTS
                .with_label_values(&[result])
                .observe(f64::from(attempts));
        }
    }

    pub struct TimeoutMetrics;

    impl TimeoutMetrics {
        pub fn record_operation(result: &str) {
            TIMEOUT_OPERATIONS.with_label_values(&[result]).inc();
        }
    }
}

#[cfg(not(feature = "metrics"))]
mod imp {
    pub struct CircuitBreakerMetrics;

    impl CircuitBreakerMetrics {
        pub fn record_state_transition(_from: &str, _to: &str) {}
        pub fn record_call(_state: &str, _result: &str) {}
        pub fn record_open_duration(_duration_secs: f64) {}
    }

    pub struct RetryMetrics;

    impl RetryMetrics {
        pub fn record_attempts(_result: &str, _attempts: u32) {}
    }

    pub struct TimeoutMetrics;

    impl TimeoutMetrics {
        pub fn record_operation(_result: &str) {}
    }
}
