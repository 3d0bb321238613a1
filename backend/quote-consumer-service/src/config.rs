use crate::error::{ConsumerError, ConsumerResult};
use resilience::{
    kafka_consumer_config, CircuitBreakerConfig, ConsumerResilienceConfig, RetryConfig,
};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,
    pub fallback: FallbackSettings,
    pub apply: ApplySettings,
    pub idempotency: IdempotencySettings,
    pub log: LogSettings,
    /// Concurrent consumer loops, each with its own subscription and breaker
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub endpoint: String,
    pub consumer_group: String,
    pub topic: String,
    pub start_offset: StartOffset,
}

/// Where a consumer group without committed offsets starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    Earliest,
    Latest,
}

impl StartOffset {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartOffset::Earliest => "earliest",
            StartOffset::Latest => "latest",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FallbackSettings {
    pub open_delay_ms: u64,
    pub error_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplySettings {
    pub persist_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencySettings {
    /// PostgreSQL store when set, in-memory store otherwise
    #[serde(default)]
    pub database_url: Option<String>,
    pub retention_days: u32,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub format: LogFormat,
    /// `EnvFilter` directives, overridden by `RUST_LOG`
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Defaults, then `config/quote-consumer.toml`, then `QUOTES__*` environment variables
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        Self::builder_with_defaults()?
            .add_source(config::File::with_name("config/quote-consumer").required(false))
            .add_source(
                config::Environment::with_prefix("QUOTES")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    fn builder_with_defaults(
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        let preset = kafka_consumer_config();

        config::Config::builder()
            .set_default("stream.endpoint", "localhost:9092")?
            .set_default("stream.consumer_group", "quotes-worker-group")?
            .set_default("stream.topic", "quotes-topic")?
            .set_default("stream.start_offset", "earliest")?
            .set_default("retry.max_attempts", i64::from(preset.retry.max_attempts))?
            .set_default("retry.delay_ms", millis(preset.retry.initial_backoff))?
            .set_default("retry.backoff_multiplier", preset.retry.backoff_multiplier)?
            .set_default("retry.max_delay_ms", millis(preset.retry.max_backoff))?
            .set_default("retry.jitter", preset.retry.jitter)?
            .set_default(
                "breaker.failure_threshold",
                i64::from(preset.circuit_breaker.failure_threshold),
            )?
            .set_default(
                "breaker.cooldown_secs",
                preset.circuit_breaker.cooldown.as_secs() as i64,
            )?
            .set_default("fallback.open_delay_ms", millis(preset.open_fallback_delay))?
            .set_default("fallback.error_delay_ms", millis(preset.error_fallback_delay))?
            .set_default("apply.persist_timeout_ms", 10_000)?
            .set_default("idempotency.retention_days", 7)?
            .set_default("idempotency.cleanup_interval_secs", 3600)? // 1 hour
            .set_default("log.format", "pretty")?
            .set_default("workers", 1)
    }

    pub fn validate(&self) -> ConsumerResult<()> {
        let invalid = |msg: &str| Err(ConsumerError::InvalidConfig(msg.to_string()));

        if self.stream.endpoint.trim().is_empty() {
            return invalid("stream.endpoint is required");
        }

        if self.stream.consumer_group.trim().is_empty() {
            return invalid("stream.consumer_group is required");
        }

        if self.stream.topic.trim().is_empty() {
            return invalid("stream.topic is required");
        }

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }

        if self.retry.backoff_multiplier < 1.0 {
            return invalid("retry.backoff_multiplier must be at least 1.0");
        }

        if self.breaker.failure_threshold == 0 {
            return invalid("breaker.failure_threshold must be at least 1");
        }

        if self.fallback.open_delay_ms <= self.retry.delay_ms {
            return invalid("fallback.open_delay_ms must be longer than retry.delay_ms");
        }

        if self.apply.persist_timeout_ms == 0 {
            return invalid("apply.persist_timeout_ms must be greater than 0");
        }

        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }

        if self.idempotency.cleanup_interval_secs == 0 {
            return invalid("idempotency.cleanup_interval_secs must be greater than 0");
        }

        if self
            .idempotency
            .database_url
            .as_deref()
            .is_some_and(|url| url.trim().is_empty())
        {
            return invalid("idempotency.database_url must not be empty when set");
        }

        Ok(())
    }

    pub fn resilience(&self) -> ConsumerResilienceConfig {
        ConsumerResilienceConfig {
            retry: RetryConfig {
                max_attempts: self.retry.max_attempts,
                initial_backoff: Duration::from_millis(self.retry.delay_ms),
                max_backoff: Duration::from_millis(self.retry.max_delay_ms.max(self.retry.delay_ms)),
                backoff_multiplier: self.retry.backoff_multiplier,
                jitter: self.retry.jitter,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: self.breaker.failure_threshold,
                cooldown: Duration::from_secs(self.breaker.cooldown_secs),
            },
            open_fallback_delay: Duration::from_millis(self.fallback.open_delay_ms),
            error_fallback_delay: Duration::from_millis(self.fallback.error_delay_ms),
        }
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.apply.persist_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.idempotency.retention_days) * 24 * 60 * 60)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.idempotency.cleanup_interval_secs)
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
