use idempotent_consumer::IdempotencyError;
use std::time::Duration;
use thiserror::Error;

pub type ConsumerResult<T> = std::result::Result<T, ConsumerError>;

/// Startup and wiring failures
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A payload that can never become a quote. Never retried.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Empty message payload")]
    EmptyPayload,

    #[error("Malformed quote payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Quote has no usable id: {0}")]
    InvalidId(String),

    #[error("Quote {id} has no ticker")]
    MissingTicker { id: String },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Quote storage unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a single apply attempt. Always treated as transient.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Failed to persist quote {id}: {source}")]
    Persist {
        id: String,
        #[source]
        source: SinkError,
    },

    #[error("Persisting quote {id} timed out after {timeout:?}")]
    Timeout { id: String, timeout: Duration },

    #[error("Idempotency store failed for quote {id}: {source}")]
    Store {
        id: String,
        #[source]
        source: IdempotencyError,
    },
}

impl ApplyError {
    pub fn event_id(&self) -> &str {
        match self {
            ApplyError::Persist { id, .. }
            | ApplyError::Timeout { id, .. }
            | ApplyError::Store { id, .. } => id,
        }
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Kafka consumer error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Message stream closed")]
    Closed,
}
