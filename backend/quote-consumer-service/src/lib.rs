//! Quote Consumer Service
//!
//! Consumes stock quotes from a Kafka topic and applies each one at most once
//! per message id. Apply attempts are retried with backoff, and a circuit
//! breaker pauses processing while the downstream store keeps failing.

pub mod applier;
pub mod config;
pub mod consumer;
pub mod decoder;
pub mod error;
pub mod metrics;
pub mod models;
pub mod retention;
pub mod sink;
pub mod stream;

// Public re-exports
pub use applier::{ApplyOutcome, RecordApplier};
pub use config::Config;
pub use consumer::{ConsumerStats, QuoteConsumer};
pub use decoder::{JsonQuoteDecoder, QuoteDecoder};
pub use error::{ApplyError, ConsumerError, ConsumerResult, DecodeError, SinkError, StreamError};
pub use models::QuoteRecord;
pub use sink::{InMemoryQuoteSink, QuoteSink};
pub use stream::{KafkaQuoteStream, MessageStream, RawMessage};
