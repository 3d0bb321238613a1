//! Message stream abstraction and its Kafka implementation

use crate::config::StreamConfig;
use crate::error::{ConsumerResult, StreamError};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use std::ops::{Deref, DerefMut};
use tracing::{debug, info};

/// A message as handed over by the stream, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

impl RawMessage {
    /// A message with only a payload, for callers outside a broker
    pub fn from_payload(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: String::new(),
            partition: 0,
            offset: 0,
            key: None,
            payload: Some(payload.into()),
        }
    }
}

/// Source of raw messages for one consumer loop
#[async_trait]
pub trait MessageStream: Send {
    /// Wait for the next message. Cancellation safe.
    async fn fetch_next(&mut self) -> Result<RawMessage, StreamError>;

    /// Release the subscription. Must be idempotent.
    fn close(&mut self);
}

/// Kafka-backed stream. Offsets are auto-committed for delivered messages.
pub struct KafkaQuoteStream {
    consumer: StreamConsumer,
    topic: String,
    closed: bool,
}

impl KafkaQuoteStream {
    pub fn connect(config: &StreamConfig) -> ConsumerResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.endpoint)
            .set("group.id", &config.consumer_group)
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "5000")
            .set("auto.offset.reset", config.start_offset.as_str())
            .set("session.timeout.ms", "45000")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;

        info!(
            endpoint = %config.endpoint,
            topic = %config.topic,
            consumer_group = %config.consumer_group,
            start_offset = %config.start_offset.as_str(),
            "Kafka quote stream subscribed"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            closed: false,
        })
    }
}

#[async_trait]
impl MessageStream for KafkaQuoteStream {
    async fn fetch_next(&mut self) -> Result<RawMessage, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }

        let message = self.consumer.recv().await?;
        debug!(
            partition = message.partition(),
            offset = message.offset(),
            "Fetched message"
        );

        Ok(RawMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec),
        })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "Kafka quote stream closed");
    }
}

/// Closes the wrapped stream when dropped, whichever way the loop exits
pub(crate) struct StreamGuard<S: MessageStream> {
    inner: S,
}

impl<S: MessageStream> StreamGuard<S> {
    pub(crate) fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: MessageStream> Deref for StreamGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.inner
    }
}

impl<S: MessageStream> DerefMut for StreamGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: MessageStream> Drop for StreamGuard<S> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingStream {
        closes: Arc<AtomicU32>,
    }

    #[async_trait]
    impl MessageStream for CountingStream {
        async fn fetch_next(&mut self) -> Result<RawMessage, StreamError> {
            Err(StreamError::Closed)
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_guard_closes_on_drop() {
        let closes = Arc::new(AtomicU32::new(0));
        let guard = StreamGuard::new(CountingStream {
            closes: closes.clone(),
        });
        drop(guard);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_raw_message_from_payload() {
        let message = RawMessage::from_payload("{}");
        assert_eq!(message.payload.as_deref(), Some(b"{}".as_slice()));
        assert!(message.key.is_none());
    }
}
