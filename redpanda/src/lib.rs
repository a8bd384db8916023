//! # Commerce Redpanda
//!
//! Kafka-compatible [`StreamingBus`] implementation over rdkafka. Works
//! against Redpanda, Apache Kafka, or any protocol-compatible broker.
//!
//! # Delivery semantics
//!
//! **At-least-once** on both sides:
//!
//! - The producer awaits the broker acknowledgment before `publish` returns,
//!   so the relay only marks an outbox row PUBLISHED once the log has it.
//! - The consumer commits offsets manually, *after* a record has been handed
//!   to the subscriber's channel. A crash before the commit redelivers;
//!   consumers dedup on the envelope's event id.
//!
//! # Partitioning
//!
//! Records are keyed by the caller-supplied partition key (order id or
//! product id), so all events of one aggregate land on one partition and
//! keep their relative order. Nothing is guaranteed across keys.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use commerce_core::error::BusError;
use commerce_core::store::{BusMessage, MessageStream, StreamingBus};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

/// Streaming bus over a Kafka-compatible broker.
///
/// # Example
///
/// ```no_run
/// use commerce_redpanda::RedpandaBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaBus::builder()
///     .brokers("localhost:9092")
///     .producer_acks("all")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] when the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> RedpandaBusBuilder {
        RedpandaBusBuilder::default()
    }

    /// Broker addresses this bus talks to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for [`RedpandaBus`].
#[derive(Default)]
pub struct RedpandaBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"`, or `"all"`. Default `"1"`.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout. Default 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Subscriber channel depth. Default 1000.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is 0.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Where a new consumer group starts reading: `"earliest"` or
    /// `"latest"`. Default `"earliest"` so a fresh scorer group replays
    /// history.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the bus.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] when brokers are missing or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set("compression.type", self.compression.as_deref().unwrap_or("none"));

        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            "streaming bus producer created"
        );

        Ok(RedpandaBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self.auto_offset_reset.unwrap_or_else(|| "earliest".to_string()),
        })
    }
}

impl StreamingBus for RedpandaBus {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError> {
        let record = FutureRecord::to(topic).payload(payload).key(key);

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                tracing::debug!(topic, key, partition, offset, "record published");
                Ok(())
            }
            Err((kafka_error, _)) => {
                tracing::error!(topic, key, error = %kafka_error, "failed to publish record");
                Err(BusError::PublishFailed {
                    topic: topic.to_owned(),
                    reason: kafka_error.to_string(),
                })
            }
        }
    }

    async fn subscribe(&self, topics: &[&str], group: &str) -> Result<MessageStream, BusError> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_owned()).collect();

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BusError::SubscriptionFailed {
                topics: topics.clone(),
                reason: format!("failed to create consumer: {e}"),
            })?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| BusError::SubscriptionFailed {
                topics: topics.clone(),
                reason: format!("failed to subscribe: {e}"),
            })?;

        tracing::info!(?topics, group, "subscribed to topics");

        let (tx, rx) = tokio::sync::mpsc::channel(self.buffer_size);

        // The consumer lives in its own task; offsets are committed only
        // after a record made it into the channel.
        tokio::spawn(async move {
            use futures::StreamExt;
            use rdkafka::consumer::CommitMode;

            let mut stream = consumer.stream();

            while let Some(result) = stream.next().await {
                match result {
                    Ok(message) => {
                        let record = BusMessage {
                            topic: message.topic().to_owned(),
                            key: message
                                .key()
                                .map(|k| String::from_utf8_lossy(k).into_owned())
                                .unwrap_or_default(),
                            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                        };

                        if tx.send(Ok(record)).await.is_err() {
                            tracing::debug!("subscriber dropped, exiting consumer task");
                            break;
                        }

                        if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                            tracing::warn!(
                                topic = message.topic(),
                                partition = message.partition(),
                                offset = message.offset(),
                                error = %e,
                                "offset commit failed, record may be redelivered"
                            );
                        }
                    }
                    Err(e) => {
                        let err = BusError::TransportError(format!("failed to receive: {e}"));
                        if tx.send(Err(err)).await.is_err() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("consumer task exiting");
        });

        let stream = async_stream::stream! {
            let mut rx = rx;
            while let Some(result) = rx.recv().await {
                yield result;
            }
        };

        Ok(Box::pin(stream) as MessageStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaBus>();
        assert_sync::<RedpandaBus>();
    }

    #[test]
    fn builder_requires_brokers() {
        assert!(matches!(
            RedpandaBus::builder().build(),
            Err(BusError::ConnectionFailed(_))
        ));
    }
}
