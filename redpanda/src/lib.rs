//! Kafka-compatible transport binding for reqbus.
//!
//! This crate connects the correlation engine to a Redpanda/Kafka-style
//! partitioned log bus using rdkafka:
//!
//! - [`RedpandaTransport`] implements the core [`Transport`] trait: every
//!   envelope is published to a fixed topic, keyed by the message's
//!   business key, so all traffic for one key lands on one partition and
//!   keeps the bus's per-partition ordering.
//! - [`RedpandaConsumer`] runs the inbound side: a consumer-group stream
//!   whose payloads are fed to one of the engine's byte-consuming entry
//!   points (`Server::request_handler` or `Client::response_handler`).
//!   Offsets are committed after dispatch, giving at-least-once delivery;
//!   the engine's pool makes redelivered responses harmless
//!   (`NoRequestInPool` on the duplicate).
//!
//! A request/reply deployment uses two topics: callers publish requests to
//! the service's request topic and consume the response topic; the service
//! does the reverse.
//!
//! # Example
//!
//! ```no_run
//! use reqbus_redpanda::{RedpandaConsumer, RedpandaTransport};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = RedpandaTransport::builder()
//!     .brokers("localhost:9092")
//!     .topic("orders-requests")
//!     .producer_acks("all")
//!     .timeout(Duration::from_secs(5))
//!     .build()?;
//!
//! let consumer = RedpandaConsumer::builder()
//!     .brokers("localhost:9092")
//!     .group("orders-service")
//!     .topics(["orders-requests"])
//!     .auto_offset_reset("latest")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as KafkaMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use reqbus_core::error::CallError;
use reqbus_core::transport::{SendFuture, Transport, TransportError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Inbound dispatch function: one of the engine's byte-consuming entry
/// points, wrapped by the caller.
pub type Dispatch = Arc<
    dyn Fn(Vec<u8>) -> Pin<Box<dyn Future<Output = Result<(), CallError>> + Send>> + Send + Sync,
>;

/// Producer-backed [`Transport`] publishing to a fixed topic.
pub struct RedpandaTransport {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl RedpandaTransport {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaTransportBuilder {
        RedpandaTransportBuilder::default()
    }

    /// The topic this transport publishes to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Transport for RedpandaTransport {
    fn send(&self, key: &str, payload: Vec<u8>) -> SendFuture<'_> {
        let key = key.to_string();
        Box::pin(async move {
            let record = FutureRecord::to(&self.topic)
                .payload(&payload)
                .key(key.as_bytes());

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition,
                        offset,
                        key = %key,
                        "envelope published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        key = %key,
                        error = %kafka_error,
                        "failed to publish envelope"
                    );
                    Err(TransportError::SendFailed {
                        key,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }
}

/// Builder for [`RedpandaTransport`].
#[derive(Default)]
pub struct RedpandaTransportBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaTransportBuilder {
    /// Set the broker addresses (comma-separated, e.g. "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the topic every envelope is published to.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "1"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaTransport`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] when brokers or topic
    /// are missing, or the producer cannot be created.
    pub fn build(self) -> Result<RedpandaTransport, TransportError> {
        let brokers = self
            .brokers
            .ok_or_else(|| TransportError::ConnectionFailed("brokers not configured".to_string()))?;
        let topic = self
            .topic
            .ok_or_else(|| TransportError::ConnectionFailed("topic not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            TransportError::ConnectionFailed(format!("failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            compression = self.compression.as_deref().unwrap_or("none"),
            "redpanda transport created"
        );

        Ok(RedpandaTransport {
            producer,
            topic,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
        })
    }
}

/// Consumer-group loop feeding inbound payloads to a dispatch function.
///
/// [`run`](RedpandaConsumer::run) loops until the surrounding task is
/// cancelled; host it under a supervised task so broker hiccups restart it
/// with backoff.
pub struct RedpandaConsumer {
    brokers: String,
    group: String,
    topics: Vec<String>,
    auto_offset_reset: String,
}

impl RedpandaConsumer {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaConsumerBuilder {
        RedpandaConsumerBuilder::default()
    }

    /// Consume the configured topics forever, feeding every payload to
    /// `dispatch`.
    ///
    /// Offsets are committed after dispatch returns, so an envelope that
    /// crashes the process before commit is redelivered (at-least-once).
    /// Dispatch errors never stop the loop: [`CallError::NoRequestInPool`]
    /// is a routine late/duplicate delivery and is logged at debug, other
    /// errors at warn.
    ///
    /// # Errors
    ///
    /// Returns an error when the consumer cannot be created or subscribed;
    /// receive errors inside the loop are logged and skipped.
    pub async fn run(&self, dispatch: Dispatch) -> Result<(), anyhow::Error> {
        use futures::StreamExt;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()?;

        let topic_refs: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topic_refs)?;

        tracing::info!(
            topics = ?self.topics,
            group = %self.group,
            auto_offset_reset = %self.auto_offset_reset,
            "consumer subscribed"
        );

        let mut stream = consumer.stream();
        while let Some(next) = stream.next().await {
            match next {
                Ok(message) => {
                    let Some(payload) = message.payload() else {
                        tracing::warn!(
                            topic = message.topic(),
                            partition = message.partition(),
                            offset = message.offset(),
                            "message without payload skipped"
                        );
                        Self::commit(&consumer, &message);
                        continue;
                    };

                    match dispatch(payload.to_vec()).await {
                        Ok(()) => {}
                        Err(error) if error.is_no_request_in_pool() => {
                            tracing::debug!(error = %error, "no pending request for envelope");
                        }
                        Err(error) => {
                            metrics::counter!("reqbus_consume_errors_total").increment(1);
                            tracing::warn!(
                                topic = message.topic(),
                                partition = message.partition(),
                                offset = message.offset(),
                                error = %error,
                                "dispatch failed"
                            );
                        }
                    }

                    // Commit after dispatch: a crash before this point
                    // redelivers the envelope.
                    Self::commit(&consumer, &message);
                }
                Err(error) => {
                    metrics::counter!("reqbus_consume_errors_total").increment(1);
                    tracing::warn!(error = %error, "failed to receive message");
                }
            }
        }

        tracing::info!(group = %self.group, "consumer stream ended");
        Ok(())
    }

    fn commit(consumer: &StreamConsumer, message: &rdkafka::message::BorrowedMessage<'_>) {
        if let Err(error) = consumer.commit_message(message, CommitMode::Async) {
            tracing::warn!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                error = %error,
                "failed to commit offset (message may be redelivered)"
            );
        }
    }
}

/// Builder for [`RedpandaConsumer`].
#[derive(Default)]
pub struct RedpandaConsumerBuilder {
    brokers: Option<String>,
    group: Option<String>,
    topics: Vec<String>,
    auto_offset_reset: Option<String>,
}

impl RedpandaConsumerBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the consumer group id. Replicas of the same service share a
    /// group to split partitions between them.
    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set the topics to consume.
    #[must_use]
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Set where a new consumer group starts reading: "earliest", "latest"
    /// or "error".
    ///
    /// Default: "latest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaConsumer`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] when brokers, group or
    /// topics are missing.
    pub fn build(self) -> Result<RedpandaConsumer, TransportError> {
        let brokers = self
            .brokers
            .ok_or_else(|| TransportError::ConnectionFailed("brokers not configured".to_string()))?;
        let group = self
            .group
            .ok_or_else(|| TransportError::ConnectionFailed("group not configured".to_string()))?;
        if self.topics.is_empty() {
            return Err(TransportError::ConnectionFailed(
                "no topics configured".to_string(),
            ));
        }

        Ok(RedpandaConsumer {
            brokers,
            group,
            topics: self.topics,
            auto_offset_reset: self.auto_offset_reset.unwrap_or_else(|| "latest".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_builder_requires_brokers_and_topic() {
        assert!(matches!(
            RedpandaTransport::builder().topic("t").build(),
            Err(TransportError::ConnectionFailed(_))
        ));
        assert!(matches!(
            RedpandaTransport::builder().brokers("localhost:9092").build(),
            Err(TransportError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn consumer_builder_requires_topics() {
        let err = RedpandaConsumer::builder()
            .brokers("localhost:9092")
            .group("g")
            .build();
        assert!(matches!(err, Err(TransportError::ConnectionFailed(_))));
    }

    #[test]
    fn consumer_builder_defaults_offset_reset() {
        let consumer = RedpandaConsumer::builder()
            .brokers("localhost:9092")
            .group("g")
            .topics(["t"])
            .build()
            .map_err(|e| e.to_string());
        assert_eq!(
            consumer.map(|c| c.auto_offset_reset),
            Ok("latest".to_string())
        );
    }

    #[test]
    fn transport_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaTransport>();
        assert_sync::<RedpandaTransport>();
        assert_send::<RedpandaConsumer>();
        assert_sync::<RedpandaConsumer>();
    }
}
