//! Partition-level access to a topic.
//!
//! The read engine only talks to [`PartitionSource`] and
//! [`PartitionStream`]. [`KafkaPartitionSource`] backs them with
//! librdkafka: watermark and time-index lookups run on the blocking pool,
//! and each partition gets its own assigned `StreamConsumer`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{Offset, TopicPartitionList};
use tracing::debug;

use super::types::{PartitionOffsets, RawMessage, RecordHeader};
use crate::error::ClientError;
use crate::kafka::{blocking, KafkaClients};

/// Offset and consumer access for the partitions of a topic.
#[async_trait]
pub trait PartitionSource: Send + Sync {
    /// Oldest retained offset and next offset to be written.
    async fn fetch_offsets(&self, topic: &str, partition: i32)
        -> Result<PartitionOffsets, ClientError>;

    /// For each partition, the first offset whose timestamp is at or after
    /// `timestamp_ms`, or `None` if there is no such record.
    async fn offsets_for_timestamp(
        &self,
        topic: &str,
        partitions: &[i32],
        timestamp_ms: i64,
    ) -> Result<HashMap<i32, Option<i64>>, ClientError>;

    /// Opens a consumer positioned at `start`.
    async fn open(
        &self,
        topic: &str,
        partition: i32,
        start: i64,
    ) -> Result<Box<dyn PartitionStream>, ClientError>;
}

/// What a partition stream yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionEvent {
    /// A record.
    Message(RawMessage),
    /// The consumer caught up with the partition's high watermark.
    ///
    /// Offsets below the watermark may never be delivered (transaction
    /// markers, compacted records), so bounded reads stop here.
    EndOfPartition,
}

/// Messages of one partition in offset order.
#[async_trait]
pub trait PartitionStream: Send {
    /// Waits for the next message or end-of-partition signal. Errors are
    /// terminal for the partition.
    async fn next_event(&mut self) -> Result<PartitionEvent, ClientError>;
}

/// [`PartitionSource`] over a connected cluster.
#[derive(Clone)]
pub struct KafkaPartitionSource {
    metadata: Arc<BaseConsumer>,
    consumer_config: ClientConfig,
    timeout: Duration,
}

impl KafkaPartitionSource {
    /// Creates a source sharing the cluster's metadata client.
    #[must_use]
    pub fn new(clients: &KafkaClients) -> Self {
        Self {
            metadata: clients.metadata_client(),
            consumer_config: reader_config(clients.consumer_config(None)),
            timeout: clients.timeout(),
        }
    }
}

impl std::fmt::Debug for KafkaPartitionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaPartitionSource")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Reader consumers are assigned, never subscribed, and store no offsets.
/// They report end of partition so bounded reads can stop short of
/// offsets that are never delivered.
fn reader_config(mut config: ClientConfig) -> ClientConfig {
    config.set("group.id", format!("kafscope-reader-{}", uuid::Uuid::new_v4()));
    config.set("enable.auto.offset.store", "false");
    config.set("enable.partition.eof", "true");
    config
}

#[async_trait]
impl PartitionSource for KafkaPartitionSource {
    async fn fetch_offsets(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<PartitionOffsets, ClientError> {
        let client = Arc::clone(&self.metadata);
        let topic = topic.to_string();
        let timeout = self.timeout;
        blocking(move || {
            let (low, high) = client
                .fetch_watermarks(&topic, partition, timeout)
                .map_err(|e| ClientError::from_kafka("fetch watermarks", &e))?;
            Ok(PartitionOffsets::new(low, high))
        })
        .await
    }

    async fn offsets_for_timestamp(
        &self,
        topic: &str,
        partitions: &[i32],
        timestamp_ms: i64,
    ) -> Result<HashMap<i32, Option<i64>>, ClientError> {
        let mut tpl = TopicPartitionList::new();
        for &partition in partitions {
            tpl.add_partition_offset(topic, partition, Offset::Offset(timestamp_ms))
                .map_err(|e| ClientError::from_kafka("offsets for timestamp", &e))?;
        }
        let client = Arc::clone(&self.metadata);
        let timeout = self.timeout;
        blocking(move || {
            let resolved = client
                .offsets_for_times(tpl, timeout)
                .map_err(|e| ClientError::from_kafka("offsets for timestamp", &e))?;
            Ok(resolved
                .elements()
                .iter()
                .map(|e| {
                    let offset = match e.offset() {
                        Offset::Offset(o) if o >= 0 => Some(o),
                        _ => None,
                    };
                    (e.partition(), offset)
                })
                .collect())
        })
        .await
    }

    async fn open(
        &self,
        topic: &str,
        partition: i32,
        start: i64,
    ) -> Result<Box<dyn PartitionStream>, ClientError> {
        let consumer: StreamConsumer = self
            .consumer_config
            .create()
            .map_err(|e| ClientError::from_kafka("create partition consumer", &e))?;
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(start))
            .map_err(|e| ClientError::from_kafka("assign partition", &e))?;
        consumer
            .assign(&tpl)
            .map_err(|e| ClientError::from_kafka("assign partition", &e))?;
        debug!(topic = %topic, partition, start, "opened partition consumer");
        Ok(Box::new(KafkaPartitionStream { consumer, partition }))
    }
}

struct KafkaPartitionStream {
    consumer: StreamConsumer,
    partition: i32,
}

#[async_trait]
impl PartitionStream for KafkaPartitionStream {
    async fn next_event(&mut self) -> Result<PartitionEvent, ClientError> {
        match self.consumer.recv().await {
            Ok(message) => Ok(PartitionEvent::Message(raw_message(&message))),
            Err(KafkaError::PartitionEOF(_)) => Ok(PartitionEvent::EndOfPartition),
            Err(e) => Err(ClientError::Partition {
                partition: self.partition,
                message: e.to_string(),
            }),
        }
    }
}

fn raw_message(message: &BorrowedMessage<'_>) -> RawMessage {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| RecordHeader {
                    key: h.key.to_string(),
                    value: h.value.map(<[u8]>::to_vec).unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();
    RawMessage {
        partition: message.partition(),
        offset: message.offset(),
        timestamp: message.timestamp().to_millis(),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec),
        headers,
    }
}
