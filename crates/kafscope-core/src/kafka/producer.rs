//! Record publishing.
//!
//! [`Publisher`] sends one operator-authored record at a time. The
//! partitioning strategy is chosen per record: a pinned partition is
//! used as-is, otherwise librdkafka hashes the key. No partitioner state
//! is shared between calls, so concurrent publishes need no locking.

use std::time::Duration;

use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use serde::Serialize;
use tracing::{debug, warn};

use super::connection::KafkaClients;
use crate::error::ClientError;

/// How the target partition of a record is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStrategy {
    /// Murmur2 hash of the key; random for null keys.
    KeyHash,
    /// Exactly this partition.
    Manual(i32),
}

/// A record to publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishRecord {
    /// Target topic.
    pub topic: String,
    /// Optional key.
    pub key: Option<Vec<u8>>,
    /// Value bytes.
    pub value: Vec<u8>,
    /// Explicit partition.
    pub partition: Option<i32>,
    /// Explicit timestamp in ms since epoch.
    pub timestamp: Option<i64>,
    /// Headers in send order.
    pub headers: Vec<(String, Vec<u8>)>,
}

impl PublishRecord {
    /// A record with the given value and no key.
    #[must_use]
    pub fn new(topic: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    /// Sets the key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Pins the record to a partition.
    #[must_use]
    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// The strategy used for this record.
    #[must_use]
    pub fn partition_strategy(&self) -> PartitionStrategy {
        match self.partition {
            Some(p) => PartitionStrategy::Manual(p),
            None => PartitionStrategy::KeyHash,
        }
    }

    fn validate(&self) -> Result<(), ClientError> {
        if self.topic.is_empty() {
            return Err(ClientError::InvalidRequest("topic is required".into()));
        }
        if let Some(p) = self.partition {
            if p < 0 {
                return Err(ClientError::InvalidRequest(format!(
                    "partition must be >= 0, got {p}"
                )));
            }
        }
        Ok(())
    }

    fn owned_headers(&self) -> Option<OwnedHeaders> {
        if self.headers.is_empty() {
            return None;
        }
        let headers = self
            .headers
            .iter()
            .fold(OwnedHeaders::new_with_capacity(self.headers.len()), |h, (k, v)| {
                h.insert(Header {
                    key: k,
                    value: Some(v),
                })
            });
        Some(headers)
    }
}

/// Where a published record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Published {
    /// Partition the record was written to.
    pub partition: i32,
    /// Offset assigned by the broker.
    pub offset: i64,
}

/// Publishes records to the active cluster.
#[derive(Clone)]
pub struct Publisher {
    producer: FutureProducer,
    timeout: Duration,
}

impl Publisher {
    /// Creates the service from a connected cluster.
    #[must_use]
    pub fn new(clients: &KafkaClients) -> Self {
        Self {
            producer: clients.producer(),
            timeout: clients.timeout(),
        }
    }

    /// Publishes one record and waits for the broker acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidRequest` for a malformed record or a
    /// classified broker error if delivery fails.
    pub async fn publish(&self, record: &PublishRecord) -> Result<Published, ClientError> {
        record.validate()?;

        let mut future_record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(&record.topic).payload(record.value.as_slice());
        if let Some(key) = &record.key {
            future_record = future_record.key(key.as_slice());
        }
        if let PartitionStrategy::Manual(p) = record.partition_strategy() {
            future_record = future_record.partition(p);
        }
        if let Some(ts) = record.timestamp {
            future_record = future_record.timestamp(ts);
        }
        if let Some(headers) = record.owned_headers() {
            future_record = future_record.headers(headers);
        }

        let (partition, offset) = self
            .producer
            .send(future_record, self.timeout)
            .await
            .map_err(|(e, _)| ClientError::from_kafka("publish", &e))?;
        debug!(
            topic = %record.topic,
            partition,
            offset,
            strategy = ?record.partition_strategy(),
            "published record"
        );
        Ok(Published { partition, offset })
    }

    /// Waits for in-flight deliveries. Used on cluster teardown.
    pub async fn flush(&self) {
        let producer = self.producer.clone();
        let timeout = self.timeout;
        let result = super::blocking(move || {
            producer
                .flush(timeout)
                .map_err(|e| ClientError::from_kafka("flush producer", &e))
        })
        .await;
        if let Err(e) = result {
            warn!(error = %e, "producer flush failed");
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
