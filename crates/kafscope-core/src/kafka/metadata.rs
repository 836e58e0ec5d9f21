//! Owned cluster metadata snapshots.
//!
//! rdkafka's `Metadata` borrows native memory, so it is copied into
//! plain structs on the blocking thread that fetched it.

use std::sync::Arc;
use std::time::Duration;

use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::metadata::Metadata;
use serde::Serialize;

use super::blocking;
use crate::error::ClientError;

/// A broker as reported by cluster metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerIdentity {
    /// Broker id.
    pub id: i32,
    /// `host:port`.
    pub address: String,
}

/// One partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    /// Partition id.
    pub id: i32,
    /// Leader broker id.
    pub leader: i32,
    /// Replica broker ids.
    pub replicas: Vec<i32>,
    /// In-sync replica broker ids.
    pub isr: Vec<i32>,
}

/// One topic with its partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    /// Topic name.
    pub name: String,
    /// Partitions in id order.
    pub partitions: Vec<PartitionMetadata>,
    /// Per-topic error reported by the broker.
    pub error: Option<String>,
}

impl TopicMetadata {
    /// Replication factor, taken from the first partition.
    #[must_use]
    pub fn replication_factor(&self) -> usize {
        self.partitions.first().map_or(0, |p| p.replicas.len())
    }

    /// Returns `true` for the topics the broker itself owns.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        is_internal_topic(&self.name)
    }
}

/// Topics written by the broker: group commits and transaction state.
/// User topics may also start with `__`.
pub const INTERNAL_TOPICS: [&str; 2] = ["__consumer_offsets", "__transaction_state"];

/// Returns `true` if `name` is one of [`INTERNAL_TOPICS`].
#[must_use]
pub fn is_internal_topic(name: &str) -> bool {
    INTERNAL_TOPICS.contains(&name)
}

/// Brokers and topics known to the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterMetadata {
    /// Brokers sorted by id.
    pub brokers: Vec<BrokerIdentity>,
    /// Topics in broker order.
    pub topics: Vec<TopicMetadata>,
}

impl ClusterMetadata {
    fn from_rdkafka(metadata: &Metadata) -> Self {
        let mut brokers: Vec<BrokerIdentity> = metadata
            .brokers()
            .iter()
            .map(|b| BrokerIdentity {
                id: b.id(),
                address: format!("{}:{}", b.host(), b.port()),
            })
            .collect();
        brokers.sort_by_key(|b| b.id);

        let topics = metadata
            .topics()
            .iter()
            .map(|t| {
                let mut partitions: Vec<PartitionMetadata> = t
                    .partitions()
                    .iter()
                    .map(|p| PartitionMetadata {
                        id: p.id(),
                        leader: p.leader(),
                        replicas: p.replicas().to_vec(),
                        isr: p.isr().to_vec(),
                    })
                    .collect();
                partitions.sort_by_key(|p| p.id);
                TopicMetadata {
                    name: t.name().to_string(),
                    partitions,
                    error: t.error().map(|e| RDKafkaErrorCode::from(e).to_string()),
                }
            })
            .collect();

        Self { brokers, topics }
    }

    /// Looks up a topic by name.
    #[must_use]
    pub fn topic(&self, name: &str) -> Option<&TopicMetadata> {
        self.topics.iter().find(|t| t.name == name)
    }
}

/// Fetches metadata for one topic or, with `None`, the whole cluster.
///
/// # Errors
///
/// Returns a classified `ClientError` if the broker request fails.
pub async fn fetch_metadata(
    client: Arc<BaseConsumer>,
    topic: Option<String>,
    timeout: Duration,
) -> Result<ClusterMetadata, ClientError> {
    blocking(move || {
        let metadata = client
            .fetch_metadata(topic.as_deref(), timeout)
            .map_err(|e| ClientError::from_kafka("fetch metadata", &e))?;
        Ok(ClusterMetadata::from_rdkafka(&metadata))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(name: &str, replicas: usize) -> TopicMetadata {
        TopicMetadata {
            name: name.into(),
            partitions: vec![PartitionMetadata {
                id: 0,
                leader: 1,
                replicas: (1..=replicas as i32).collect(),
                isr: vec![1],
            }],
            error: None,
        }
    }

    #[test]
    fn test_replication_factor() {
        assert_eq!(topic("orders", 3).replication_factor(), 3);
        let empty = TopicMetadata {
            name: "x".into(),
            partitions: vec![],
            error: None,
        };
        assert_eq!(empty.replication_factor(), 0);
    }

    #[test]
    fn test_internal_topics() {
        assert!(topic("__consumer_offsets", 1).is_internal());
        assert!(topic("__transaction_state", 50).is_internal());
        assert!(!topic("orders", 1).is_internal());
        assert!(!topic("__audit", 1).is_internal());
    }

    #[test]
    fn test_topic_lookup() {
        let metadata = ClusterMetadata {
            brokers: vec![],
            topics: vec![topic("a", 1), topic("b", 1)],
        };
        assert!(metadata.topic("b").is_some());
        assert!(metadata.topic("c").is_none());
    }
}
