//! Consumer group administration.
//!
//! Lists groups with their members, deletes groups, and computes
//! committed offsets and lag per partition. Offset lookups go through
//! [`GroupOffsetSource`]; watermark lookups fan out one task per
//! partition and the rows are merged once all tasks finish.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::AdminOptions;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::groups::GroupList;
use rdkafka::{Offset, TopicPartitionList};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::blocking;
use super::connection::{KafkaAdmin, KafkaClients};
use super::metadata::{fetch_metadata, is_internal_topic};
use crate::error::ClientError;

/// A member of a consumer group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupMember {
    /// Broker-assigned member id.
    pub member_id: String,
    /// `client.id` of the member.
    pub client_id: String,
    /// Host the member connects from.
    pub client_host: String,
}

/// A consumer group and its members. Groups without members are valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerGroup {
    /// Group id.
    pub name: String,
    /// Coordinator state, e.g. `Stable` or `Empty`.
    pub state: String,
    /// Protocol type, usually `consumer`.
    pub protocol_type: String,
    /// Current members.
    pub members: Vec<GroupMember>,
}

/// Committed offset and lag of one partition for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicPartitionOffset {
    /// Topic name.
    pub topic: String,
    /// Partition id.
    pub partition: i32,
    /// Offset committed by the group.
    pub committed: i64,
    /// Log end offset; absent when the lookup failed.
    pub high_watermark: Option<i64>,
    /// `high_watermark - committed`, never negative; absent when the
    /// lookup failed.
    pub lag: Option<i64>,
    /// Why the watermark lookup failed.
    pub error: Option<String>,
}

impl TopicPartitionOffset {
    fn new(topic: String, partition: i32, committed: i64, watermark: Result<i64, String>) -> Self {
        match watermark {
            Ok(hwm) => Self {
                topic,
                partition,
                committed,
                high_watermark: Some(hwm),
                lag: Some((hwm - committed).max(0)),
                error: None,
            },
            Err(error) => Self {
                topic,
                partition,
                committed,
                high_watermark: None,
                lag: None,
                error: Some(error),
            },
        }
    }
}

/// Consumer group administration for one cluster.
#[derive(Clone)]
pub struct GroupAdmin {
    admin: Arc<KafkaAdmin>,
    metadata: Arc<BaseConsumer>,
    offsets: Arc<dyn GroupOffsetSource>,
    timeout: Duration,
}

impl GroupAdmin {
    /// Creates the service from a connected cluster.
    #[must_use]
    pub fn new(clients: &KafkaClients) -> Self {
        Self {
            admin: clients.admin(),
            metadata: clients.metadata_client(),
            offsets: Arc::new(KafkaGroupOffsets::new(clients)),
            timeout: clients.timeout(),
        }
    }

    /// Lists every group with its members, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns a classified `ClientError` if the group list request fails.
    pub async fn list_groups(&self) -> Result<Vec<ConsumerGroup>, ClientError> {
        let client = Arc::clone(&self.metadata);
        let timeout = self.timeout;
        let mut groups = blocking(move || {
            let list = client
                .fetch_group_list(None, timeout)
                .map_err(|e| ClientError::from_kafka("list consumer groups", &e))?;
            Ok(groups_from_list(&list))
        })
        .await?;
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = groups.len(), "listed consumer groups");
        Ok(groups)
    }

    /// Deletes a consumer group.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` for unknown groups and
    /// `ClientError::Conflict` for groups that still have members.
    pub async fn delete_group(&self, name: &str) -> Result<(), ClientError> {
        if name.is_empty() {
            return Err(ClientError::InvalidRequest("group name is required".into()));
        }
        let options = AdminOptions::new()
            .operation_timeout(Some(self.timeout))
            .request_timeout(Some(self.timeout));
        let results = self
            .admin
            .delete_groups(&[name], &options)
            .await
            .map_err(|e| ClientError::from_kafka("delete group", &e))?;
        match results.into_iter().next() {
            Some(Ok(_)) => {
                info!(group = %name, "deleted consumer group");
                Ok(())
            }
            Some(Err((group, code))) => Err(ClientError::from_code(
                &format!("delete group '{group}'"),
                code,
            )),
            None => Err(ClientError::Protocol("delete group: empty response".into())),
        }
    }

    /// Lists committed offsets and lag for every partition the group has
    /// committed to, sorted by topic and partition.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if metadata or committed offsets cannot be
    /// fetched. Per-partition watermark failures are reported in the row.
    pub async fn list_offsets(&self, group: &str) -> Result<Vec<TopicPartitionOffset>, ClientError> {
        group_offsets(Arc::clone(&self.offsets), group).await
    }
}

/// Offset lookups behind [`GroupAdmin::list_offsets`].
#[async_trait]
pub trait GroupOffsetSource: Send + Sync {
    /// Every `(topic, partition)` of the cluster.
    async fn topic_partitions(&self) -> Result<Vec<(String, i32)>, ClientError>;

    /// Committed offsets of `group` as `(topic, partition, offset)`.
    /// Partitions the group never committed to are left out.
    async fn committed_offsets(
        &self,
        group: &str,
        partitions: Vec<(String, i32)>,
    ) -> Result<Vec<(String, i32, i64)>, ClientError>;

    /// Next offset to be written to the partition.
    async fn high_watermark(&self, topic: &str, partition: i32) -> Result<i64, ClientError>;
}

/// Committed offsets of `group` with one watermark task per partition.
///
/// # Errors
///
/// Fails if the partition listing or the committed offsets cannot be
/// fetched. A failed watermark lookup only marks its own row.
pub async fn group_offsets(
    source: Arc<dyn GroupOffsetSource>,
    group: &str,
) -> Result<Vec<TopicPartitionOffset>, ClientError> {
    if group.is_empty() {
        return Err(ClientError::InvalidRequest("group name is required".into()));
    }
    let partitions: Vec<(String, i32)> = source
        .topic_partitions()
        .await?
        .into_iter()
        .filter(|(topic, _)| !is_internal_topic(topic))
        .collect();
    if partitions.is_empty() {
        return Ok(Vec::new());
    }
    let committed = source.committed_offsets(group, partitions).await?;

    let mut tasks = JoinSet::new();
    for (topic, partition, offset) in committed {
        let source = Arc::clone(&source);
        tasks.spawn(async move {
            let watermark = source
                .high_watermark(&topic, partition)
                .await
                .map_err(|e| {
                    warn!(topic = %topic, partition, error = %e, "watermark lookup failed");
                    e.to_string()
                });
            TopicPartitionOffset::new(topic, partition, offset, watermark)
        });
    }

    let mut rows = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(row) => rows.push(row),
            Err(e) => return Err(ClientError::Internal(format!("offset task failed: {e}"))),
        }
    }
    sort_rows(&mut rows);
    debug!(group = %group, partitions = rows.len(), "listed group offsets");
    Ok(rows)
}

/// [`GroupOffsetSource`] over a connected cluster.
#[derive(Clone)]
pub struct KafkaGroupOffsets {
    metadata: Arc<BaseConsumer>,
    consumer_config: ClientConfig,
    timeout: Duration,
}

impl KafkaGroupOffsets {
    /// Creates a source sharing the cluster's metadata client.
    #[must_use]
    pub fn new(clients: &KafkaClients) -> Self {
        Self {
            metadata: clients.metadata_client(),
            consumer_config: clients.consumer_config(None),
            timeout: clients.timeout(),
        }
    }
}

#[async_trait]
impl GroupOffsetSource for KafkaGroupOffsets {
    async fn topic_partitions(&self) -> Result<Vec<(String, i32)>, ClientError> {
        let snapshot = fetch_metadata(Arc::clone(&self.metadata), None, self.timeout).await?;
        Ok(snapshot
            .topics
            .iter()
            .flat_map(|t| t.partitions.iter().map(|p| (t.name.clone(), p.id)))
            .collect())
    }

    async fn committed_offsets(
        &self,
        group: &str,
        partitions: Vec<(String, i32)>,
    ) -> Result<Vec<(String, i32, i64)>, ClientError> {
        let mut tpl = TopicPartitionList::new();
        for (topic, partition) in &partitions {
            tpl.add_partition(topic, *partition);
        }
        let mut config = self.consumer_config.clone();
        config.set("group.id", group);
        let timeout = self.timeout;
        blocking(move || {
            let consumer: BaseConsumer = config
                .create()
                .map_err(|e| ClientError::from_kafka("create group consumer", &e))?;
            let committed = consumer
                .committed_offsets(tpl, timeout)
                .map_err(|e| ClientError::from_kafka("fetch committed offsets", &e))?;
            Ok(committed_positions(&committed))
        })
        .await
    }

    async fn high_watermark(&self, topic: &str, partition: i32) -> Result<i64, ClientError> {
        let client = Arc::clone(&self.metadata);
        let topic = topic.to_string();
        let timeout = self.timeout;
        blocking(move || {
            client
                .fetch_watermarks(&topic, partition, timeout)
                .map(|(_, high)| high)
                .map_err(|e| ClientError::from_kafka("fetch watermarks", &e))
        })
        .await
    }
}

impl std::fmt::Debug for KafkaGroupOffsets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaGroupOffsets")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for GroupAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupAdmin")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn groups_from_list(list: &GroupList) -> Vec<ConsumerGroup> {
    list.groups()
        .iter()
        .map(|g| ConsumerGroup {
            name: g.name().to_string(),
            state: g.state().to_string(),
            protocol_type: g.protocol_type().to_string(),
            members: g
                .members()
                .iter()
                .map(|m| GroupMember {
                    member_id: m.id().to_string(),
                    client_id: m.client_id().to_string(),
                    client_host: m.client_host().to_string(),
                })
                .collect(),
        })
        .collect()
}

/// Keeps only partitions that carry a real committed offset.
fn committed_positions(tpl: &TopicPartitionList) -> Vec<(String, i32, i64)> {
    tpl.elements()
        .iter()
        .filter_map(|e| match e.offset() {
            Offset::Offset(o) if o >= 0 => Some((e.topic().to_string(), e.partition(), o)),
            _ => None,
        })
        .collect()
}

fn sort_rows(rows: &mut [TopicPartitionOffset]) {
    rows.sort_by(|a, b| a.topic.cmp(&b.topic).then(a.partition.cmp(&b.partition)));
}
