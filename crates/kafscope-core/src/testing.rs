//! Testing utilities.
//!
//! In-memory stand-ins for the broker and the schema registry, used to
//! drive the read engine, group offset listing and the Avro decoder
//! without a cluster.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::ClientError;
use crate::kafka::GroupOffsetSource;
use crate::reader::source::{PartitionEvent, PartitionSource, PartitionStream};
use crate::reader::types::{PartitionOffsets, RawMessage};
use crate::registry::Schema;
use crate::serde::avro::SchemaResolver;

#[derive(Debug, Default)]
struct MemoryPartition {
    /// Oldest retained offset.
    log_start: i64,
    /// Every appended message; `messages[i].offset == i`.
    messages: Vec<RawMessage>,
    /// Offsets taken by control markers; streams never deliver them.
    markers: HashSet<i64>,
    offsets_error: Option<String>,
    fail_at: Option<(i64, String)>,
}

impl MemoryPartition {
    fn next_offset(&self) -> i64 {
        i64::try_from(self.messages.len()).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Default)]
struct LogState {
    partitions: Mutex<HashMap<(String, i32), MemoryPartition>>,
    appended: Notify,
    open_streams: AtomicUsize,
}

/// In-memory partitioned log implementing [`PartitionSource`].
///
/// Offsets start at 0 in every partition. Streams wait for appends, so
/// live reads see records added after they opened.
#[derive(Debug, Default)]
pub struct MemoryLog {
    state: Arc<LogState>,
}

impl MemoryLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `partitions` empty partitions for `topic`.
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        let mut guard = self.state.partitions.lock();
        for partition in 0..partitions {
            guard.entry((topic.to_string(), partition)).or_default();
        }
    }

    /// Appends a record and returns its offset.
    ///
    /// # Panics
    ///
    /// Panics if the partition was not created.
    pub fn append(
        &self,
        topic: &str,
        partition: i32,
        key: &str,
        value: impl Into<Vec<u8>>,
        timestamp: i64,
    ) -> i64 {
        self.append_message(
            topic,
            RawMessage {
                partition,
                offset: 0,
                timestamp: Some(timestamp),
                key: Some(key.as_bytes().to_vec()),
                value: Some(value.into()),
                headers: Vec::new(),
            },
        )
    }

    /// Appends a fully specified message; its offset is reassigned.
    ///
    /// # Panics
    ///
    /// Panics if the partition was not created.
    pub fn append_message(&self, topic: &str, mut message: RawMessage) -> i64 {
        let offset = {
            let mut guard = self.state.partitions.lock();
            let log = guard
                .get_mut(&(topic.to_string(), message.partition))
                .unwrap_or_else(|| panic!("unknown partition {topic}/{}", message.partition));
            message.offset = log.next_offset();
            let offset = message.offset;
            log.messages.push(message);
            offset
        };
        self.state.appended.notify_waiters();
        offset
    }

    /// Appends a transaction control marker: it takes an offset and moves
    /// the high watermark, but no stream ever delivers it.
    ///
    /// # Panics
    ///
    /// Panics if the partition was not created.
    pub fn append_marker(&self, topic: &str, partition: i32) -> i64 {
        let offset = self.append_message(
            topic,
            RawMessage {
                partition,
                offset: 0,
                timestamp: None,
                key: None,
                value: None,
                headers: Vec::new(),
            },
        );
        if let Some(log) = self
            .state
            .partitions
            .lock()
            .get_mut(&(topic.to_string(), partition))
        {
            log.markers.insert(offset);
        }
        offset
    }

    /// Drops records below `offset` from retention.
    pub fn truncate_before(&self, topic: &str, partition: i32, offset: i64) {
        if let Some(log) = self
            .state
            .partitions
            .lock()
            .get_mut(&(topic.to_string(), partition))
        {
            log.log_start = offset.clamp(log.log_start, log.next_offset());
        }
    }

    /// Makes offset lookups for the partition fail.
    pub fn fail_offsets(&self, topic: &str, partition: i32, message: &str) {
        if let Some(log) = self
            .state
            .partitions
            .lock()
            .get_mut(&(topic.to_string(), partition))
        {
            log.offsets_error = Some(message.to_string());
        }
    }

    /// Makes streams on the partition fail when they reach `offset`.
    pub fn fail_at(&self, topic: &str, partition: i32, offset: i64, message: &str) {
        if let Some(log) = self
            .state
            .partitions
            .lock()
            .get_mut(&(topic.to_string(), partition))
        {
            log.fail_at = Some((offset, message.to_string()));
        }
        self.state.appended.notify_waiters();
    }

    /// Number of streams opened so far.
    #[must_use]
    pub fn open_streams(&self) -> usize {
        self.state.open_streams.load(Ordering::SeqCst)
    }
}

impl LogState {
    fn with_partition<T>(
        &self,
        topic: &str,
        partition: i32,
        f: impl FnOnce(&MemoryPartition) -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let guard = self.partitions.lock();
        let log = guard
            .get(&(topic.to_string(), partition))
            .ok_or_else(|| ClientError::NotFound(format!("partition {topic}/{partition}")))?;
        f(log)
    }
}

#[async_trait]
impl PartitionSource for MemoryLog {
    async fn fetch_offsets(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<PartitionOffsets, ClientError> {
        self.state.with_partition(topic, partition, |log| {
            if let Some(message) = &log.offsets_error {
                return Err(ClientError::Protocol(message.clone()));
            }
            Ok(PartitionOffsets::new(log.log_start, log.next_offset()))
        })
    }

    async fn offsets_for_timestamp(
        &self,
        topic: &str,
        partitions: &[i32],
        timestamp_ms: i64,
    ) -> Result<HashMap<i32, Option<i64>>, ClientError> {
        let mut resolved = HashMap::with_capacity(partitions.len());
        for &partition in partitions {
            let offset = self.state.with_partition(topic, partition, |log| {
                Ok(log
                    .messages
                    .iter()
                    .filter(|m| m.offset >= log.log_start && !log.markers.contains(&m.offset))
                    .find(|m| m.timestamp.is_some_and(|ts| ts >= timestamp_ms))
                    .map(|m| m.offset))
            })?;
            resolved.insert(partition, offset);
        }
        Ok(resolved)
    }

    async fn open(
        &self,
        topic: &str,
        partition: i32,
        start: i64,
    ) -> Result<Box<dyn PartitionStream>, ClientError> {
        self.state.with_partition(topic, partition, |_| Ok(()))?;
        self.state.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryStream {
            state: Arc::clone(&self.state),
            topic: topic.to_string(),
            partition,
            next: start,
            eof_at: None,
        }))
    }
}

struct MemoryStream {
    state: Arc<LogState>,
    topic: String,
    partition: i32,
    next: i64,
    /// Watermark at which end of partition was last reported.
    eof_at: Option<i64>,
}

impl MemoryStream {
    fn poll_log(&mut self) -> Result<Option<PartitionEvent>, ClientError> {
        let (message, high_watermark) =
            self.state.with_partition(&self.topic, self.partition, |log| {
                let next = self.next.max(log.log_start);
                if let Some((offset, message)) = &log.fail_at {
                    if next >= *offset {
                        return Err(ClientError::Partition {
                            partition: self.partition,
                            message: message.clone(),
                        });
                    }
                }
                let message = log
                    .messages
                    .iter()
                    .skip(usize::try_from(next).unwrap_or(usize::MAX))
                    .find(|m| !log.markers.contains(&m.offset))
                    .cloned();
                Ok((message, log.next_offset()))
            })?;
        if let Some(message) = message {
            self.next = message.offset + 1;
            return Ok(Some(PartitionEvent::Message(message)));
        }
        self.next = self.next.max(high_watermark);
        if self.eof_at == Some(high_watermark) {
            return Ok(None);
        }
        self.eof_at = Some(high_watermark);
        Ok(Some(PartitionEvent::EndOfPartition))
    }
}

#[async_trait]
impl PartitionStream for MemoryStream {
    async fn next_event(&mut self) -> Result<PartitionEvent, ClientError> {
        loop {
            let state = Arc::clone(&self.state);
            let appended = state.appended.notified();
            if let Some(event) = self.poll_log()? {
                return Ok(event);
            }
            appended.await;
        }
    }
}

/// In-memory [`GroupOffsetSource`].
#[derive(Debug, Default)]
pub struct MemoryGroups {
    /// High watermark per partition, in creation order.
    partitions: Vec<((String, i32), i64)>,
    /// `(group, topic, partition)` to committed offset.
    commits: HashMap<(String, String, i32), i64>,
    watermark_errors: HashMap<(String, i32), String>,
    watermark_lookups: AtomicUsize,
}

impl MemoryGroups {
    /// A cluster with no topics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a partition whose log ends at `high_watermark`.
    #[must_use]
    pub fn with_partition(mut self, topic: &str, partition: i32, high_watermark: i64) -> Self {
        self.partitions
            .push(((topic.to_string(), partition), high_watermark));
        self
    }

    /// Records a commit of `offset` by `group`.
    #[must_use]
    pub fn commit(mut self, group: &str, topic: &str, partition: i32, offset: i64) -> Self {
        self.commits
            .insert((group.to_string(), topic.to_string(), partition), offset);
        self
    }

    /// Makes watermark lookups for the partition fail.
    #[must_use]
    pub fn fail_watermark(mut self, topic: &str, partition: i32, message: &str) -> Self {
        self.watermark_errors
            .insert((topic.to_string(), partition), message.to_string());
        self
    }

    /// Number of watermark lookups served.
    #[must_use]
    pub fn watermark_lookups(&self) -> usize {
        self.watermark_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupOffsetSource for MemoryGroups {
    async fn topic_partitions(&self) -> Result<Vec<(String, i32)>, ClientError> {
        Ok(self.partitions.iter().map(|(tp, _)| tp.clone()).collect())
    }

    async fn committed_offsets(
        &self,
        group: &str,
        partitions: Vec<(String, i32)>,
    ) -> Result<Vec<(String, i32, i64)>, ClientError> {
        Ok(partitions
            .into_iter()
            .filter_map(|(topic, partition)| {
                self.commits
                    .get(&(group.to_string(), topic.clone(), partition))
                    .map(|&offset| (topic, partition, offset))
            })
            .collect())
    }

    async fn high_watermark(&self, topic: &str, partition: i32) -> Result<i64, ClientError> {
        self.watermark_lookups.fetch_add(1, Ordering::SeqCst);
        let key = (topic.to_string(), partition);
        if let Some(message) = self.watermark_errors.get(&key) {
            return Err(ClientError::Protocol(message.clone()));
        }
        self.partitions
            .iter()
            .find(|(tp, _)| *tp == key)
            .map(|(_, hwm)| *hwm)
            .ok_or_else(|| ClientError::NotFound(format!("partition {topic}/{partition}")))
    }
}

/// In-memory [`SchemaResolver`].
#[derive(Debug, Default)]
pub struct StaticSchemas {
    schemas: HashMap<u32, String>,
    unreachable: Option<String>,
    lookups: AtomicUsize,
}

impl StaticSchemas {
    /// A resolver that knows no schemas.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers schema text under `id`.
    #[must_use]
    pub fn with_schema(mut self, id: u32, text: &str) -> Self {
        self.schemas.insert(id, text.to_string());
        self
    }

    /// Makes every lookup fail with a connectivity error.
    #[must_use]
    pub fn unreachable(mut self, message: &str) -> Self {
        self.unreachable = Some(message.to_string());
        self
    }

    /// Number of lookups served.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaResolver for StaticSchemas {
    async fn resolve(&self, id: u32) -> Result<Arc<Schema>, ClientError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.unreachable {
            return Err(ClientError::Connectivity(message.clone()));
        }
        let text = self
            .schemas
            .get(&id)
            .ok_or_else(|| ClientError::NotFound(format!("schema {id}")))?;
        Ok(Arc::new(Schema {
            id,
            subject: String::new(),
            version: 0,
            text: text.clone(),
            error: None,
        }))
    }
}
