//! Read sessions.
//!
//! [`start_read`] returns a [`ReadStarted`] handle immediately and runs the
//! session on a tokio task:
//!
//! ```text
//! fetch offsets (one task per partition)
//!   -> EmptyTopic | NoRecordsFound | fatal error
//!   -> compute ranges -> one consumer task per partition
//!        select { stop | next message }
//!        decode -> filter -> reserve slot -> send (races cancel)
//! supervisor joins all partition tasks; the channels close when it returns
//! ```
//!
//! Two tokens drive shutdown. `cancel` is the caller's: it stops reads and
//! abandons in-flight sends. `stop` is its child and is also triggered when
//! the delivery limit is reached; it only interrupts reads, so records
//! that already hold a slot are still delivered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Local;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::offsets::{
    offset_range, per_partition_limit, start_timestamp, timestamp_range, PartitionRange,
};
use super::source::{PartitionEvent, PartitionSource};
use super::stats::{ReadStats, ReadStatsSnapshot};
use super::types::{ConsumerRecord, PartitionOffsets, RawMessage, ReadDetails};
use crate::error::ClientError;
use crate::serde::avro::{AvroDecoder, DecodedPayload};

/// Records buffered between the partition tasks and the UI.
const RECORD_BUFFER: usize = 256;

/// Errors buffered between the partition tasks and the UI.
const ERROR_BUFFER: usize = 16;

/// Next message of a read session.
#[derive(Debug)]
pub enum ReadEvent {
    /// A record that passed the filter.
    Record(ConsumerRecord),
    /// Every requested partition is empty; nothing follows.
    EmptyTopic,
    /// No record is at or after the requested time; nothing follows.
    NoRecordsFound,
    /// A fatal error, or the error that stopped one partition.
    Failed(ClientError),
    /// All channels are closed.
    Finished,
}

/// Everything a session produced, gathered by [`ReadStarted::collect`].
#[derive(Debug, Default)]
pub struct ReadSummary {
    /// Delivered records in arrival order.
    pub records: Vec<ConsumerRecord>,
    /// The empty-topic signal fired.
    pub empty_topic: bool,
    /// The no-records signal fired.
    pub no_records_found: bool,
    /// Errors in arrival order.
    pub errors: Vec<ClientError>,
}

/// Cloneable cancel handle of a read session.
#[derive(Debug, Clone)]
pub struct ReadCancel(CancellationToken);

impl ReadCancel {
    /// Stops the session. Idempotent.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    /// Returns `true` once the session was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Handle to a running read session. Dropping it cancels the session.
#[must_use = "a read reports its records only through await_record"]
#[derive(Debug)]
pub struct ReadStarted {
    records: mpsc::Receiver<ConsumerRecord>,
    errors: mpsc::Receiver<ClientError>,
    empty_topic: oneshot::Receiver<()>,
    no_records: oneshot::Receiver<()>,
    records_open: bool,
    errors_open: bool,
    empty_open: bool,
    no_records_open: bool,
    cancel: CancellationToken,
    stats: Arc<ReadStats>,
}

impl ReadStarted {
    /// Stops the session. Records already buffered may still be received.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once the session was cancelled, by the caller or by
    /// a fatal error.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A cancel handle usable after the handle has been moved.
    #[must_use]
    pub fn cancel_handle(&self) -> ReadCancel {
        ReadCancel(self.cancel.clone())
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> ReadStatsSnapshot {
        self.stats.snapshot()
    }

    /// Waits for the next message. Returns [`ReadEvent::Finished`] once,
    /// and again on every later call, after all channels have closed.
    pub async fn await_record(&mut self) -> ReadEvent {
        loop {
            tokio::select! {
                biased;
                signal = &mut self.empty_topic, if self.empty_open => {
                    self.empty_open = false;
                    if signal.is_ok() {
                        return ReadEvent::EmptyTopic;
                    }
                }
                signal = &mut self.no_records, if self.no_records_open => {
                    self.no_records_open = false;
                    if signal.is_ok() {
                        return ReadEvent::NoRecordsFound;
                    }
                }
                record = self.records.recv(), if self.records_open => match record {
                    Some(record) => return ReadEvent::Record(record),
                    None => self.records_open = false,
                },
                error = self.errors.recv(), if self.errors_open => match error {
                    Some(error) => return ReadEvent::Failed(error),
                    None => self.errors_open = false,
                },
                else => return ReadEvent::Finished,
            }
        }
    }

    /// Drains the session.
    pub async fn collect(mut self) -> ReadSummary {
        let mut summary = ReadSummary::default();
        loop {
            match self.await_record().await {
                ReadEvent::Record(record) => summary.records.push(record),
                ReadEvent::EmptyTopic => summary.empty_topic = true,
                ReadEvent::NoRecordsFound => summary.no_records_found = true,
                ReadEvent::Failed(error) => summary.errors.push(error),
                ReadEvent::Finished => return summary,
            }
        }
    }
}

impl Drop for ReadStarted {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Starts a read session. Must be called from within a tokio runtime.
///
/// `cancel` becomes the session's cancel token; pass a child of a wider
/// token to have the session stopped along with it.
pub fn start_read(
    source: Arc<dyn PartitionSource>,
    decoder: Arc<AvroDecoder>,
    details: ReadDetails,
    cancel: CancellationToken,
) -> ReadStarted {
    let (records_tx, records) = mpsc::channel(RECORD_BUFFER);
    let (errors_tx, errors) = mpsc::channel(ERROR_BUFFER);
    let (empty_tx, empty_topic) = oneshot::channel();
    let (no_records_tx, no_records) = oneshot::channel();
    let stats = Arc::new(ReadStats::new());

    let session = Arc::new(Session {
        source,
        decoder,
        stop: cancel.child_token(),
        cancel: cancel.clone(),
        delivered: AtomicUsize::new(0),
        stats: Arc::clone(&stats),
        details,
    });
    tokio::spawn(session.run(Outputs {
        records: records_tx,
        errors: errors_tx,
        empty_topic: empty_tx,
        no_records: no_records_tx,
    }));

    ReadStarted {
        records,
        errors,
        empty_topic,
        no_records,
        records_open: true,
        errors_open: true,
        empty_open: true,
        no_records_open: true,
        cancel,
        stats,
    }
}

struct Outputs {
    records: mpsc::Sender<ConsumerRecord>,
    errors: mpsc::Sender<ClientError>,
    empty_topic: oneshot::Sender<()>,
    no_records: oneshot::Sender<()>,
}

enum Plan {
    Empty,
    NoRecords,
    Stream(Vec<PartitionRange>),
}

struct Session {
    source: Arc<dyn PartitionSource>,
    decoder: Arc<AvroDecoder>,
    details: ReadDetails,
    cancel: CancellationToken,
    stop: CancellationToken,
    delivered: AtomicUsize,
    stats: Arc<ReadStats>,
}

impl Session {
    /// Supervisor: plans the read, runs the partition tasks and returns
    /// once all of them are done, dropping the last senders.
    async fn run(self: Arc<Self>, outputs: Outputs) {
        let Outputs {
            records,
            errors,
            empty_topic,
            no_records,
        } = outputs;
        let topic = self.details.topic.clone();
        info!(
            topic = %topic,
            partitions = ?self.details.partitions,
            start = %self.details.start,
            limit = self.details.limit,
            "read session started"
        );

        let planned = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                debug!(topic = %topic, "read cancelled while fetching offsets");
                return;
            }
            planned = self.plan() => planned,
        };

        let ranges = match planned {
            Ok(Plan::Stream(ranges)) => ranges,
            Ok(Plan::Empty) => {
                info!(topic = %topic, "topic is empty");
                let _ = empty_topic.send(());
                return;
            }
            Ok(Plan::NoRecords) => {
                info!(topic = %topic, "no records at or after the requested time");
                let _ = no_records.send(());
                return;
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "read session failed");
                self.cancel.cancel();
                let _ = errors.try_send(e);
                return;
            }
        };

        let mut tasks = JoinSet::new();
        for range in ranges {
            debug!(
                topic = %topic,
                partition = range.partition,
                start = range.start,
                end = ?range.end,
                "partition range"
            );
            tasks.spawn(Arc::clone(&self).consume(range, records.clone(), errors.clone()));
        }
        drop(records);
        drop(errors);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(topic = %topic, error = %e, "partition task failed");
            }
        }
        let stats = self.stats.snapshot();
        info!(
            topic = %topic,
            delivered = stats.delivered,
            filtered = stats.filtered,
            cancelled = self.cancel.is_cancelled(),
            "read session finished"
        );
    }

    async fn plan(&self) -> Result<Plan, ClientError> {
        self.details.validate()?;
        let offsets = self.fetch_offsets().await?;

        let start = self.details.start;
        if !start.is_live() && offsets.iter().all(|(_, o)| o.is_empty()) {
            return Ok(Plan::Empty);
        }

        let ranges: Vec<PartitionRange> = if start.is_time_based() {
            let timestamp = start_timestamp(start, &Local::now()).ok_or_else(|| {
                ClientError::Internal(format!("no timestamp for start point {start}"))
            })?;
            let candidates: Vec<i32> = offsets
                .iter()
                .filter(|(_, o)| !o.is_empty())
                .map(|(p, _)| *p)
                .collect();
            let resolved = self
                .source
                .offsets_for_timestamp(&self.details.topic, &candidates, timestamp)
                .await?;
            offsets
                .iter()
                .filter_map(|(p, o)| timestamp_range(*p, *o, resolved.get(p).copied().flatten()))
                .collect()
        } else {
            let per_part = per_partition_limit(self.details.limit, self.details.partitions.len());
            offsets
                .iter()
                .filter_map(|(p, o)| offset_range(start, *p, *o, per_part))
                .collect()
        };

        if ranges.is_empty() {
            return Ok(Plan::NoRecords);
        }
        Ok(Plan::Stream(ranges))
    }

    /// Fetches offsets of every requested partition concurrently. The
    /// first failure wins; the remaining lookups are aborted.
    async fn fetch_offsets(&self) -> Result<Vec<(i32, PartitionOffsets)>, ClientError> {
        let mut tasks = JoinSet::new();
        for &partition in &self.details.partitions {
            let source = Arc::clone(&self.source);
            let topic = self.details.topic.clone();
            tasks.spawn(async move {
                source
                    .fetch_offsets(&topic, partition)
                    .await
                    .map(|offsets| (partition, offsets))
            });
        }

        let mut fetched = HashMap::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let (partition, offsets) = joined
                .map_err(|e| ClientError::Internal(format!("offset task failed: {e}")))??;
            fetched.insert(partition, offsets);
        }
        let mut offsets: Vec<(i32, PartitionOffsets)> = fetched.into_iter().collect();
        offsets.sort_unstable_by_key(|(p, _)| *p);
        Ok(offsets)
    }

    /// Most records one partition may deliver.
    fn partition_cap(&self) -> usize {
        if self.details.start.is_live() {
            usize::MAX
        } else {
            self.details.limit.div_ceil(self.details.partitions.len().max(1))
        }
    }

    /// Claims one delivery slot; returns its 1-based number.
    fn reserve_slot(&self) -> Option<usize> {
        let limit = self.details.limit;
        self.delivered
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .ok()
            .map(|previous| previous + 1)
    }

    fn passes(&self, record: &ConsumerRecord) -> bool {
        match &self.details.filter {
            Some(filter) => filter.matches(&record.key, &record.value),
            None => true,
        }
    }

    async fn consume(
        self: Arc<Self>,
        range: PartitionRange,
        records: mpsc::Sender<ConsumerRecord>,
        errors: mpsc::Sender<ClientError>,
    ) {
        let partition = range.partition;
        let opened = tokio::select! {
            biased;
            () = self.stop.cancelled() => return,
            opened = self.source.open(&self.details.topic, partition, range.start) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return self.partition_failed(partition, e, &errors).await,
        };

        let cap = self.partition_cap();
        let mut delivered_here = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                () = self.stop.cancelled() => return,
                next = stream.next_event() => next,
            };
            let message = match next {
                Ok(PartitionEvent::Message(message)) => message,
                Ok(PartitionEvent::EndOfPartition) if range.end.is_some() => return,
                Ok(PartitionEvent::EndOfPartition) => continue,
                Err(e) => return self.partition_failed(partition, e, &errors).await,
            };
            if message.offset < range.start {
                continue;
            }
            if range.end.is_some_and(|end| message.offset > end) {
                return;
            }
            let last = range.is_done_at(message.offset);

            let record = self.decode(message).await;
            if self.passes(&record) {
                let Some(slot) = self.reserve_slot() else {
                    self.stop.cancel();
                    return;
                };
                let has_error = record.error.is_some();
                let sent = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => false,
                    sent = records.send(record) => sent.is_ok(),
                };
                if !sent {
                    return;
                }
                self.stats.record_delivered();
                if has_error {
                    self.stats.record_decode_error();
                }
                delivered_here += 1;
                if slot >= self.details.limit {
                    debug!(topic = %self.details.topic, "read limit reached");
                    self.stop.cancel();
                    return;
                }
                if delivered_here >= cap {
                    return;
                }
            } else {
                self.stats.record_filtered();
            }
            if last {
                return;
            }
        }
    }

    async fn decode(&self, message: RawMessage) -> ConsumerRecord {
        let key = match &message.key {
            Some(bytes) => self.decoder.decode(bytes).await,
            None => DecodedPayload::default(),
        };
        let value = match &message.value {
            Some(bytes) => self.decoder.decode(bytes).await,
            None => DecodedPayload::default(),
        };
        ConsumerRecord {
            key: key.text,
            value: value.text,
            schema: value.schema,
            error: value.error.or(key.error),
            partition: message.partition,
            offset: message.offset,
            timestamp: message.timestamp,
            headers: message.headers,
        }
    }

    async fn partition_failed(
        &self,
        partition: i32,
        error: ClientError,
        errors: &mpsc::Sender<ClientError>,
    ) {
        let error = match error {
            e @ ClientError::Partition { .. } => e,
            other => ClientError::Partition {
                partition,
                message: other.to_string(),
            },
        };
        warn!(topic = %self.details.topic, partition, error = %error, "partition read stopped");
        self.stats.record_partition_error();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {}
            _ = errors.send(error) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    use crate::reader::types::{Filter, MatchMode, RecordHeader, StartPoint};
    use crate::testing::{MemoryLog, StaticSchemas};

    const WAIT: Duration = Duration::from_secs(5);

    fn seeded(topic: &str, partitions: i32, per_partition: usize) -> Arc<MemoryLog> {
        let log = MemoryLog::new();
        log.create_topic(topic, partitions);
        let mut key = 0;
        for partition in 0..partitions {
            for _ in 0..per_partition {
                log.append(topic, partition, &key.to_string(), format!("value-{key}"), 1_000 + key);
                key += 1;
            }
        }
        Arc::new(log)
    }

    fn read(log: &Arc<MemoryLog>, details: ReadDetails) -> ReadStarted {
        let source: Arc<dyn PartitionSource> = log.clone();
        start_read(
            source,
            Arc::new(AvroDecoder::text_only()),
            details,
            CancellationToken::new(),
        )
    }

    async fn collect(started: ReadStarted) -> ReadSummary {
        tokio::time::timeout(WAIT, started.collect())
            .await
            .expect("read session did not finish")
    }

    async fn next(started: &mut ReadStarted) -> ReadEvent {
        tokio::time::timeout(WAIT, started.await_record())
            .await
            .expect("no read event")
    }

    fn keys(summary: &ReadSummary) -> BTreeSet<i64> {
        summary
            .records
            .iter()
            .map(|r| r.key.parse().unwrap())
            .collect()
    }

    fn assert_offsets_increase(summary: &ReadSummary) {
        let mut last: HashMap<i32, i64> = HashMap::new();
        for record in &summary.records {
            if let Some(prev) = last.insert(record.partition, record.offset) {
                assert!(record.offset > prev, "partition {} went back", record.partition);
            }
        }
    }

    #[tokio::test]
    async fn test_empty_topic_beginning() {
        let log = seeded("t-empty", 1, 0);
        let mut started = read(&log, ReadDetails::new("t-empty", vec![0], StartPoint::Beginning, 50));
        assert!(matches!(next(&mut started).await, ReadEvent::EmptyTopic));
        assert!(matches!(next(&mut started).await, ReadEvent::Finished));
        assert!(matches!(next(&mut started).await, ReadEvent::Finished));
        assert_eq!(started.stats().delivered, 0);
    }

    #[tokio::test]
    async fn test_empty_topic_signalled_once_across_partitions() {
        let log = seeded("t", 3, 0);
        let summary = collect(read(&log, ReadDetails::new("t", vec![0, 1, 2], StartPoint::MostRecent, 10))).await;
        assert!(summary.empty_topic);
        assert!(summary.records.is_empty());
        assert!(summary.errors.is_empty());
    }

    #[tokio::test]
    async fn test_beginning_limit_single_partition() {
        let log = seeded("t", 1, 55);
        let summary = collect(read(&log, ReadDetails::new("t", vec![0], StartPoint::Beginning, 50))).await;
        let keys = keys(&summary);
        assert_eq!(summary.records.len(), 50);
        assert_eq!(keys.len(), 50);
        assert!(keys.contains(&0));
        assert_offsets_increase(&summary);
    }

    #[tokio::test]
    async fn test_most_recent_limit_single_partition() {
        let log = seeded("t", 1, 55);
        let summary = collect(read(&log, ReadDetails::new("t", vec![0], StartPoint::MostRecent, 50))).await;
        assert_eq!(summary.records.len(), 50);
        assert_eq!(keys(&summary).last(), Some(&54));
        assert_eq!(keys(&summary).first(), Some(&5));
    }

    #[tokio::test]
    async fn test_beginning_limit_across_partitions() {
        let log = seeded("t", 4, 13);
        let summary = collect(read(&log, ReadDetails::new("t", vec![0, 1, 2, 3], StartPoint::Beginning, 40))).await;
        assert_eq!(summary.records.len(), 40);
        for partition in 0..4 {
            let count = summary.records.iter().filter(|r| r.partition == partition).count();
            assert!(count <= 10, "partition {partition} delivered {count}");
        }
        assert_offsets_increase(&summary);
    }

    #[tokio::test]
    async fn test_key_filter_most_recent() {
        let log = seeded("t", 1, 55);
        let details = ReadDetails::new("t", vec![0], StartPoint::MostRecent, 55)
            .with_filter(Filter::key(MatchMode::Contains, "1"));
        let started = read(&log, details);
        let summary = collect(started).await;
        let expected: BTreeSet<i64> =
            [1, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 21, 31, 41, 51].into();
        assert_eq!(keys(&summary), expected);
    }

    #[tokio::test]
    async fn test_filter_stats() {
        let log = seeded("t", 1, 20);
        let details = ReadDetails::new("t", vec![0], StartPoint::Beginning, 20)
            .with_filter(Filter::value(MatchMode::StartsWith, "value-1"));
        let mut started = read(&log, details);
        let mut delivered = 0;
        while let ReadEvent::Record(_) = next(&mut started).await {
            delivered += 1;
        }
        // value-1 and value-10..value-19
        assert_eq!(delivered, 11);
        let stats = started.stats();
        assert_eq!(stats.delivered, 11);
        assert_eq!(stats.filtered, 9);
    }

    #[tokio::test]
    async fn test_global_limit_and_partition_share() {
        let log = seeded("t", 3, 20);
        let summary = collect(read(&log, ReadDetails::new("t", vec![0, 1, 2], StartPoint::Beginning, 10))).await;
        assert!(summary.records.len() <= 10);
        for partition in 0..3 {
            let count = summary.records.iter().filter(|r| r.partition == partition).count();
            assert!(count <= 4);
        }
    }

    #[tokio::test]
    async fn test_limit_below_partition_count() {
        let log = seeded("t", 4, 5);
        let summary = collect(read(&log, ReadDetails::new("t", vec![0, 1, 2, 3], StartPoint::Beginning, 2))).await;
        assert_eq!(summary.records.len(), 2);
    }

    #[tokio::test]
    async fn test_subset_of_partitions() {
        let log = seeded("t", 3, 5);
        let summary = collect(read(&log, ReadDetails::new("t", vec![1], StartPoint::Beginning, 50))).await;
        assert_eq!(summary.records.len(), 5);
        assert!(summary.records.iter().all(|r| r.partition == 1));
    }

    #[tokio::test]
    async fn test_respects_retention() {
        let log = seeded("t", 1, 30);
        log.truncate_before("t", 0, 25);
        let summary = collect(read(&log, ReadDetails::new("t", vec![0], StartPoint::Beginning, 50))).await;
        assert_eq!(keys(&summary), (25..30).collect::<BTreeSet<i64>>());
    }

    #[tokio::test]
    async fn test_bounded_read_ends_on_trailing_marker() {
        let log = seeded("t", 2, 10);
        log.append_marker("t", 0);
        log.append_marker("t", 1);
        log.append_marker("t", 1);
        for start in [StartPoint::Beginning, StartPoint::MostRecent] {
            let summary = collect(read(&log, ReadDetails::new("t", vec![0, 1], start, 50))).await;
            assert_eq!(summary.records.len(), 20);
            assert!(summary.errors.is_empty());
            assert!(!summary.no_records_found);
        }
    }

    #[tokio::test]
    async fn test_timestamp_read_ends_on_trailing_marker() {
        let log = seeded("t", 1, 5);
        log.append_marker("t", 0);
        let summary = collect(read(&log, ReadDetails::new("t", vec![0], StartPoint::AtTimestamp(1_003), 50))).await;
        assert_eq!(keys(&summary), (3..5).collect::<BTreeSet<i64>>());
    }

    #[tokio::test]
    async fn test_offset_fetch_failure_is_fatal() {
        let log = seeded("t", 2, 10);
        log.fail_offsets("t", 1, "leader not available");
        let mut started = read(&log, ReadDetails::new("t", vec![0, 1], StartPoint::Beginning, 50));
        match next(&mut started).await {
            ReadEvent::Failed(e) => assert!(e.to_string().contains("leader not available")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(next(&mut started).await, ReadEvent::Finished));
        assert!(started.is_cancelled());
        assert_eq!(started.stats().delivered, 0);
    }

    #[tokio::test]
    async fn test_unknown_topic_is_fatal() {
        let log = seeded("t", 1, 1);
        let summary = collect(read(&log, ReadDetails::new("missing", vec![0], StartPoint::Beginning, 5))).await;
        assert!(matches!(summary.errors.as_slice(), [ClientError::NotFound(_)]));
    }

    #[tokio::test]
    async fn test_invalid_request_reported() {
        let log = seeded("t", 1, 1);
        let summary = collect(read(&log, ReadDetails::new("t", vec![0], StartPoint::Beginning, 0))).await;
        assert!(matches!(summary.errors.as_slice(), [ClientError::InvalidRequest(_)]));
        assert!(summary.records.is_empty());
    }

    #[tokio::test]
    async fn test_partition_error_stops_only_that_partition() {
        let log = seeded("t", 2, 10);
        log.fail_at("t", 1, 3, "broker transport failure");
        let summary = collect(read(&log, ReadDetails::new("t", vec![0, 1], StartPoint::Beginning, 20))).await;
        assert_eq!(summary.records.iter().filter(|r| r.partition == 0).count(), 10);
        assert_eq!(summary.records.iter().filter(|r| r.partition == 1).count(), 3);
        assert!(matches!(
            summary.errors.as_slice(),
            [ClientError::Partition { partition: 1, .. }]
        ));
    }

    #[tokio::test]
    async fn test_at_timestamp() {
        let log = seeded("t", 1, 30);
        let summary = collect(read(&log, ReadDetails::new("t", vec![0], StartPoint::AtTimestamp(1_020), 50))).await;
        assert_eq!(keys(&summary), (20..30).collect::<BTreeSet<i64>>());
    }

    #[tokio::test]
    async fn test_at_timestamp_skips_partitions_without_match() {
        let log = MemoryLog::new();
        log.create_topic("t", 2);
        log.append("t", 0, "old", "v", 1_000);
        log.append("t", 1, "new", "v", 5_000);
        let log = Arc::new(log);
        let summary = collect(read(&log, ReadDetails::new("t", vec![0, 1], StartPoint::AtTimestamp(2_000), 10))).await;
        assert_eq!(summary.records.len(), 1);
        assert_eq!(summary.records[0].key, "new");
        assert!(!summary.no_records_found);
    }

    #[tokio::test]
    async fn test_no_records_after_timestamp() {
        let log = seeded("t", 2, 5);
        let mut started = read(&log, ReadDetails::new("t", vec![0, 1], StartPoint::AtTimestamp(99_999), 10));
        assert!(matches!(next(&mut started).await, ReadEvent::NoRecordsFound));
        assert!(matches!(next(&mut started).await, ReadEvent::Finished));
    }

    #[tokio::test]
    async fn test_today_finds_nothing_in_the_past() {
        let log = seeded("t", 1, 5);
        let summary = collect(read(&log, ReadDetails::new("t", vec![0], StartPoint::Today, 10))).await;
        assert!(summary.no_records_found);
        assert!(summary.records.is_empty());
    }

    async fn wait_for_consumers(log: &MemoryLog, count: usize) {
        tokio::time::timeout(WAIT, async {
            while log.open_streams() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("partition consumers did not open");
    }

    #[tokio::test]
    async fn test_live_reads_only_new_records() {
        let log = seeded("t", 1, 5);
        let mut started = read(&log, ReadDetails::new("t", vec![0], StartPoint::Live, 100));
        wait_for_consumers(&log, 1).await;

        log.append("t", 0, "live-1", "a", 2_000);
        log.append("t", 0, "live-2", "b", 2_001);
        for expected in ["live-1", "live-2"] {
            match next(&mut started).await {
                ReadEvent::Record(record) => assert_eq!(record.key, expected),
                other => panic!("unexpected {other:?}"),
            }
        }

        started.cancel();
        started.cancel();
        assert!(matches!(next(&mut started).await, ReadEvent::Finished));
        assert!(matches!(next(&mut started).await, ReadEvent::Finished));
    }

    #[tokio::test]
    async fn test_live_on_empty_topic_does_not_signal_empty() {
        let log = seeded("t", 1, 0);
        let mut started = read(&log, ReadDetails::new("t", vec![0], StartPoint::Live, 1));
        wait_for_consumers(&log, 1).await;
        log.append("t", 0, "k", "v", 1);
        assert!(matches!(next(&mut started).await, ReadEvent::Record(_)));
        assert!(matches!(next(&mut started).await, ReadEvent::Finished));
    }

    #[tokio::test]
    async fn test_cancel_handle_from_elsewhere() {
        let log = seeded("t", 2, 0);
        let started = read(&log, ReadDetails::new("t", vec![0, 1], StartPoint::Live, 10));
        let cancel = started.cancel_handle();
        wait_for_consumers(&log, 2).await;
        cancel.cancel();
        assert!(cancel.is_cancelled());
        let summary = collect(started).await;
        assert!(summary.records.is_empty());
        assert!(summary.errors.is_empty());
    }

    #[tokio::test]
    async fn test_headers_and_decode_errors_are_delivered() {
        let log = MemoryLog::new();
        log.create_topic("t", 1);
        log.append_message(
            "t",
            RawMessage {
                partition: 0,
                offset: 0,
                timestamp: Some(1),
                key: Some(b"k".to_vec()),
                value: Some(vec![0, 0, 0, 0, 9, 2]),
                headers: vec![RecordHeader {
                    key: "trace".into(),
                    value: b"abc".to_vec(),
                }],
            },
        );
        let log = Arc::new(log);
        let source: Arc<dyn PartitionSource> = log.clone();
        let decoder = AvroDecoder::new(Some(Arc::new(StaticSchemas::new())));
        let mut started = start_read(
            source,
            Arc::new(decoder),
            ReadDetails::new("t", vec![0], StartPoint::Beginning, 5),
            CancellationToken::new(),
        );
        let ReadEvent::Record(record) = next(&mut started).await else {
            panic!("expected a record");
        };
        assert_eq!(record.key, "k");
        assert!(record.error.is_some());
        assert_eq!(record.headers[0].rendered_value(), "abc");
        assert!(matches!(next(&mut started).await, ReadEvent::Finished));
        assert_eq!(started.stats().decode_errors, 1);
    }

    #[tokio::test]
    async fn test_parent_token_cancels_session() {
        let log = seeded("t", 1, 0);
        let parent = CancellationToken::new();
        let source: Arc<dyn PartitionSource> = log.clone();
        let started = start_read(
            source,
            Arc::new(AvroDecoder::text_only()),
            ReadDetails::new("t", vec![0], StartPoint::Live, 10),
            parent.child_token(),
        );
        wait_for_consumers(&log, 1).await;
        parent.cancel();
        assert!(started.is_cancelled());
        let summary = collect(started).await;
        assert!(summary.records.is_empty());
    }
}
