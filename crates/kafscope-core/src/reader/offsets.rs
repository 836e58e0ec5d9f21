//! Per-partition read ranges.

use chrono::{DateTime, NaiveTime, TimeDelta, TimeZone, Timelike};

use super::types::{PartitionOffsets, StartPoint};

/// Offsets one partition task consumes, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRange {
    /// Partition id.
    pub partition: i32,
    /// First offset to read.
    pub start: i64,
    /// Last offset to read; `None` reads until stopped.
    pub end: Option<i64>,
}

impl PartitionRange {
    /// Returns `true` if `offset` is the last one of a bounded range or
    /// beyond it.
    #[must_use]
    pub fn is_done_at(&self, offset: i64) -> bool {
        self.end.is_some_and(|end| offset >= end)
    }
}

/// Records each partition may deliver: `limit / partitions`, at least 1.
#[must_use]
pub fn per_partition_limit(limit: usize, partitions: usize) -> i64 {
    let per = limit / partitions.max(1);
    i64::try_from(per.max(1)).unwrap_or(i64::MAX)
}

/// Range for the offset-based start points. Returns `None` when the
/// partition has nothing to read.
#[must_use]
pub fn offset_range(
    start: StartPoint,
    partition: i32,
    offsets: PartitionOffsets,
    per_part: i64,
) -> Option<PartitionRange> {
    let newest = offsets.newest();
    let (first, last) = match start {
        StartPoint::Live => {
            return Some(PartitionRange {
                partition,
                start: offsets.first_available,
                end: None,
            })
        }
        StartPoint::Beginning => (
            offsets.oldest,
            offsets.oldest.saturating_add(per_part - 1).min(newest),
        ),
        // The last `per_part` records end at `newest`, so they start at
        // `first_available - per_part`; starting from `newest - per_part`
        // would read one record too many.
        StartPoint::MostRecent => (
            offsets
                .oldest
                .max(offsets.first_available.saturating_sub(per_part)),
            newest,
        ),
        _ => return None,
    };
    (first <= last).then_some(PartitionRange {
        partition,
        start: first,
        end: Some(last),
    })
}

/// Range for a time-based start point, given the broker's answer to the
/// timestamp lookup (`None` when no record is at or after the time).
#[must_use]
pub fn timestamp_range(
    partition: i32,
    offsets: PartitionOffsets,
    resolved: Option<i64>,
) -> Option<PartitionRange> {
    let first = resolved?.max(offsets.oldest);
    let last = offsets.newest();
    (first <= last).then_some(PartitionRange {
        partition,
        start: first,
        end: Some(last),
    })
}

/// Resolves a time-based start point to milliseconds since the epoch,
/// relative to `now` in its own time zone.
#[must_use]
pub fn start_timestamp<Tz: TimeZone>(start: StartPoint, now: &DateTime<Tz>) -> Option<i64> {
    let since = match start {
        StartPoint::Today => local_midnight(now),
        StartPoint::Yesterday => local_midnight(now) - TimeDelta::hours(24),
        StartPoint::Last7Days => local_midnight(now) - TimeDelta::days(7),
        StartPoint::AtTimestamp(ts) => return Some(ts),
        _ => return None,
    };
    Some(since.timestamp_millis())
}

/// Start of the calendar day of `now`. Falls back to subtracting the
/// elapsed time of day when midnight does not exist locally.
fn local_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let naive = now.date_naive().and_time(NaiveTime::MIN);
    now.timezone()
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| {
            now.clone() - TimeDelta::seconds(i64::from(now.num_seconds_from_midnight()))
        })
}
