//! Read request and record types.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{ClientError, SerdeError};
use crate::serde::header::render_header_value;

/// Where each partition starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartPoint {
    /// Oldest retained offset.
    Beginning,
    /// The newest records, as many as the limit allows.
    MostRecent,
    /// Records since local midnight.
    Today,
    /// Records since local midnight minus 24 hours.
    Yesterday,
    /// Records since local midnight minus 7 days.
    Last7Days,
    /// Only records produced after the read starts; never ends on its own.
    Live,
    /// Records at or after a timestamp, in milliseconds since the epoch.
    AtTimestamp(i64),
}

impl StartPoint {
    /// Returns `true` for [`StartPoint::Live`].
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, StartPoint::Live)
    }

    /// Returns `true` for start points resolved through a broker time lookup.
    #[must_use]
    pub fn is_time_based(&self) -> bool {
        matches!(
            self,
            StartPoint::Today
                | StartPoint::Yesterday
                | StartPoint::Last7Days
                | StartPoint::AtTimestamp(_)
        )
    }
}

impl fmt::Display for StartPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartPoint::Beginning => f.write_str("beginning"),
            StartPoint::MostRecent => f.write_str("most-recent"),
            StartPoint::Today => f.write_str("today"),
            StartPoint::Yesterday => f.write_str("yesterday"),
            StartPoint::Last7Days => f.write_str("last-7-days"),
            StartPoint::Live => f.write_str("live"),
            StartPoint::AtTimestamp(ts) => write!(f, "at:{ts}"),
        }
    }
}

impl FromStr for StartPoint {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "beginning" | "earliest" => Ok(StartPoint::Beginning),
            "most-recent" | "latest" => Ok(StartPoint::MostRecent),
            "today" => Ok(StartPoint::Today),
            "yesterday" => Ok(StartPoint::Yesterday),
            "last-7-days" => Ok(StartPoint::Last7Days),
            "live" | "tail" => Ok(StartPoint::Live),
            other => match other.strip_prefix("at:") {
                Some(ts) => ts.parse().map(StartPoint::AtTimestamp).map_err(|_| {
                    ClientError::InvalidRequest(format!("invalid timestamp in start point '{s}'"))
                }),
                None => Err(ClientError::InvalidRequest(format!(
                    "unknown start point '{s}'"
                ))),
            },
        }
    }
}

/// How a filter term is matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMode {
    /// The filter is off; its term is ignored.
    #[default]
    None,
    /// Text contains the term.
    Contains,
    /// Text starts with the term.
    StartsWith,
}

/// One side of a [`Filter`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldFilter {
    /// Match mode.
    pub mode: MatchMode,
    /// Search term.
    pub term: String,
}

impl FieldFilter {
    /// A filter with the given mode and term.
    #[must_use]
    pub fn new(mode: MatchMode, term: impl Into<String>) -> Self {
        Self {
            mode,
            term: term.into(),
        }
    }
}

/// Client-side record filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Filter {
    /// Applied to the decoded key text.
    pub key: FieldFilter,
    /// Applied to the decoded value text.
    pub value: FieldFilter,
}

/// What to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadDetails {
    /// Topic name.
    pub topic: String,
    /// Partitions to read, sorted and unique.
    pub partitions: Vec<i32>,
    /// Start point applied to every partition.
    pub start: StartPoint,
    /// Maximum number of records delivered.
    pub limit: usize,
    /// Optional client-side filter.
    pub filter: Option<Filter>,
}

impl ReadDetails {
    /// Creates a read request; partitions are sorted and deduplicated.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        mut partitions: Vec<i32>,
        start: StartPoint,
        limit: usize,
    ) -> Self {
        partitions.sort_unstable();
        partitions.dedup();
        Self {
            topic: topic.into(),
            partitions,
            start,
            limit,
            filter: None,
        }
    }

    /// Sets the filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Checks the request before any broker call.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidRequest` for an empty topic, an empty
    /// or unsorted partition set, a negative partition or a zero limit.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.topic.is_empty() {
            return Err(ClientError::InvalidRequest("topic is required".into()));
        }
        if self.partitions.is_empty() {
            return Err(ClientError::InvalidRequest(
                "at least one partition is required".into(),
            ));
        }
        if self.partitions.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ClientError::InvalidRequest(
                "partitions must be sorted and unique".into(),
            ));
        }
        if self.partitions[0] < 0 {
            return Err(ClientError::InvalidRequest(format!(
                "invalid partition {}",
                self.partitions[0]
            )));
        }
        if self.limit == 0 {
            return Err(ClientError::InvalidRequest("limit must be at least 1".into()));
        }
        Ok(())
    }
}

/// Retained offsets of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOffsets {
    /// Oldest retained offset (low watermark).
    pub oldest: i64,
    /// Offset the next produced record will get (high watermark).
    pub first_available: i64,
}

impl PartitionOffsets {
    /// Creates offsets; `first_available` is raised to `oldest` if below it.
    #[must_use]
    pub fn new(oldest: i64, first_available: i64) -> Self {
        Self {
            oldest,
            first_available: first_available.max(oldest),
        }
    }

    /// Offset of the last retained record.
    #[must_use]
    pub fn newest(&self) -> i64 {
        self.first_available - 1
    }

    /// No retained records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.oldest == self.first_available
    }

    /// Number of retained records.
    #[must_use]
    pub fn len(&self) -> i64 {
        self.first_available - self.oldest
    }
}

/// A message as fetched from a partition, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Partition id.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Timestamp in milliseconds since the epoch, if the broker set one.
    pub timestamp: Option<i64>,
    /// Key bytes.
    pub key: Option<Vec<u8>>,
    /// Value bytes; `None` for tombstones.
    pub value: Option<Vec<u8>>,
    /// Headers in wire order.
    pub headers: Vec<RecordHeader>,
}

/// A record header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    /// Header key.
    pub key: String,
    /// Raw header value.
    pub value: Vec<u8>,
}

impl RecordHeader {
    /// Display form of the value.
    #[must_use]
    pub fn rendered_value(&self) -> String {
        render_header_value(&self.value)
    }
}

/// A delivered record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRecord {
    /// Decoded key text.
    pub key: String,
    /// Decoded value text (JSON for Avro payloads).
    pub value: String,
    /// Writer schema of the value, when it was Avro.
    pub schema: Option<String>,
    /// Why the key or value could not be decoded.
    pub error: Option<SerdeError>,
    /// Partition id.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Timestamp in milliseconds since the epoch.
    pub timestamp: Option<i64>,
    /// Headers in wire order.
    pub headers: Vec<RecordHeader>,
}

impl ConsumerRecord {
    /// Record timestamp as a UTC date-time.
    #[must_use]
    pub fn timestamp_utc(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.timestamp
            .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
    }
}
