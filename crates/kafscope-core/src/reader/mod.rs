//! Bounded and live record reads.
//!
//! A read fans out one consumer task per requested partition. Each task
//! reads a computed offset range (or tails the partition for
//! [`StartPoint::Live`]), decodes keys and values, applies the client-side
//! [`Filter`] and delivers records through the [`ReadStarted`] handle until
//! its range ends, the global limit is reached or the read is cancelled.
//!
//! # Usage
//!
//! ```rust,ignore
//! use kafscope_core::reader::{ReadDetails, ReadEvent, StartPoint};
//!
//! let mut read = session.read_records(ReadDetails::new("orders", vec![0, 1], StartPoint::MostRecent, 100));
//! loop {
//!     match read.await_record().await {
//!         ReadEvent::Record(record) => println!("{} {}", record.offset, record.value),
//!         ReadEvent::Failed(e) => eprintln!("{e}"),
//!         ReadEvent::EmptyTopic | ReadEvent::NoRecordsFound | ReadEvent::Finished => break,
//!     }
//! }
//! ```

pub mod filter;
pub mod offsets;
pub mod session;
pub mod source;
pub mod stats;
pub mod types;

pub use session::{start_read, ReadCancel, ReadEvent, ReadStarted, ReadSummary};
pub use source::{KafkaPartitionSource, PartitionEvent, PartitionSource, PartitionStream};
pub use stats::ReadStatsSnapshot;
pub use types::{
    ConsumerRecord, FieldFilter, Filter, MatchMode, PartitionOffsets, RawMessage, ReadDetails,
    RecordHeader, StartPoint,
};
