//! # kafscope core
//!
//! Kafka and Schema Registry commands behind the kafscope terminal UI.
//!
//! Every command returns a started handle immediately and runs on the
//! tokio runtime; the UI only ever awaits typed terminal messages.
//!
//! - [`config`] - Cluster profiles and the YAML config store
//! - [`kafka`] - Connection factory, topic admin, producer, consumer groups
//! - [`registry`] - Schema Registry REST client with schema-id cache
//! - [`serde`] - Confluent Avro decoding and header rendering
//! - [`reader`] - Bounded and live record reads
//! - [`command`] - Started handles shared by all commands
//! - [`cluster`] - Per-cluster sessions and the cluster switcher
//! - [`testing`] - In-memory broker and schema stand-ins
//!
//! ## Architecture
//!
//! ```text
//! UI ──> ClusterSession ──> Started<T> / StreamStarted<T> / ReadStarted
//!            │
//!            ├── TopicAdmin / GroupAdmin / Publisher ──> librdkafka
//!            ├── SchemaRegistryClient ──> HTTP (reqwest)
//!            └── reader ──> PartitionSource ──> AvroDecoder ──> Filter
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Common test patterns that are acceptable
#![cfg_attr(
    test,
    allow(
        clippy::field_reassign_with_default,
        clippy::manual_let_else,
        clippy::unreadable_literal,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss,
        clippy::too_many_lines,
        unused_mut
    )
)]

/// Error types.
pub mod error;

/// Operator configuration and cluster profiles.
pub mod config;

/// Started handles for asynchronous commands.
pub mod command;

/// Kafka clients: connection, topics, producer, consumer groups.
pub mod kafka;

/// Schema Registry client.
pub mod registry;

/// Record payload decoding.
pub mod serde;

/// Record reads.
pub mod reader;

/// Cluster sessions and switching.
pub mod cluster;

/// Testing utilities (in-memory log, static schemas).
pub mod testing;

pub use cluster::{ClusterSession, ClusterSwitcher};
pub use command::{Completion, Started, StreamEvent, StreamStarted};
pub use error::{ClientError, SerdeError};
