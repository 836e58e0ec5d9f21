//! Kafka clients for the kafscope core.
//!
//! Provides the connection factory and the admin, producer and consumer
//! group services built on top of it. Every librdkafka call that blocks
//! runs on tokio's blocking pool.
//!
//! # Features
//!
//! - Profile-driven client configuration (SASL/PLAIN, SCRAM, TLS, mTLS)
//! - Up-front certificate validation with precise error kinds
//! - Topic, broker and topic-config administration
//! - Per-call partition selection for produced records
//! - Consumer group listing, deletion and lag reporting
//!
//! # Usage
//!
//! ```rust,ignore
//! use kafscope_core::kafka::{KafkaClients, TopicAdmin};
//!
//! let clients = KafkaClients::connect(&profile).await?;
//! let topics = TopicAdmin::new(&clients).list_topics().await?;
//! ```

pub mod connection;
pub mod groups;
pub mod metadata;
pub mod producer;
pub mod tls;
pub mod topics;

pub use connection::{check_connectivity, KafkaAdmin, KafkaClients};
pub use groups::{
    group_offsets, ConsumerGroup, GroupAdmin, GroupMember, GroupOffsetSource, KafkaGroupOffsets,
    TopicPartitionOffset,
};
pub use metadata::{
    is_internal_topic, BrokerIdentity, ClusterMetadata, PartitionMetadata, TopicMetadata,
    INTERNAL_TOPICS,
};
pub use producer::{PublishRecord, Published, Publisher};
pub use topics::{
    BrokerConfig, ClusterDescription, ConfigValue, ListedTopic, NewTopicDetails, TopicAdmin,
    TopicConfig,
};

use crate::error::ClientError;

/// Runs a blocking librdkafka call on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ClientError>
where
    F: FnOnce() -> Result<T, ClientError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ClientError::Internal(format!("blocking task failed: {e}")))?
}
