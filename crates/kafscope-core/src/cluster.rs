//! Cluster sessions.
//!
//! A [`ClusterSession`] owns every client built for one profile and is the
//! command surface the UI talks to: each method returns a started handle
//! immediately and does its work on a tokio task. [`ClusterSwitcher`]
//! holds the active session and replaces it when the operator switches
//! clusters.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command::{Started, StreamStarted};
use crate::config::ClusterProfile;
use crate::error::ClientError;
use crate::kafka::{
    check_connectivity, BrokerConfig, ClusterDescription, ClusterMetadata, ConsumerGroup,
    GroupAdmin, KafkaClients, ListedTopic, NewTopicDetails, PublishRecord, Published, Publisher,
    TopicAdmin, TopicConfig, TopicPartitionOffset,
};
use crate::reader::{start_read, KafkaPartitionSource, PartitionSource, ReadDetails, ReadStarted};
use crate::registry::{
    CompatibilityLevel, CompatibilityResult, Schema, SchemaRegistryClient, Subject,
};
use crate::serde::{AvroDecoder, SchemaResolver};

const REGISTRY: &str = "schema registry";

/// Every client for one connected cluster.
pub struct ClusterSession {
    profile: ClusterProfile,
    topics: TopicAdmin,
    groups: GroupAdmin,
    publisher: Publisher,
    source: Arc<dyn PartitionSource>,
    registry: Option<SchemaRegistryClient>,
    decoder: Arc<AvroDecoder>,
    shutdown: CancellationToken,
}

impl ClusterSession {
    /// Connects to the cluster described by `profile`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if the Kafka clients cannot be built or the
    /// registry URL is invalid.
    pub async fn connect(profile: &ClusterProfile) -> Result<Self, ClientError> {
        let registry = profile
            .schema_registry
            .as_ref()
            .map(SchemaRegistryClient::new)
            .transpose()?;
        let clients = KafkaClients::connect(profile).await?;
        let source: Arc<dyn PartitionSource> = Arc::new(KafkaPartitionSource::new(&clients));
        Ok(Self::from_parts(profile.clone(), &clients, source, registry))
    }

    fn from_parts(
        profile: ClusterProfile,
        clients: &KafkaClients,
        source: Arc<dyn PartitionSource>,
        registry: Option<SchemaRegistryClient>,
    ) -> Self {
        let resolver = registry
            .clone()
            .map(|r| Arc::new(r) as Arc<dyn SchemaResolver>);
        Self {
            profile,
            topics: TopicAdmin::new(clients),
            groups: GroupAdmin::new(clients),
            publisher: Publisher::new(clients),
            source,
            registry,
            decoder: Arc::new(AvroDecoder::new(resolver)),
            shutdown: CancellationToken::new(),
        }
    }

    /// The profile this session was built from.
    #[must_use]
    pub fn profile(&self) -> &ClusterProfile {
        &self.profile
    }

    /// Returns `true` when the profile has a schema registry.
    #[must_use]
    pub fn has_registry(&self) -> bool {
        self.registry.is_some()
    }

    /// Returns `true` once the session was torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // ── Topics ──

    /// Lists every topic, sorted by name.
    pub fn list_topics(&self) -> Started<Vec<ListedTopic>> {
        let topics = self.topics.clone();
        Started::spawn("list topics", async move { topics.list_topics().await })
    }

    /// Creates a topic.
    pub fn create_topic(&self, details: NewTopicDetails) -> Started<()> {
        let topics = self.topics.clone();
        Started::spawn("create topic", async move { topics.create_topic(&details).await })
    }

    /// Deletes a topic.
    pub fn delete_topic(&self, name: &str) -> Started<()> {
        let topics = self.topics.clone();
        let name = name.to_string();
        Started::spawn("delete topic", async move { topics.delete_topic(&name).await })
    }

    /// Describes a topic's configuration.
    pub fn describe_topic_config(&self, topic: &str) -> Started<TopicConfig> {
        let topics = self.topics.clone();
        let topic = topic.to_string();
        Started::spawn("describe topic config", async move {
            topics.describe_topic_config(&topic).await
        })
    }

    /// Sets topic configuration entries.
    pub fn update_topic_config(
        &self,
        topic: &str,
        entries: BTreeMap<String, String>,
    ) -> Started<()> {
        let topics = self.topics.clone();
        let topic = topic.to_string();
        Started::spawn("update topic config", async move {
            topics.update_topic_config(&topic, &entries).await
        })
    }

    /// Lists brokers sorted by id.
    pub fn describe_cluster(&self) -> Started<ClusterDescription> {
        let topics = self.topics.clone();
        Started::spawn("describe cluster", async move { topics.describe_cluster().await })
    }

    /// Describes one broker's configuration.
    pub fn describe_broker(&self, id: i32) -> Started<BrokerConfig> {
        let topics = self.topics.clone();
        Started::spawn("describe broker", async move { topics.describe_broker(id).await })
    }

    // ── Records ──

    /// Publishes one record.
    pub fn publish_record(&self, record: PublishRecord) -> Started<Published> {
        let publisher = self.publisher.clone();
        Started::spawn("publish record", async move { publisher.publish(&record).await })
    }

    /// Starts a read. The read is cancelled when the session is torn down.
    pub fn read_records(&self, details: ReadDetails) -> ReadStarted {
        start_read(
            Arc::clone(&self.source),
            Arc::clone(&self.decoder),
            details,
            self.shutdown.child_token(),
        )
    }

    // ── Consumer groups ──

    /// Lists every consumer group with its members.
    pub fn list_groups(&self) -> Started<Vec<ConsumerGroup>> {
        let groups = self.groups.clone();
        Started::spawn("list groups", async move { groups.list_groups().await })
    }

    /// Deletes a consumer group.
    pub fn delete_group(&self, name: &str) -> Started<()> {
        let groups = self.groups.clone();
        let name = name.to_string();
        Started::spawn("delete group", async move { groups.delete_group(&name).await })
    }

    /// Lists committed offsets and lag for a group.
    pub fn list_offsets(&self, group: &str) -> Started<Vec<TopicPartitionOffset>> {
        let groups = self.groups.clone();
        let group = group.to_string();
        Started::spawn("list offsets", async move { groups.list_offsets(&group).await })
    }

    // ── Schema registry ──

    /// Lists every subject, soft-deleted ones included.
    pub fn list_subjects(&self) -> Started<Vec<Subject>> {
        self.with_registry("list subjects", |r| async move { r.list_subjects().await })
    }

    /// Registers an Avro schema under `subject` and returns its id.
    pub fn create_schema(&self, subject: &str, schema: &str) -> Started<u32> {
        let (subject, schema) = (subject.to_string(), schema.to_string());
        self.with_registry("create schema", |r| async move {
            r.create_schema(&subject, &schema).await
        })
    }

    /// Soft-deletes a subject.
    pub fn soft_delete_subject(&self, subject: &str) -> Started<Vec<i32>> {
        let subject = subject.to_string();
        self.with_registry("soft delete subject", |r| async move {
            r.soft_delete_subject(&subject).await
        })
    }

    /// Permanently deletes a soft-deleted subject.
    pub fn hard_delete_subject(&self, subject: &str) -> Started<Vec<i32>> {
        let subject = subject.to_string();
        self.with_registry("hard delete subject", |r| async move {
            r.hard_delete_subject(&subject).await
        })
    }

    /// Deletes one version of a subject.
    pub fn delete_schema_version(&self, subject: &str, version: i32) -> Started<i32> {
        let subject = subject.to_string();
        self.with_registry("delete schema version", |r| async move {
            r.delete_schema_version(&subject, version).await
        })
    }

    /// Streams the requested versions of a subject.
    pub fn list_versions(&self, subject: &str, versions: Vec<i32>) -> StreamStarted<Schema> {
        match &self.registry {
            Some(registry) => registry.list_versions(subject, versions),
            None => StreamStarted::spawn("list versions", 1, |_items| async {
                Err(ClientError::NotConfigured(REGISTRY))
            }),
        }
    }

    /// Fetches the latest version of a subject.
    pub fn get_latest_schema(&self, subject: &str) -> Started<Schema> {
        let subject = subject.to_string();
        self.with_registry("get latest schema", |r| async move {
            r.get_latest_schema(&subject).await
        })
    }

    /// Fetches a schema by global id.
    pub fn get_schema_by_id(&self, id: u32) -> Started<Arc<Schema>> {
        self.with_registry("get schema by id", move |r| async move {
            r.get_schema_by_id(id).await
        })
    }

    /// Fetches a subject's compatibility level.
    pub fn get_compatibility(&self, subject: &str) -> Started<CompatibilityLevel> {
        let subject = subject.to_string();
        self.with_registry("get compatibility", |r| async move {
            r.get_compatibility(&subject).await
        })
    }

    /// Sets a subject's compatibility level.
    pub fn set_compatibility(
        &self,
        subject: &str,
        level: CompatibilityLevel,
    ) -> Started<CompatibilityLevel> {
        let subject = subject.to_string();
        self.with_registry("set compatibility", move |r| async move {
            r.set_compatibility(&subject, level).await
        })
    }

    /// Checks a schema against the latest version of a subject.
    pub fn check_compatibility(&self, subject: &str, schema: &str) -> Started<CompatibilityResult> {
        let (subject, schema) = (subject.to_string(), schema.to_string());
        self.with_registry("check compatibility", |r| async move {
            r.check_compatibility(&subject, &schema).await
        })
    }

    fn with_registry<T, F, Fut>(&self, operation: &'static str, work: F) -> Started<T>
    where
        T: Send + 'static,
        F: FnOnce(SchemaRegistryClient) -> Fut,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        match &self.registry {
            Some(registry) => Started::spawn(operation, work(registry.clone())),
            None => Started::ready(Err(ClientError::NotConfigured(REGISTRY))),
        }
    }

    /// Cancels reads started through this session and flushes the
    /// producer. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.publisher.flush().await;
        info!(cluster = %self.profile.name, "cluster session closed");
    }
}

impl std::fmt::Debug for ClusterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterSession")
            .field("cluster", &self.profile.name)
            .field("registry", &self.registry.is_some())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Holds the active [`ClusterSession`]. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ClusterSwitcher {
    active: Arc<RwLock<Option<Arc<ClusterSession>>>>,
}

impl ClusterSwitcher {
    /// A switcher with no active cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a throwaway client for `profile` and fetches metadata.
    pub fn check_connectivity(profile: &ClusterProfile) -> Started<ClusterMetadata> {
        let profile = profile.clone();
        Started::spawn("check connectivity", async move {
            check_connectivity(&profile).await
        })
    }

    /// Switches to `profile`.
    ///
    /// The connectivity check runs first; on failure the current session
    /// stays active. Otherwise the current session is torn down before the
    /// new one is built.
    ///
    /// # Errors
    ///
    /// Returns the connectivity check error, or the error building the new
    /// session (in which case no cluster is active).
    pub async fn activate_cluster(
        &self,
        profile: &ClusterProfile,
    ) -> Result<Arc<ClusterSession>, ClientError> {
        check_connectivity(profile).await?;
        self.deactivate().await;

        let session = Arc::new(ClusterSession::connect(profile).await?);
        *self.active.write() = Some(Arc::clone(&session));
        info!(
            cluster = %profile.name,
            registry = session.has_registry(),
            "cluster activated"
        );
        Ok(session)
    }

    /// Tears down the active session, if any.
    pub async fn deactivate(&self) {
        let previous = self.active.write().take();
        if let Some(session) = previous {
            session.shutdown().await;
            if Arc::strong_count(&session) > 1 {
                warn!(
                    cluster = %session.profile.name,
                    "closed session is still referenced"
                );
            }
        }
    }

    /// The active session.
    #[must_use]
    pub fn session(&self) -> Option<Arc<ClusterSession>> {
        self.active.read().clone()
    }

    /// The active session's profile.
    #[must_use]
    pub fn active_profile(&self) -> Option<ClusterProfile> {
        self.active.read().as_ref().map(|s| s.profile.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Completion, StreamEvent};
    use crate::config::SchemaRegistryConfig;
    use crate::reader::{ReadEvent, StartPoint};
    use crate::testing::MemoryLog;

    /// Builds a session over real client objects pointed at a closed port.
    /// librdkafka clients are created lazily, so nothing connects until a
    /// call is made.
    fn offline_session(registry: Option<SchemaRegistryConfig>) -> (ClusterSession, Arc<MemoryLog>) {
        let mut profile = ClusterProfile::new("offline", vec!["127.0.0.1:1".into()]);
        profile.operation_timeout_secs = Some(1);
        profile.schema_registry = registry;
        let clients = KafkaClients::offline(&profile).unwrap();
        let log = Arc::new(MemoryLog::new());
        let registry = profile
            .schema_registry
            .as_ref()
            .map(|c| SchemaRegistryClient::new(c).unwrap());
        let session = ClusterSession::from_parts(
            profile,
            &clients,
            Arc::clone(&log) as Arc<dyn PartitionSource>,
            registry,
        );
        (session, log)
    }

    #[tokio::test]
    async fn test_registry_commands_not_configured() {
        let (session, _) = offline_session(None);
        assert!(!session.has_registry());
        match session.list_subjects().await_completion().await {
            Completion::Failed(ClientError::NotConfigured(what)) => assert_eq!(what, REGISTRY),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            session.get_schema_by_id(1).await_completion().await,
            Completion::Failed(ClientError::NotConfigured(_))
        ));
        let mut versions = session.list_versions("s", vec![1]);
        assert!(matches!(
            versions.await_next().await,
            StreamEvent::Failed(ClientError::NotConfigured(_))
        ));
        assert!(matches!(versions.await_next().await, StreamEvent::Finished));
    }

    #[tokio::test]
    async fn test_registry_configured() {
        let (session, _) = offline_session(Some(SchemaRegistryConfig {
            url: "http://127.0.0.1:1".into(),
            username: None,
            password: None,
            tls: None,
            timeout_secs: Some(1),
        }));
        assert!(session.has_registry());
        // Invalid Avro is rejected before any request is made.
        assert!(matches!(
            session.create_schema("s", "{nope").await_completion().await,
            Completion::Failed(ClientError::InvalidSchema(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_reads() {
        let (session, log) = offline_session(None);
        log.create_topic("t", 1);
        log.append("t", 0, "k", "v", 1);

        let mut read = session.read_records(ReadDetails::new("t", vec![0], StartPoint::Live, 10));
        session.shutdown().await;
        assert!(session.is_closed());
        assert!(read.is_cancelled());

        let mut records = 0;
        loop {
            match read.await_record().await {
                ReadEvent::Record(_) => records += 1,
                ReadEvent::Finished => break,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(records <= 1);

        // Second shutdown is a no-op.
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_switcher_starts_empty() {
        let switcher = ClusterSwitcher::new();
        assert!(switcher.session().is_none());
        assert!(switcher.active_profile().is_none());
        switcher.deactivate().await;
    }

    #[tokio::test]
    async fn test_invalid_profile_keeps_current_state() {
        let switcher = ClusterSwitcher::new();
        let profile = ClusterProfile::new("", vec!["localhost:9092".into()]);
        let err = switcher.activate_cluster(&profile).await.unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
        assert!(switcher.session().is_none());

        let check = ClusterSwitcher::check_connectivity(&profile);
        assert!(matches!(
            check.await_completion().await,
            Completion::Failed(ClientError::Configuration(_))
        ));
    }
}
