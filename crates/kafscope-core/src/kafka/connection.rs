//! Connection factory.
//!
//! [`KafkaClients`] owns the three librdkafka handles a cluster session
//! needs: an admin client, a metadata/offset client and a producer. All
//! of them are built from one [`ClientConfig`] derived from the
//! [`ClusterProfile`], after the profile's TLS material has been checked.

use std::sync::Arc;
use std::time::Duration;

use rdkafka::admin::AdminClient;
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::BaseConsumer;
use rdkafka::producer::FutureProducer;
use tracing::{debug, info};

use super::metadata::{fetch_metadata, ClusterMetadata};
use super::tls::validate_tls_files;
use crate::config::ClusterProfile;
use crate::error::ClientError;

/// Shared admin client type.
pub type KafkaAdmin = AdminClient<DefaultClientContext>;

/// Initialized clients for one cluster.
pub struct KafkaClients {
    name: String,
    base: ClientConfig,
    admin: Arc<KafkaAdmin>,
    metadata: Arc<BaseConsumer>,
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaClients {
    /// Builds all clients for `profile` and performs the initial metadata
    /// fetch.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if the profile is invalid, its certificates
    /// fail validation, a client cannot be created, or the brokers do not
    /// answer the metadata request.
    pub async fn connect(profile: &ClusterProfile) -> Result<Self, ClientError> {
        let clients = Self::build(profile)?;
        let snapshot = clients.fetch_metadata(None).await?;
        info!(
            cluster = %clients.name,
            brokers = snapshot.brokers.len(),
            topics = snapshot.topics.len(),
            "connected to cluster"
        );
        Ok(clients)
    }

    /// Builds the clients without contacting a broker.
    #[cfg(test)]
    pub(crate) fn offline(profile: &ClusterProfile) -> Result<Self, ClientError> {
        Self::build(profile)
    }

    fn build(profile: &ClusterProfile) -> Result<Self, ClientError> {
        let base = prepare(profile)?;
        let timeout = profile.operation_timeout();

        let admin: KafkaAdmin = base
            .create()
            .map_err(|e| ClientError::from_kafka("create admin client", &e))?;
        let metadata: BaseConsumer = consumer_config(&base, None)
            .create()
            .map_err(|e| ClientError::from_kafka("create metadata client", &e))?;
        let producer: FutureProducer = producer_config(&base, timeout)
            .create()
            .map_err(|e| ClientError::from_kafka("create producer", &e))?;

        Ok(Self {
            name: profile.name.clone(),
            base,
            admin: Arc::new(admin),
            metadata: Arc::new(metadata),
            producer,
            timeout,
        })
    }

    /// Profile name these clients were built from.
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.name
    }

    /// The admin client.
    #[must_use]
    pub fn admin(&self) -> Arc<KafkaAdmin> {
        Arc::clone(&self.admin)
    }

    /// The metadata/offset client.
    #[must_use]
    pub fn metadata_client(&self) -> Arc<BaseConsumer> {
        Arc::clone(&self.metadata)
    }

    /// The producer. Cheap to clone.
    #[must_use]
    pub fn producer(&self) -> FutureProducer {
        self.producer.clone()
    }

    /// Timeout applied to admin, metadata and offset calls.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Consumer configuration for this cluster, optionally bound to a group.
    #[must_use]
    pub fn consumer_config(&self, group_id: Option<&str>) -> ClientConfig {
        consumer_config(&self.base, group_id)
    }

    /// Fetches a metadata snapshot.
    ///
    /// # Errors
    ///
    /// Returns a classified `ClientError` if the request fails.
    pub async fn fetch_metadata(&self, topic: Option<&str>) -> Result<ClusterMetadata, ClientError> {
        fetch_metadata(
            self.metadata_client(),
            topic.map(str::to_string),
            self.timeout,
        )
        .await
    }
}

impl std::fmt::Debug for KafkaClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaClients")
            .field("cluster", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Opens a throwaway client, fetches metadata and closes it.
///
/// # Errors
///
/// Returns the same errors as [`KafkaClients::connect`].
pub async fn check_connectivity(profile: &ClusterProfile) -> Result<ClusterMetadata, ClientError> {
    let base = prepare(profile)?;
    let client: BaseConsumer = consumer_config(&base, None)
        .create()
        .map_err(|e| ClientError::from_kafka("create client", &e))?;
    let snapshot = fetch_metadata(Arc::new(client), None, profile.operation_timeout()).await?;
    debug!(
        cluster = %profile.name,
        brokers = snapshot.brokers.len(),
        "connectivity check passed"
    );
    Ok(snapshot)
}

/// Validates the profile and its files, then builds the base config.
fn prepare(profile: &ClusterProfile) -> Result<ClientConfig, ClientError> {
    profile.validate()?;
    if profile.security_protocol().uses_tls() {
        if let Some(tls) = &profile.tls {
            validate_tls_files(tls)?;
        }
    }
    Ok(profile.to_client_config())
}

/// Consumer settings: earliest start, no commits, no EOF events.
pub(crate) fn consumer_config(base: &ClientConfig, group_id: Option<&str>) -> ClientConfig {
    let mut config = base.clone();
    config.set("auto.offset.reset", "earliest");
    config.set("enable.auto.commit", "false");
    config.set("enable.partition.eof", "false");
    if let Some(group) = group_id {
        config.set("group.id", group);
    }
    config
}

/// Producer settings: wait for all replicas and hash keys when no
/// partition is pinned on the record.
pub(crate) fn producer_config(base: &ClientConfig, timeout: Duration) -> ClientConfig {
    let mut config = base.clone();
    config.set("acks", "all");
    config.set("partitioner", "murmur2_random");
    config.set("message.timeout.ms", timeout.as_millis().to_string());
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsConfig;

    #[test]
    fn test_consumer_config() {
        let base = ClusterProfile::new("t", vec!["b:9092".into()]).to_client_config();
        let config = consumer_config(&base, Some("billing"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("group.id"), Some("billing"));
        assert_eq!(config.get("bootstrap.servers"), Some("b:9092"));

        let anonymous = consumer_config(&base, None);
        assert!(anonymous.get("group.id").is_none());
    }

    #[test]
    fn test_producer_config() {
        let base = ClusterProfile::new("t", vec!["b:9092".into()]).to_client_config();
        let config = producer_config(&base, Duration::from_secs(5));
        assert_eq!(config.get("acks"), Some("all"));
        assert_eq!(config.get("partitioner"), Some("murmur2_random"));
        assert_eq!(config.get("message.timeout.ms"), Some("5000"));
    }

    #[test]
    fn test_prepare_rejects_missing_ca() {
        let mut profile = ClusterProfile::new("t", vec!["b:9093".into()]);
        profile.tls = Some(TlsConfig {
            ca_path: Some("/missing/ca.pem".into()),
            ..TlsConfig::default()
        });
        let err = prepare(&profile).unwrap_err();
        assert!(matches!(err, ClientError::TlsConfig(_)));
    }

    #[test]
    fn test_prepare_ignores_files_without_tls() {
        let mut profile = ClusterProfile::new("t", vec!["b:9092".into()]);
        profile.tls = Some(TlsConfig {
            enabled: false,
            ca_path: Some("/missing/ca.pem".into()),
            ..TlsConfig::default()
        });
        prepare(&profile).unwrap();
    }

    #[tokio::test]
    async fn test_check_connectivity_invalid_profile() {
        let profile = ClusterProfile::new("", vec!["b:9092".into()]);
        let err = check_connectivity(&profile).await.unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }
}
