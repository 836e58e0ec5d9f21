//! Topic and broker administration.
//!
//! [`TopicAdmin`] wraps the admin client for the topic list, topic
//! creation and deletion, topic configuration, and broker inspection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rdkafka::admin::{
    AdminOptions, AlterConfig, ConfigEntry, ConfigSource, NewTopic, OwnedResourceSpecifier,
    ResourceSpecifier, TopicReplication,
};
use rdkafka::consumer::BaseConsumer;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::connection::{KafkaAdmin, KafkaClients};
use super::metadata::{fetch_metadata, BrokerIdentity, TopicMetadata};
use crate::error::ClientError;

/// Cleanup policy assumed when a topic does not report one.
pub const DEFAULT_CLEANUP_POLICY: &str = "delete";

const CLEANUP_POLICY_KEY: &str = "cleanup.policy";
const MAX_TOPIC_NAME_LEN: usize = 249;

/// A topic row in the topic list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedTopic {
    /// Topic name.
    pub name: String,
    /// Number of partitions.
    pub partitions: usize,
    /// Replicas per partition.
    pub replication_factor: usize,
    /// `delete`, `compact` or `compact,delete`.
    pub cleanup_policy: String,
    /// Broker-internal topic.
    pub internal: bool,
}

impl ListedTopic {
    fn from_metadata(topic: &TopicMetadata, cleanup_policy: Option<&str>) -> Self {
        Self {
            name: topic.name.clone(),
            partitions: topic.partitions.len(),
            replication_factor: topic.replication_factor(),
            cleanup_policy: cleanup_policy
                .filter(|p| !p.is_empty())
                .unwrap_or(DEFAULT_CLEANUP_POLICY)
                .to_string(),
            internal: topic.is_internal(),
        }
    }
}

/// Parameters for creating a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTopicDetails {
    /// Topic name.
    pub name: String,
    /// Partition count, at least 1.
    pub partitions: i32,
    /// Replication factor; defaults to 1.
    pub replication_factor: Option<i32>,
    /// Topic-level configs forwarded verbatim.
    pub properties: BTreeMap<String, String>,
}

impl NewTopicDetails {
    /// A topic with `partitions` partitions and default replication.
    #[must_use]
    pub fn new(name: impl Into<String>, partitions: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor: None,
            properties: BTreeMap::new(),
        }
    }

    /// Sets the replication factor.
    #[must_use]
    pub fn with_replication_factor(mut self, replication_factor: i32) -> Self {
        self.replication_factor = Some(replication_factor);
        self
    }

    /// Adds a topic config entry.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Effective replication factor.
    #[must_use]
    pub fn effective_replication_factor(&self) -> i32 {
        self.replication_factor.unwrap_or(1)
    }

    /// Validates the request before it is sent.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidRequest` if a field is out of range.
    pub fn validate(&self) -> Result<(), ClientError> {
        validate_topic_name(&self.name)?;
        if self.partitions < 1 {
            return Err(ClientError::InvalidRequest(format!(
                "partition count must be >= 1, got {}",
                self.partitions
            )));
        }
        if self.effective_replication_factor() < 1 {
            return Err(ClientError::InvalidRequest(format!(
                "replication factor must be >= 1, got {}",
                self.effective_replication_factor()
            )));
        }
        Ok(())
    }
}

/// One entry of a topic's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigValue {
    /// Current value; absent for sensitive entries.
    pub value: Option<String>,
    /// The broker default is in effect.
    pub is_default: bool,
    /// Where the value comes from, e.g. `DynamicTopic`.
    pub source: String,
    /// The entry cannot be altered.
    pub read_only: bool,
    /// The broker hides the value.
    pub sensitive: bool,
}

impl From<&ConfigEntry> for ConfigValue {
    fn from(entry: &ConfigEntry) -> Self {
        Self {
            value: entry.value.clone(),
            is_default: entry.is_default,
            source: format!("{:?}", entry.source),
            read_only: entry.is_read_only,
            sensitive: entry.is_sensitive,
        }
    }
}

/// Configuration of one topic keyed by config name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicConfig {
    /// Topic name.
    pub topic: String,
    /// Entries sorted by key.
    pub entries: BTreeMap<String, ConfigValue>,
}

/// Brokers of the active cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterDescription {
    /// Brokers sorted by id ascending.
    pub brokers: Vec<BrokerIdentity>,
}

/// Configuration of one broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokerConfig {
    /// Broker id.
    pub id: i32,
    /// Current values keyed by config name.
    pub configs: BTreeMap<String, String>,
}

/// Topic and broker administration for one cluster.
#[derive(Clone)]
pub struct TopicAdmin {
    admin: Arc<KafkaAdmin>,
    metadata: Arc<BaseConsumer>,
    timeout: Duration,
}

impl TopicAdmin {
    /// Creates the service from a connected cluster.
    #[must_use]
    pub fn new(clients: &KafkaClients) -> Self {
        Self {
            admin: clients.admin(),
            metadata: clients.metadata_client(),
            timeout: clients.timeout(),
        }
    }

    fn options(&self) -> AdminOptions {
        AdminOptions::new()
            .operation_timeout(Some(self.timeout))
            .request_timeout(Some(self.timeout))
    }

    /// Lists every topic sorted by name.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if metadata or configs cannot be fetched.
    pub async fn list_topics(&self) -> Result<Vec<ListedTopic>, ClientError> {
        let snapshot = fetch_metadata(Arc::clone(&self.metadata), None, self.timeout).await?;
        let names: Vec<&str> = snapshot.topics.iter().map(|t| t.name.as_str()).collect();
        let policies = self.cleanup_policies(&names).await?;

        let mut topics: Vec<ListedTopic> = snapshot
            .topics
            .iter()
            .filter(|t| t.error.is_none())
            .map(|t| ListedTopic::from_metadata(t, policies.get(&t.name).map(String::as_str)))
            .collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = topics.len(), "listed topics");
        Ok(topics)
    }

    async fn cleanup_policies(
        &self,
        names: &[&str],
    ) -> Result<HashMap<String, String>, ClientError> {
        let mut policies = HashMap::new();
        if names.is_empty() {
            return Ok(policies);
        }
        let specifiers: Vec<ResourceSpecifier<'_>> =
            names.iter().map(|n| ResourceSpecifier::Topic(*n)).collect();
        let results = self
            .admin
            .describe_configs(&specifiers, &self.options())
            .await
            .map_err(|e| ClientError::from_kafka("describe topic configs", &e))?;

        for result in results {
            match result {
                Ok(resource) => {
                    if let OwnedResourceSpecifier::Topic(name) = &resource.specifier {
                        if let Some(value) = resource
                            .get(CLEANUP_POLICY_KEY)
                            .and_then(|e| e.value.clone())
                        {
                            policies.insert(name.clone(), value);
                        }
                    }
                }
                Err(code) => warn!(error = %code, "topic config unavailable"),
            }
        }
        Ok(policies)
    }

    /// Creates a topic.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidRequest` for bad parameters,
    /// `ClientError::Conflict` if the topic exists, or another classified
    /// error from the broker.
    pub async fn create_topic(&self, details: &NewTopicDetails) -> Result<(), ClientError> {
        details.validate()?;
        let mut topic = NewTopic::new(
            &details.name,
            details.partitions,
            TopicReplication::Fixed(details.effective_replication_factor()),
        );
        for (key, value) in &details.properties {
            topic = topic.set(key, value);
        }

        let results = self
            .admin
            .create_topics(&[topic], &self.options())
            .await
            .map_err(|e| ClientError::from_kafka("create topic", &e))?;
        first_result(results, "create topic")?;
        info!(
            topic = %details.name,
            partitions = details.partitions,
            replication_factor = details.effective_replication_factor(),
            "created topic"
        );
        Ok(())
    }

    /// Deletes a topic.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if the topic does not exist, or
    /// another classified error.
    pub async fn delete_topic(&self, name: &str) -> Result<(), ClientError> {
        validate_topic_name(name)?;
        let results = self
            .admin
            .delete_topics(&[name], &self.options())
            .await
            .map_err(|e| ClientError::from_kafka("delete topic", &e))?;
        first_result(results, "delete topic")?;
        info!(topic = %name, "deleted topic");
        Ok(())
    }

    /// Describes every config entry of a topic.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if the topic does not exist.
    pub async fn describe_topic_config(&self, topic: &str) -> Result<TopicConfig, ClientError> {
        let entries = self
            .describe_resource(ResourceSpecifier::Topic(topic), "describe topic config")
            .await?;
        Ok(TopicConfig {
            topic: topic.to_string(),
            entries: entries
                .iter()
                .map(|e| (e.name.clone(), ConfigValue::from(e)))
                .collect(),
        })
    }

    /// Sets topic configs, keeping the topic's other dynamic overrides.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if the topic cannot be described or the
    /// broker rejects the change.
    pub async fn update_topic_config(
        &self,
        topic: &str,
        updates: &BTreeMap<String, String>,
    ) -> Result<(), ClientError> {
        if updates.is_empty() {
            return Err(ClientError::InvalidRequest("no config entries to update".into()));
        }
        let current = self
            .describe_resource(ResourceSpecifier::Topic(topic), "describe topic config")
            .await?;
        let overrides: Vec<(String, String)> = current
            .iter()
            .filter(|e| matches!(e.source, ConfigSource::DynamicTopic))
            .filter_map(|e| e.value.clone().map(|v| (e.name.clone(), v)))
            .collect();
        let merged = merge_overrides(&overrides, updates);

        let mut alter = AlterConfig::new(ResourceSpecifier::Topic(topic));
        for (key, value) in &merged {
            alter = alter.set(key, value);
        }
        let results = self
            .admin
            .alter_configs(&[alter], &self.options())
            .await
            .map_err(|e| ClientError::from_kafka("alter topic config", &e))?;
        for result in results {
            result.map_err(|(_, code)| ClientError::from_code("alter topic config", code))?;
        }
        info!(topic = %topic, keys = ?updates.keys().collect::<Vec<_>>(), "updated topic config");
        Ok(())
    }

    /// Lists the brokers sorted by id.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if metadata cannot be fetched.
    pub async fn describe_cluster(&self) -> Result<ClusterDescription, ClientError> {
        let snapshot = fetch_metadata(Arc::clone(&self.metadata), None, self.timeout).await?;
        Ok(ClusterDescription {
            brokers: snapshot.brokers,
        })
    }

    /// Describes one broker's configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if `id` is not a broker of this
    /// cluster.
    pub async fn describe_broker(&self, id: i32) -> Result<BrokerConfig, ClientError> {
        let cluster = self.describe_cluster().await?;
        if !cluster.brokers.iter().any(|b| b.id == id) {
            return Err(ClientError::NotFound(format!("broker {id}")));
        }
        let entries = self
            .describe_resource(ResourceSpecifier::Broker(id), "describe broker config")
            .await?;
        Ok(BrokerConfig {
            id,
            configs: entries
                .into_iter()
                .map(|e| (e.name, e.value.unwrap_or_default()))
                .collect(),
        })
    }

    async fn describe_resource(
        &self,
        specifier: ResourceSpecifier<'_>,
        context: &str,
    ) -> Result<Vec<ConfigEntry>, ClientError> {
        let results = self
            .admin
            .describe_configs(&[specifier], &self.options())
            .await
            .map_err(|e| ClientError::from_kafka(context, &e))?;
        let resource = results
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Protocol(format!("{context}: empty response")))?
            .map_err(|code| ClientError::from_code(context, code))?;
        Ok(resource.entries)
    }
}

impl std::fmt::Debug for TopicAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicAdmin")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Unwraps the single per-topic result of a create or delete call.
fn first_result(
    results: Vec<Result<String, (String, rdkafka::error::RDKafkaErrorCode)>>,
    context: &str,
) -> Result<String, ClientError> {
    match results.into_iter().next() {
        Some(Ok(name)) => Ok(name),
        Some(Err((name, code))) => Err(ClientError::from_code(&format!("{context} '{name}'"), code)),
        None => Err(ClientError::Protocol(format!("{context}: empty response"))),
    }
}

/// Existing dynamic overrides with the requested entries applied on top.
fn merge_overrides(
    current: &[(String, String)],
    updates: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = current.iter().cloned().collect();
    for (key, value) in updates {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

fn validate_topic_name(name: &str) -> Result<(), ClientError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(ClientError::InvalidRequest(format!(
            "invalid topic name '{name}'"
        )));
    }
    if name.len() > MAX_TOPIC_NAME_LEN {
        return Err(ClientError::InvalidRequest(format!(
            "topic name longer than {MAX_TOPIC_NAME_LEN} characters"
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(ClientError::InvalidRequest(format!(
            "topic name '{name}' contains illegal character '{c}'"
        )));
    }
    Ok(())
}
