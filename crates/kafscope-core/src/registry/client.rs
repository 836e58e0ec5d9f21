//! Confluent Schema Registry client.
//!
//! [`SchemaRegistryClient`] is a cheap-to-clone async REST client for the
//! Confluent Schema Registry API. Schemas looked up by id are memoized
//! for the life of the client: reads take a shared lock, inserts take
//! the exclusive lock, and entries are never invalidated.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::transport::{build_http_client, request_error, status_error};
use super::types::{
    CompatibilityLevel, CompatibilityResponse, CompatibilityResult, ConfigResponse,
    ConfigUpdateRequest, RegisterSchemaResponse, Schema, SchemaByIdResponse, SchemaRequest,
    SchemaVersionResponse, Subject,
};
use crate::command::StreamStarted;
use crate::config::SchemaRegistryConfig;
use crate::error::ClientError;
use crate::serde::avro::SchemaResolver;

/// Items buffered between a version stream and the UI.
const VERSION_STREAM_BUFFER: usize = 16;

struct Inner {
    http: Client,
    base: Url,
    timeout_ms: u64,
    cache: RwLock<HashMap<u32, Arc<Schema>>>,
}

/// Async client for the Confluent Schema Registry REST API.
#[derive(Clone)]
pub struct SchemaRegistryClient {
    inner: Arc<Inner>,
}

impl SchemaRegistryClient {
    /// Creates a client for the registry described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` for a malformed URL and
    /// `ClientError::TlsConfig` for bad certificate files.
    pub fn new(config: &SchemaRegistryConfig) -> Result<Self, ClientError> {
        let base = Url::parse(config.url.trim()).map_err(|e| {
            ClientError::Configuration(format!("invalid schema registry url '{}': {e}", config.url))
        })?;
        if base.cannot_be_a_base() {
            return Err(ClientError::Configuration(format!(
                "invalid schema registry url '{}'",
                config.url
            )));
        }
        let http = build_http_client(config)?;
        let timeout_ms = u64::try_from(config.timeout().as_millis()).unwrap_or(u64::MAX);
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base,
                timeout_ms,
                cache: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Returns the base URL of the Schema Registry.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.inner.base.as_str()
    }

    /// Returns `true` if schema `id` is cached.
    #[must_use]
    pub fn is_cached(&self, id: u32) -> bool {
        self.inner.cache.read().contains_key(&id)
    }

    /// Number of cached schemas.
    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.inner.cache.read().len()
    }

    /// Lists every subject, soft-deleted ones included, with versions and
    /// compatibility level, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns the first error hit by any per-subject lookup, after all
    /// lookups have finished.
    pub async fn list_subjects(&self) -> Result<Vec<Subject>, ClientError> {
        let active: Vec<String> = self
            .get_json(self.url(&["subjects"])?, &[], "list subjects")
            .await?;
        let all: Vec<String> = self
            .get_json(
                self.url(&["subjects"])?,
                &[("deleted", "true")],
                "list deleted subjects",
            )
            .await?;

        let active_set: HashSet<&str> = active.iter().map(String::as_str).collect();
        let mut names: Vec<(String, bool)> = active.iter().map(|s| (s.clone(), false)).collect();
        names.extend(
            all.iter()
                .filter(|s| !active_set.contains(s.as_str()))
                .map(|s| (s.clone(), true)),
        );

        let mut tasks = JoinSet::new();
        for (name, deleted) in names {
            let client = self.clone();
            tasks.spawn(async move { client.subject_details(name, deleted).await });
        }

        let mut subjects = Vec::with_capacity(tasks.len());
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| ClientError::Internal(format!("subject task failed: {e}")))
                .and_then(|r| r);
            match outcome {
                Ok(subject) => subjects.push(subject),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        subjects.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = subjects.len(), "listed subjects");
        Ok(subjects)
    }

    async fn subject_details(&self, name: String, deleted: bool) -> Result<Subject, ClientError> {
        let query: &[(&str, &str)] = if deleted { &[("deleted", "true")] } else { &[] };
        let mut versions: Vec<i32> = self
            .get_json(
                self.url(&["subjects", &name, "versions"])?,
                query,
                "list versions",
            )
            .await?;
        versions.sort_unstable();
        let compatibility = match self.get_compatibility(&name).await {
            Ok(level) => Some(level),
            Err(ClientError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(Subject {
            name,
            versions,
            compatibility,
            deleted,
        })
    }

    /// Registers an Avro schema under `subject` and returns its id.
    ///
    /// The schema is parsed locally first; invalid schemas never reach
    /// the registry.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidSchema` for unparseable schemas and a
    /// mapped HTTP error otherwise.
    pub async fn create_schema(&self, subject: &str, schema: &str) -> Result<u32, ClientError> {
        apache_avro::Schema::parse_str(schema)
            .map_err(|e| ClientError::InvalidSchema(e.to_string()))?;
        let request = self
            .inner
            .http
            .post(self.url(&["subjects", subject, "versions"])?)
            .json(&SchemaRequest { schema });
        let resp: RegisterSchemaResponse = self.send_json(request, "register schema").await?;
        info!(subject = %subject, id = resp.id, "registered schema");
        Ok(resp.id)
    }

    /// Soft-deletes a subject and returns the deleted versions.
    ///
    /// # Errors
    ///
    /// Returns a mapped HTTP error.
    pub async fn soft_delete_subject(&self, subject: &str) -> Result<Vec<i32>, ClientError> {
        let request = self.inner.http.delete(self.url(&["subjects", subject])?);
        let versions = self.send_json(request, "soft delete subject").await?;
        info!(subject = %subject, "soft deleted subject");
        Ok(versions)
    }

    /// Permanently deletes a soft-deleted subject.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Conflict` if the subject was not soft deleted
    /// first, or another mapped HTTP error.
    pub async fn hard_delete_subject(&self, subject: &str) -> Result<Vec<i32>, ClientError> {
        let request = self
            .inner
            .http
            .delete(self.url(&["subjects", subject])?)
            .query(&[("permanent", "true")]);
        let versions = self.send_json(request, "hard delete subject").await?;
        info!(subject = %subject, "hard deleted subject");
        Ok(versions)
    }

    /// Deletes one version of a subject.
    ///
    /// # Errors
    ///
    /// Returns a mapped HTTP error.
    pub async fn delete_schema_version(
        &self,
        subject: &str,
        version: i32,
    ) -> Result<i32, ClientError> {
        let version_str = version.to_string();
        let request = self
            .inner
            .http
            .delete(self.url(&["subjects", subject, "versions", &version_str])?);
        let deleted = self.send_json(request, "delete schema version").await?;
        info!(subject = %subject, version, "deleted schema version");
        Ok(deleted)
    }

    /// Fetches one version of a subject.
    ///
    /// # Errors
    ///
    /// Returns a mapped HTTP error.
    pub async fn get_schema_version(
        &self,
        subject: &str,
        version: i32,
    ) -> Result<Schema, ClientError> {
        let version_str = version.to_string();
        self.fetch_version(subject, &version_str).await
    }

    /// Fetches the latest version of a subject.
    ///
    /// # Errors
    ///
    /// Returns a mapped HTTP error.
    pub async fn get_latest_schema(&self, subject: &str) -> Result<Schema, ClientError> {
        self.fetch_version(subject, "latest").await
    }

    async fn fetch_version(&self, subject: &str, version: &str) -> Result<Schema, ClientError> {
        let resp: SchemaVersionResponse = self
            .get_json(
                self.url(&["subjects", subject, "versions", version])?,
                &[],
                "get schema version",
            )
            .await?;
        let mut schema = Schema::from(resp);
        if schema.subject.is_empty() {
            schema.subject = subject.to_string();
        }
        Ok(schema)
    }

    /// Streams the requested versions of a subject in order. A version
    /// that fails to load is delivered with its error set.
    pub fn list_versions(&self, subject: &str, versions: Vec<i32>) -> StreamStarted<Schema> {
        let client = self.clone();
        let subject = subject.to_string();
        StreamStarted::spawn("list versions", VERSION_STREAM_BUFFER, move |tx| async move {
            for version in versions {
                let schema = match client.get_schema_version(&subject, version).await {
                    Ok(schema) => schema,
                    Err(e) => Schema::failed(&subject, version, &e),
                };
                if tx.send(schema).await.is_err() {
                    break;
                }
            }
            Ok(())
        })
    }

    /// Fetches a schema by its global id, from the cache when possible.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` for unknown ids or another mapped
    /// HTTP error.
    pub async fn get_schema_by_id(&self, id: u32) -> Result<Arc<Schema>, ClientError> {
        if let Some(cached) = self.inner.cache.read().get(&id) {
            return Ok(Arc::clone(cached));
        }

        let id_str = id.to_string();
        let resp: SchemaByIdResponse = self
            .get_json(self.url(&["schemas", "ids", &id_str])?, &[], "get schema by id")
            .await?;
        let schema = Arc::new(Schema {
            id,
            subject: String::new(),
            version: 0,
            text: resp.schema,
            error: None,
        });

        let mut cache = self.inner.cache.write();
        let entry = cache.entry(id).or_insert_with(|| Arc::clone(&schema));
        debug!(id, "cached schema");
        Ok(Arc::clone(entry))
    }

    /// Gets the effective compatibility level for a subject.
    ///
    /// # Errors
    ///
    /// Returns a mapped HTTP error.
    pub async fn get_compatibility(&self, subject: &str) -> Result<CompatibilityLevel, ClientError> {
        let resp: ConfigResponse = self
            .get_json(
                self.url(&["config", subject])?,
                &[("defaultToGlobal", "true")],
                "get compatibility",
            )
            .await?;
        resp.compatibility_level.parse()
    }

    /// Sets the compatibility level for a subject.
    ///
    /// # Errors
    ///
    /// Returns a mapped HTTP error.
    pub async fn set_compatibility(
        &self,
        subject: &str,
        level: CompatibilityLevel,
    ) -> Result<CompatibilityLevel, ClientError> {
        let request = self
            .inner
            .http
            .put(self.url(&["config", subject])?)
            .json(&ConfigUpdateRequest {
                compatibility: level.as_str(),
            });
        let resp: ConfigResponse = self.send_json(request, "set compatibility").await?;
        info!(subject = %subject, level = %level, "set compatibility");
        resp.compatibility_level.parse()
    }

    /// Checks an Avro schema against the latest version of `subject`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidSchema` for unparseable schemas and a
    /// mapped HTTP error otherwise.
    pub async fn check_compatibility(
        &self,
        subject: &str,
        schema: &str,
    ) -> Result<CompatibilityResult, ClientError> {
        apache_avro::Schema::parse_str(schema)
            .map_err(|e| ClientError::InvalidSchema(e.to_string()))?;
        let request = self
            .inner
            .http
            .post(self.url(&["compatibility", "subjects", subject, "versions", "latest"])?)
            .query(&[("verbose", "true")])
            .json(&SchemaRequest { schema });
        let resp: CompatibilityResponse = self.send_json(request, "check compatibility").await?;
        Ok(CompatibilityResult {
            is_compatible: resp.is_compatible,
            messages: resp.messages,
        })
    }

    /// Appends percent-encoded path segments to the base URL.
    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.inner.base.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::Configuration("invalid schema registry url".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
        context: &str,
    ) -> Result<T, ClientError> {
        let request = self.inner.http.get(url).query(query);
        self.send_json(request, context).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &str,
    ) -> Result<T, ClientError> {
        let resp = self.send(request, context).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ClientError::Protocol(format!("{context}: unexpected response: {e}")))
    }

    async fn send(&self, request: RequestBuilder, context: &str) -> Result<Response, ClientError> {
        let resp = request
            .send()
            .await
            .map_err(|e| request_error(context, &e, self.inner.timeout_ms))?;
        let status = resp.status();
        debug!(url = %resp.url(), status = status.as_u16(), "schema registry call");
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(context, status, &body))
    }
}

impl std::fmt::Debug for SchemaRegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistryClient")
            .field("base_url", &self.base_url())
            .field("cached_schemas", &self.cache_size())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SchemaResolver for SchemaRegistryClient {
    async fn resolve(&self, id: u32) -> Result<Arc<Schema>, ClientError> {
        self.get_schema_by_id(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> SchemaRegistryConfig {
        SchemaRegistryConfig {
            url: url.into(),
            username: None,
            password: None,
            tls: None,
            timeout_secs: None,
        }
    }

    #[test]
    fn test_url_segments_are_encoded() {
        let client = SchemaRegistryClient::new(&config("http://sr:8081")).unwrap();
        let url = client.url(&["subjects", "a/b c", "versions"]).unwrap();
        assert_eq!(url.as_str(), "http://sr:8081/subjects/a%2Fb%20c/versions");
    }

    #[test]
    fn test_url_keeps_base_path() {
        let client = SchemaRegistryClient::new(&config("http://proxy/registry/")).unwrap();
        let url = client.url(&["schemas", "ids", "7"]).unwrap();
        assert_eq!(url.as_str(), "http://proxy/registry/schemas/ids/7");
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            SchemaRegistryClient::new(&config("not a url")),
            Err(ClientError::Configuration(_))
        ));
        assert!(SchemaRegistryClient::new(&config("mailto:x@y")).is_err());
    }

    #[test]
    fn test_new_client_has_empty_cache() {
        let client = SchemaRegistryClient::new(&config("http://sr:8081")).unwrap();
        assert_eq!(client.cache_size(), 0);
        assert!(!client.is_cached(1));
        assert_eq!(client.base_url(), "http://sr:8081/");
    }

    #[tokio::test]
    async fn test_create_schema_rejects_invalid_avro_locally() {
        // Port 9 is discard; the request must never be attempted.
        let client = SchemaRegistryClient::new(&config("http://127.0.0.1:9")).unwrap();
        let err = client.create_schema("s", "{not avro").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidSchema(_)));
    }
}
