//! Cluster profile types.
//!
//! A [`ClusterProfile`] describes how to reach one Kafka cluster: its
//! bootstrap endpoints, SASL and TLS settings, and optionally a Schema
//! Registry and Kafka Connect endpoints. Profiles are plain serde types;
//! [`ClusterProfile::to_client_config`] turns one into an rdkafka
//! [`ClientConfig`].

use std::path::PathBuf;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Default timeout for admin, metadata and offset calls.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for Schema Registry HTTP requests.
pub const DEFAULT_REGISTRY_TIMEOUT: Duration = Duration::from_secs(10);

/// SASL mechanism used to authenticate against the brokers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SaslMechanism {
    /// No SASL authentication.
    #[default]
    #[serde(rename = "NONE", alias = "none")]
    None,
    /// SASL/PLAIN.
    #[serde(rename = "PLAIN", alias = "plain")]
    Plain,
    /// SASL/SCRAM with SHA-256.
    #[serde(rename = "SCRAM-SHA-256", alias = "scram-sha-256")]
    ScramSha256,
    /// SASL/SCRAM with SHA-512.
    #[serde(rename = "SCRAM-SHA-512", alias = "scram-sha-512")]
    ScramSha512,
}

impl SaslMechanism {
    /// Returns the rdkafka `sasl.mechanism` value, or `None` when disabled.
    #[must_use]
    pub fn as_rdkafka_str(&self) -> Option<&'static str> {
        match self {
            SaslMechanism::None => None,
            SaslMechanism::Plain => Some("PLAIN"),
            SaslMechanism::ScramSha256 => Some("SCRAM-SHA-256"),
            SaslMechanism::ScramSha512 => Some("SCRAM-SHA-512"),
        }
    }
}

impl std::str::FromStr for SaslMechanism {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('_', "-").as_str() {
            "" | "NONE" => Ok(SaslMechanism::None),
            "PLAIN" => Ok(SaslMechanism::Plain),
            "SCRAM-SHA-256" => Ok(SaslMechanism::ScramSha256),
            "SCRAM-SHA-512" => Ok(SaslMechanism::ScramSha512),
            other => Err(ClientError::Configuration(format!(
                "invalid sasl mechanism: '{other}' (expected PLAIN/SCRAM-SHA-256/SCRAM-SHA-512)"
            ))),
        }
    }
}

impl std::fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_rdkafka_str().unwrap_or("NONE"))
    }
}

/// Transport requested by the SASL block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaslSecurityProtocol {
    /// SASL over a plaintext connection.
    #[serde(rename = "PLAINTEXT", alias = "plaintext")]
    Plaintext,
    /// SASL over TLS.
    #[serde(rename = "SSL", alias = "ssl")]
    Ssl,
}

/// Effective `security.protocol` for a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityProtocol {
    /// No TLS, no SASL.
    Plaintext,
    /// TLS only.
    Ssl,
    /// SASL without TLS.
    SaslPlaintext,
    /// SASL over TLS.
    SaslSsl,
}

impl SecurityProtocol {
    /// Returns the rdkafka config value string.
    #[must_use]
    pub fn as_rdkafka_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::Ssl => "ssl",
            SecurityProtocol::SaslPlaintext => "sasl_plaintext",
            SecurityProtocol::SaslSsl => "sasl_ssl",
        }
    }

    /// Returns `true` when the transport is TLS.
    #[must_use]
    pub fn uses_tls(&self) -> bool {
        matches!(self, SecurityProtocol::Ssl | SecurityProtocol::SaslSsl)
    }
}

impl std::fmt::Display for SecurityProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_rdkafka_str())
    }
}

/// SASL credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SaslConfig {
    /// SASL username.
    #[serde(default)]
    pub username: String,
    /// SASL password.
    #[serde(default)]
    pub password: String,
    /// Mechanism; `NONE` disables SASL.
    #[serde(default)]
    pub mechanism: SaslMechanism,
    /// Transport for the SASL session. Absent means TLS unless the
    /// profile's TLS block says otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_protocol: Option<SaslSecurityProtocol>,
}

/// TLS settings shared by the broker and registry connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TlsConfig {
    /// Whether TLS is used at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Skip server certificate verification.
    #[serde(default)]
    pub skip_verify: bool,
    /// PEM file with the CA certificate(s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_path: Option<PathBuf>,
    /// PEM file with the client certificate for mTLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,
    /// PEM file with the client private key for mTLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_verify: false,
            ca_path: None,
            cert_path: None,
            key_path: None,
        }
    }
}

impl TlsConfig {
    fn validate(&self, owner: &str) -> Result<(), ClientError> {
        if self.cert_path.is_some() && self.key_path.is_none() {
            return Err(ClientError::Configuration(format!(
                "{owner}: client certificate requires a client key"
            )));
        }
        if self.key_path.is_some() && self.cert_path.is_none() {
            return Err(ClientError::Configuration(format!(
                "{owner}: client key requires a client certificate"
            )));
        }
        Ok(())
    }
}

/// Schema Registry endpoint for a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchemaRegistryConfig {
    /// Base URL, e.g. `https://registry:8081`.
    pub url: String,
    /// Basic auth username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Basic auth password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// TLS settings for HTTPS registries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl SchemaRegistryConfig {
    /// Returns the per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .map_or(DEFAULT_REGISTRY_TIMEOUT, Duration::from_secs)
    }

    /// Returns the basic auth pair when both halves are set.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) if !u.is_empty() => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }

    fn validate(&self, owner: &str) -> Result<(), ClientError> {
        if self.url.trim().is_empty() {
            return Err(ClientError::Configuration(format!(
                "{owner}: schema registry url cannot be empty"
            )));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(ClientError::Configuration(format!(
                "{owner}: schema registry username and password must be set together"
            )));
        }
        if let Some(tls) = &self.tls {
            tls.validate(owner)?;
        }
        Ok(())
    }
}

/// A Kafka Connect REST endpoint attached to a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KafkaConnectConfig {
    /// Display name.
    pub name: String,
    /// REST base URL.
    pub url: String,
    /// Basic auth username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Basic auth password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Everything needed to connect to one Kafka cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterProfile {
    /// Unique profile name.
    pub name: String,
    /// Display color used by the UI.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub color: String,
    /// Bootstrap endpoints (`host:port`).
    pub bootstrap_servers: Vec<String>,
    /// SASL settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sasl: Option<SaslConfig>,
    /// TLS settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    /// Schema Registry endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_registry: Option<SchemaRegistryConfig>,
    /// Kafka Connect endpoints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kafka_connect: Vec<KafkaConnectConfig>,
    /// Whether this is the active profile.
    #[serde(default)]
    pub active: bool,
    /// Timeout for admin, metadata and offset calls, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_timeout_secs: Option<u64>,
}

impl ClusterProfile {
    /// Creates a plaintext profile with the given bootstrap endpoints.
    #[must_use]
    pub fn new(name: impl Into<String>, bootstrap_servers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            color: String::new(),
            bootstrap_servers,
            sasl: None,
            tls: None,
            schema_registry: None,
            kafka_connect: Vec::new(),
            active: false,
            operation_timeout_secs: None,
        }
    }

    /// Returns the timeout for admin, metadata and offset calls.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout_secs
            .map_or(DEFAULT_OPERATION_TIMEOUT, Duration::from_secs)
    }

    /// Returns the SASL block when a mechanism is selected.
    #[must_use]
    pub fn sasl_enabled(&self) -> Option<&SaslConfig> {
        self.sasl
            .as_ref()
            .filter(|s| s.mechanism != SaslMechanism::None)
    }

    /// Resolves the effective `security.protocol`.
    ///
    /// An explicit TLS block always decides whether TLS is used. Without
    /// one, SASL implies TLS unless its own security protocol is
    /// `PLAINTEXT`.
    #[must_use]
    pub fn security_protocol(&self) -> SecurityProtocol {
        let sasl = self.sasl_enabled();
        let tls = match (&self.tls, sasl) {
            (Some(tls), _) => tls.enabled,
            (None, Some(s)) => s.security_protocol != Some(SaslSecurityProtocol::Plaintext),
            (None, None) => false,
        };
        match (sasl.is_some(), tls) {
            (false, false) => SecurityProtocol::Plaintext,
            (false, true) => SecurityProtocol::Ssl,
            (true, false) => SecurityProtocol::SaslPlaintext,
            (true, true) => SecurityProtocol::SaslSsl,
        }
    }

    /// Validates the profile invariants. Does not touch the filesystem.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the profile is invalid.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.name.trim().is_empty() {
            return Err(ClientError::Configuration(
                "cluster name cannot be empty".into(),
            ));
        }
        if self.bootstrap_servers.iter().all(|s| s.trim().is_empty()) {
            return Err(ClientError::Configuration(format!(
                "{}: at least one bootstrap server is required",
                self.name
            )));
        }
        if let Some(sasl) = self.sasl_enabled() {
            if sasl.username.is_empty() || sasl.password.is_empty() {
                return Err(ClientError::Configuration(format!(
                    "{}: {} requires a username and password",
                    self.name, sasl.mechanism
                )));
            }
        }
        if let Some(tls) = &self.tls {
            tls.validate(&self.name)?;
        }
        if let Some(registry) = &self.schema_registry {
            registry.validate(&self.name)?;
        }
        Ok(())
    }

    /// Builds the rdkafka [`ClientConfig`] shared by every client of this
    /// profile.
    #[must_use]
    pub fn to_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        let servers: Vec<&str> = self
            .bootstrap_servers
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        config.set("bootstrap.servers", servers.join(","));
        config.set("client.id", "kafscope");
        let protocol = self.security_protocol();
        config.set("security.protocol", protocol.as_rdkafka_str());

        if protocol.uses_tls() {
            if let Some(tls) = &self.tls {
                if let Some(ca) = &tls.ca_path {
                    config.set("ssl.ca.location", ca.to_string_lossy());
                }
                if let (Some(cert), Some(key)) = (&tls.cert_path, &tls.key_path) {
                    config.set("ssl.certificate.location", cert.to_string_lossy());
                    config.set("ssl.key.location", key.to_string_lossy());
                }
                if tls.skip_verify {
                    config.set("enable.ssl.certificate.verification", "false");
                    config.set("ssl.endpoint.identification.algorithm", "none");
                }
            }
        }

        if let Some(sasl) = self.sasl_enabled() {
            if let Some(mechanism) = sasl.mechanism.as_rdkafka_str() {
                config.set("sasl.mechanism", mechanism);
            }
            config.set("sasl.username", &sasl.username);
            config.set("sasl.password", &sasl.password);
        }

        config
    }
}

fn default_true() -> bool {
    true
}
