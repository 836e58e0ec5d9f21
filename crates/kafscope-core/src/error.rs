//! Error types for the kafscope core.
//!
//! Provides a unified error hierarchy for every command the UI can issue:
//! - `ClientError`: Top-level error surfaced through command handles
//! - `SerdeError`: Payload decoding errors (carried inside records)
//! - `CertificateError`: TLS material validation errors

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;

/// Errors that can occur while talking to Kafka or the Schema Registry.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Brokers or the registry could not be reached.
    #[error("connection failed: {0}")]
    Connectivity(String),

    /// Authentication or authorization error.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Invalid TLS material in the cluster profile.
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] CertificateError),

    /// The remote side answered with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Payload serialization or deserialization error.
    #[error("serde error: {0}")]
    Serialization(#[from] SerdeError),

    /// Consuming a single partition failed.
    #[error("partition {partition} failed: {message}")]
    Partition {
        /// The partition that failed.
        partition: i32,
        /// Details about the failure.
        message: String,
    },

    /// The topic, group, broker, subject or schema does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource already exists or is in a conflicting state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The registry (or the local parser) rejected a schema.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The active cluster has no such service configured.
    #[error("{0} is not configured for this cluster")]
    NotConfigured(&'static str),

    /// The request failed local validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Operation timed out.
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// An I/O error from the underlying system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error that doesn't fit other categories.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Classifies an rdkafka error, prefixing the message with `context`.
    #[must_use]
    pub fn from_kafka(context: &str, err: &KafkaError) -> Self {
        match err.rdkafka_error_code() {
            Some(code) => Self::from_code(context, code),
            None => ClientError::Protocol(format!("{context}: {err}")),
        }
    }

    /// Classifies a broker error code.
    #[must_use]
    pub fn from_code(context: &str, code: RDKafkaErrorCode) -> Self {
        let message = format!("{context}: {code}");
        match code {
            RDKafkaErrorCode::Authentication
            | RDKafkaErrorCode::SaslAuthenticationFailed
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::GroupAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed => {
                ClientError::Authentication(message)
            }
            RDKafkaErrorCode::TopicAlreadyExists | RDKafkaErrorCode::NonEmptyGroup => {
                ClientError::Conflict(message)
            }
            RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::UnknownPartition
            | RDKafkaErrorCode::GroupIdNotFound => ClientError::NotFound(message),
            RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::Resolve
            | RDKafkaErrorCode::BrokerNotAvailable
            | RDKafkaErrorCode::SSL
            | RDKafkaErrorCode::OperationTimedOut
            | RDKafkaErrorCode::RequestTimedOut => ClientError::Connectivity(message),
            _ => ClientError::Protocol(message),
        }
    }

    /// Returns `true` for cancellation, which the UI treats as a quiet stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }
}

/// Errors that occur while decoding record payloads.
///
/// Cloneable because it travels inside delivered records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerdeError {
    /// Schema ID not found in registry.
    #[error("schema not found: schema ID {schema_id}")]
    SchemaNotFound {
        /// The schema ID that was not found.
        schema_id: u32,
    },

    /// The registry lookup failed for another reason.
    #[error("schema registry lookup failed for schema ID {schema_id}: {message}")]
    SchemaRegistry {
        /// The schema ID being resolved.
        schema_id: u32,
        /// Failure details.
        message: String,
    },

    /// The registry returned schema text that is not valid Avro.
    #[error("schema ID {schema_id} is not a valid Avro schema: {message}")]
    SchemaParse {
        /// The schema ID whose text failed to parse.
        schema_id: u32,
        /// Parser output.
        message: String,
    },

    /// The payload does not match its writer schema.
    #[error("Avro decode error (schema ID {schema_id}): {message}")]
    AvroDecode {
        /// The writer schema ID.
        schema_id: u32,
        /// The decode failure details.
        message: String,
    },

    /// The decoded datum could not be rendered as JSON.
    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for SerdeError {
    fn from(e: serde_json::Error) -> Self {
        SerdeError::Json(e.to_string())
    }
}

/// Problems found while validating a certificate or key file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateError {
    /// The file does not exist.
    #[error("certificate file '{path}' does not exist")]
    Missing {
        /// Path from the profile.
        path: String,
    },

    /// The file exists but cannot be read.
    #[error("certificate file '{path}' is unreadable: {message}")]
    Unreadable {
        /// Path from the profile.
        path: String,
        /// OS error text.
        message: String,
    },

    /// The file contains no PEM block.
    #[error("'{path}' is not PEM encoded")]
    NotPem {
        /// Path from the profile.
        path: String,
    },

    /// The first PEM block is not a certificate.
    #[error("'{path}' does not start with a CERTIFICATE block")]
    NotCertificate {
        /// Path from the profile.
        path: String,
    },

    /// The certificate DER could not be parsed.
    #[error("failed to parse certificate '{path}': {message}")]
    Parse {
        /// Path from the profile.
        path: String,
        /// Parser output.
        message: String,
    },

    /// The current time is after `notAfter`.
    #[error("certificate '{path}' expired at {not_after}")]
    Expired {
        /// Path from the profile.
        path: String,
        /// RFC 3339 end of validity.
        not_after: String,
    },

    /// The current time is before `notBefore`.
    #[error("certificate '{path}' is not valid before {not_before}")]
    NotYetValid {
        /// Path from the profile.
        path: String,
        /// RFC 3339 start of validity.
        not_before: String,
    },
}
