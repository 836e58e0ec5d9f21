//! HTTP transport for the Schema Registry.
//!
//! Builds one `reqwest` client per registry with basic auth baked into
//! its default headers and the registry's TLS settings applied.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Certificate, Client, Identity, StatusCode};

use super::types::ErrorResponse;
use crate::config::SchemaRegistryConfig;
use crate::error::ClientError;
use crate::kafka::tls::validate_tls_files;

/// Registry error code for a hard delete of a subject that was not soft
/// deleted first.
pub const SUBJECT_NOT_SOFT_DELETED: i64 = 40405;
/// Registry error code for a hard delete of a version that was not soft
/// deleted first.
pub const SCHEMA_VERSION_NOT_SOFT_DELETED: i64 = 40406;

/// `Basic base64(user:pass)`.
#[must_use]
pub fn basic_auth_value(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// Builds the decorated HTTP client for a registry.
///
/// # Errors
///
/// Returns `ClientError::TlsConfig` for bad certificate files and
/// `ClientError::Configuration` if the client cannot be built.
pub fn build_http_client(config: &SchemaRegistryConfig) -> Result<Client, ClientError> {
    let mut headers = HeaderMap::new();
    if let Some((username, password)) = config.credentials() {
        let mut value = HeaderValue::from_str(&basic_auth_value(username, password))
            .map_err(|e| ClientError::Configuration(format!("schema registry credentials: {e}")))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    let mut builder = Client::builder()
        .default_headers(headers)
        .timeout(config.timeout());

    if let Some(tls) = config.tls.as_ref().filter(|t| t.enabled) {
        validate_tls_files(tls)?;
        if tls.skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca) = &tls.ca_path {
            let pem = std::fs::read(ca)?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|e| ClientError::Configuration(format!("schema registry CA: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert), Some(key)) = (&tls.cert_path, &tls.key_path) {
            let mut pem = std::fs::read(cert)?;
            pem.push(b'\n');
            pem.extend(std::fs::read(key)?);
            let identity = Identity::from_pem(&pem).map_err(|e| {
                ClientError::Configuration(format!("schema registry client identity: {e}"))
            })?;
            builder = builder.identity(identity);
        }
    }

    builder
        .build()
        .map_err(|e| ClientError::Configuration(format!("schema registry client: {e}")))
}

/// Maps a transport failure.
pub(crate) fn request_error(context: &str, err: &reqwest::Error, timeout_ms: u64) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout(timeout_ms)
    } else if err.is_decode() {
        ClientError::Protocol(format!("{context}: {err}"))
    } else {
        ClientError::Connectivity(format!("schema registry {context}: {err}"))
    }
}

/// Maps a non-success HTTP status and its body.
pub(crate) fn status_error(context: &str, status: StatusCode, body: &str) -> ClientError {
    let parsed: Option<ErrorResponse> = serde_json::from_str(body).ok();
    let (code, message) = match parsed {
        Some(e) => (e.error_code, e.message),
        None => (None, body.trim().to_string()),
    };
    let detail = if message.is_empty() {
        format!("{context}: {status}")
    } else {
        format!("{context}: {message}")
    };

    match (status, code) {
        (_, Some(SUBJECT_NOT_SOFT_DELETED | SCHEMA_VERSION_NOT_SOFT_DELETED)) => {
            ClientError::Conflict(detail)
        }
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => ClientError::Authentication(detail),
        (StatusCode::NOT_FOUND, _) => ClientError::NotFound(detail),
        (StatusCode::CONFLICT, _) => ClientError::Conflict(detail),
        (StatusCode::UNPROCESSABLE_ENTITY, _) => ClientError::InvalidSchema(detail),
        _ => ClientError::Protocol(format!("{detail} ({status})")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_value() {
        assert_eq!(basic_auth_value("user", "pass"), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error("get", StatusCode::UNAUTHORIZED, ""),
            ClientError::Authentication(_)
        ));
        assert!(matches!(
            status_error(
                "get",
                StatusCode::NOT_FOUND,
                r#"{"error_code":40401,"message":"Subject 'x' not found."}"#
            ),
            ClientError::NotFound(msg) if msg.contains("Subject 'x' not found.")
        ));
        assert!(matches!(
            status_error("register", StatusCode::CONFLICT, "{}"),
            ClientError::Conflict(_)
        ));
        assert!(matches!(
            status_error(
                "register",
                StatusCode::UNPROCESSABLE_ENTITY,
                r#"{"error_code":42201,"message":"Invalid schema"}"#
            ),
            ClientError::InvalidSchema(_)
        ));
        assert!(matches!(
            status_error("get", StatusCode::BAD_GATEWAY, "upstream down"),
            ClientError::Protocol(msg) if msg.contains("upstream down")
        ));
    }

    #[test]
    fn test_hard_delete_without_soft_is_conflict() {
        let err = status_error(
            "hard delete",
            StatusCode::NOT_FOUND,
            r#"{"error_code":40405,"message":"Subject 'x' was not deleted first before being permanently deleted"}"#,
        );
        assert!(matches!(err, ClientError::Conflict(_)));
    }

    #[test]
    fn test_build_client_with_credentials() {
        let config = SchemaRegistryConfig {
            url: "http://localhost:8081".into(),
            username: Some("u".into()),
            password: Some("p".into()),
            tls: None,
            timeout_secs: Some(2),
        };
        build_http_client(&config).unwrap();
    }

    #[test]
    fn test_build_client_rejects_missing_ca() {
        let config = SchemaRegistryConfig {
            url: "https://localhost:8081".into(),
            username: None,
            password: None,
            tls: Some(crate::config::TlsConfig {
                ca_path: Some("/missing/ca.pem".into()),
                ..crate::config::TlsConfig::default()
            }),
            timeout_secs: None,
        };
        assert!(matches!(
            build_http_client(&config),
            Err(ClientError::TlsConfig(_))
        ));
    }
}
