//! TLS material validation.
//!
//! librdkafka reports bad certificate paths late and with generic
//! messages. Profiles are checked up front so the UI can tell the
//! operator exactly what is wrong with which file.

use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use rustls_pemfile::Item;
use tracing::debug;

use crate::config::TlsConfig;
use crate::error::CertificateError;

/// Validates every file referenced by a TLS block.
///
/// # Errors
///
/// Returns the first [`CertificateError`] found.
pub fn validate_tls_files(tls: &TlsConfig) -> Result<(), CertificateError> {
    if !tls.enabled {
        return Ok(());
    }
    if let Some(ca) = &tls.ca_path {
        validate_certificate(ca)?;
    }
    if let Some(cert) = &tls.cert_path {
        validate_certificate(cert)?;
    }
    if let Some(key) = &tls.key_path {
        validate_key_file(key)?;
    }
    Ok(())
}

/// Checks that `path` holds a PEM certificate that is valid right now.
///
/// # Errors
///
/// Returns the matching [`CertificateError`] kind.
pub fn validate_certificate(path: &Path) -> Result<(), CertificateError> {
    let bytes = read_file(path)?;
    let display = path.display().to_string();

    let mut reader = bytes.as_slice();
    let der = match rustls_pemfile::read_one(&mut reader) {
        Ok(Some(Item::X509Certificate(der))) => der,
        Ok(Some(_)) => return Err(CertificateError::NotCertificate { path: display }),
        Ok(None) | Err(_) => return Err(CertificateError::NotPem { path: display }),
    };

    let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref()).map_err(|e| {
        CertificateError::Parse {
            path: display.clone(),
            message: e.to_string(),
        }
    })?;

    let validity = cert.validity();
    check_validity(
        &display,
        validity.not_before.timestamp(),
        validity.not_after.timestamp(),
        Utc::now().timestamp(),
    )?;
    debug!(path = %path.display(), "certificate ok");
    Ok(())
}

/// Checks that a private key file exists and is readable.
///
/// # Errors
///
/// Returns `Missing` or `Unreadable`.
pub fn validate_key_file(path: &Path) -> Result<(), CertificateError> {
    read_file(path).map(|_| ())
}

fn read_file(path: &Path) -> Result<Vec<u8>, CertificateError> {
    std::fs::read(path).map_err(|e| {
        let path = path.display().to_string();
        if e.kind() == ErrorKind::NotFound {
            CertificateError::Missing { path }
        } else {
            CertificateError::Unreadable {
                path,
                message: e.to_string(),
            }
        }
    })
}

/// Rejects `now` outside `[not_before, not_after]` (unix seconds).
fn check_validity(
    path: &str,
    not_before: i64,
    not_after: i64,
    now: i64,
) -> Result<(), CertificateError> {
    if now < not_before {
        return Err(CertificateError::NotYetValid {
            path: path.to_string(),
            not_before: rfc3339(not_before),
        });
    }
    if now > not_after {
        return Err(CertificateError::Expired {
            path: path.to_string(),
            not_after: rfc3339(not_after),
        });
    }
    Ok(())
}

fn rfc3339(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0).map_or_else(|| secs.to_string(), |t| t.to_rfc3339())
}
