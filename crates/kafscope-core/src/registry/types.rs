//! Schema Registry data types.

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Schema Registry compatibility level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompatibilityLevel {
    /// New schema can read old data.
    Backward,
    /// Backward compatible with all prior versions.
    BackwardTransitive,
    /// Old schema can read new data.
    Forward,
    /// Forward compatible with all prior versions.
    ForwardTransitive,
    /// Both backward and forward compatible.
    Full,
    /// Full compatible with all prior versions.
    FullTransitive,
    /// No compatibility checking.
    None,
}

impl CompatibilityLevel {
    /// Returns the Schema Registry API string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CompatibilityLevel::Backward => "BACKWARD",
            CompatibilityLevel::BackwardTransitive => "BACKWARD_TRANSITIVE",
            CompatibilityLevel::Forward => "FORWARD",
            CompatibilityLevel::ForwardTransitive => "FORWARD_TRANSITIVE",
            CompatibilityLevel::Full => "FULL",
            CompatibilityLevel::FullTransitive => "FULL_TRANSITIVE",
            CompatibilityLevel::None => "NONE",
        }
    }
}

impl std::str::FromStr for CompatibilityLevel {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BACKWARD" => Ok(CompatibilityLevel::Backward),
            "BACKWARD_TRANSITIVE" => Ok(CompatibilityLevel::BackwardTransitive),
            "FORWARD" => Ok(CompatibilityLevel::Forward),
            "FORWARD_TRANSITIVE" => Ok(CompatibilityLevel::ForwardTransitive),
            "FULL" => Ok(CompatibilityLevel::Full),
            "FULL_TRANSITIVE" => Ok(CompatibilityLevel::FullTransitive),
            "NONE" => Ok(CompatibilityLevel::None),
            other => Err(ClientError::Protocol(format!(
                "unknown compatibility level: '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for CompatibilityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registry subject with its versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
    /// Subject name, e.g. `orders-value`.
    pub name: String,
    /// Versions in ascending order.
    pub versions: Vec<i32>,
    /// Effective compatibility level, when the registry reports one.
    pub compatibility: Option<CompatibilityLevel>,
    /// Soft-deleted subject.
    pub deleted: bool,
}

/// One schema version, or the error that prevented loading it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    /// Global schema id.
    pub id: u32,
    /// Subject the schema was fetched through; empty for id lookups.
    pub subject: String,
    /// Version within the subject; 0 for id lookups.
    pub version: i32,
    /// Schema text.
    pub text: String,
    /// Why this version could not be loaded.
    pub error: Option<String>,
}

impl Schema {
    pub(crate) fn failed(subject: &str, version: i32, error: &ClientError) -> Self {
        Self {
            id: 0,
            subject: subject.to_string(),
            version,
            text: String::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Result of a compatibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompatibilityResult {
    /// Whether the schema is compatible.
    pub is_compatible: bool,
    /// Incompatibility reasons (if any).
    pub messages: Vec<String>,
}

// -- Schema Registry REST API payloads --

#[derive(Deserialize)]
pub(crate) struct SchemaByIdResponse {
    pub schema: String,
}

#[derive(Deserialize)]
pub(crate) struct SchemaVersionResponse {
    #[serde(default)]
    pub subject: String,
    pub id: u32,
    pub version: i32,
    pub schema: String,
}

impl From<SchemaVersionResponse> for Schema {
    fn from(resp: SchemaVersionResponse) -> Self {
        Self {
            id: resp.id,
            subject: resp.subject,
            version: resp.version,
            text: resp.schema,
            error: None,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct ConfigResponse {
    #[serde(rename = "compatibilityLevel", alias = "compatibility")]
    pub compatibility_level: String,
}

#[derive(Serialize)]
pub(crate) struct ConfigUpdateRequest<'a> {
    pub compatibility: &'a str,
}

#[derive(Serialize)]
pub(crate) struct SchemaRequest<'a> {
    pub schema: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct RegisterSchemaResponse {
    pub id: u32,
}

#[derive(Deserialize)]
pub(crate) struct CompatibilityResponse {
    pub is_compatible: bool,
    #[serde(default)]
    pub messages: Vec<String>,
}

#[derive(Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_level_parsing() {
        assert_eq!(
            "backward_transitive".parse::<CompatibilityLevel>().unwrap(),
            CompatibilityLevel::BackwardTransitive
        );
        assert_eq!(
            "NONE".parse::<CompatibilityLevel>().unwrap(),
            CompatibilityLevel::None
        );
        assert!("SIDEWAYS".parse::<CompatibilityLevel>().is_err());
    }

    #[test]
    fn test_compatibility_level_display() {
        assert_eq!(CompatibilityLevel::FullTransitive.to_string(), "FULL_TRANSITIVE");
    }

    #[test]
    fn test_config_response_both_spellings() {
        let get: ConfigResponse =
            serde_json::from_str(r#"{"compatibilityLevel":"FULL"}"#).unwrap();
        assert_eq!(get.compatibility_level, "FULL");
        let put: ConfigResponse = serde_json::from_str(r#"{"compatibility":"NONE"}"#).unwrap();
        assert_eq!(put.compatibility_level, "NONE");
    }

    #[test]
    fn test_version_response_into_schema() {
        let resp: SchemaVersionResponse = serde_json::from_str(
            r#"{"subject":"orders-value","id":12,"version":3,"schema":"\"string\""}"#,
        )
        .unwrap();
        let schema = Schema::from(resp);
        assert_eq!(schema.id, 12);
        assert_eq!(schema.version, 3);
        assert_eq!(schema.text, "\"string\"");
        assert!(schema.error.is_none());
    }

    #[test]
    fn test_failed_schema_carries_error() {
        let schema = Schema::failed("s", 2, &ClientError::NotFound("version 2".into()));
        assert_eq!(schema.version, 2);
        assert!(schema.error.unwrap().contains("version 2"));
    }
}
