//! Confluent-framed Avro decoding.
//!
//! [`AvroDecoder`] turns record keys and values into display text. Payloads
//! in the Confluent wire format (`0x00` + 4-byte BE schema ID + Avro
//! binary) are decoded against the writer schema and rendered as JSON;
//! anything else is shown as text.

use std::collections::HashMap;
use std::sync::Arc;

use apache_avro::Schema as AvroSchema;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{ClientError, SerdeError};
use crate::registry::Schema;

/// Confluent wire format magic byte.
pub const CONFLUENT_MAGIC: u8 = 0x00;

/// Size of the Confluent wire format header (1 magic + 4 schema ID).
pub const CONFLUENT_HEADER_SIZE: usize = 5;

/// Looks up writer schemas by their global id.
#[async_trait]
pub trait SchemaResolver: Send + Sync {
    /// Returns the schema registered under `id`.
    async fn resolve(&self, id: u32) -> Result<Arc<Schema>, ClientError>;
}

/// A decoded key or value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedPayload {
    /// Writer schema text, for Confluent-framed payloads that decoded.
    pub schema: Option<String>,
    /// JSON rendering of the datum, or the payload as text.
    pub text: String,
    /// Why the payload could not be decoded.
    pub error: Option<SerdeError>,
}

impl DecodedPayload {
    fn raw(bytes: &[u8]) -> Self {
        Self {
            schema: None,
            text: String::from_utf8_lossy(bytes).into_owned(),
            error: None,
        }
    }

    fn failed(bytes: &[u8], error: SerdeError) -> Self {
        Self {
            error: Some(error),
            ..Self::raw(bytes)
        }
    }
}

/// Extracts the schema id from a Confluent-framed payload.
#[must_use]
pub fn confluent_schema_id(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < CONFLUENT_HEADER_SIZE || bytes[0] != CONFLUENT_MAGIC {
        return None;
    }
    Some(u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]))
}

/// Decoder for record keys and values.
///
/// Parsed writer schemas are cached per id next to the resolver's own
/// text cache. Without a resolver every payload is shown as text.
pub struct AvroDecoder {
    resolver: Option<Arc<dyn SchemaResolver>>,
    parsed: RwLock<HashMap<u32, Arc<AvroSchema>>>,
}

impl AvroDecoder {
    /// Creates a decoder; `None` disables Avro decoding.
    #[must_use]
    pub fn new(resolver: Option<Arc<dyn SchemaResolver>>) -> Self {
        Self {
            resolver,
            parsed: RwLock::new(HashMap::new()),
        }
    }

    /// A decoder that renders every payload as text.
    #[must_use]
    pub fn text_only() -> Self {
        Self::new(None)
    }

    /// Decodes one payload. Never fails: problems are reported in
    /// [`DecodedPayload::error`] with the raw bytes as text.
    pub async fn decode(&self, bytes: &[u8]) -> DecodedPayload {
        let Some(schema_id) = confluent_schema_id(bytes) else {
            return DecodedPayload::raw(bytes);
        };
        let Some(resolver) = &self.resolver else {
            return DecodedPayload::raw(bytes);
        };

        let (schema, text) = match self.writer_schema(resolver.as_ref(), schema_id).await {
            Ok(found) => found,
            Err(e) => return DecodedPayload::failed(bytes, e),
        };

        match render_datum(&schema, schema_id, &bytes[CONFLUENT_HEADER_SIZE..]) {
            Ok(json) => DecodedPayload {
                schema: Some(text),
                text: json,
                error: None,
            },
            Err(e) => DecodedPayload::failed(bytes, e),
        }
    }

    /// Number of parsed schemas held.
    #[must_use]
    pub fn parsed_schemas(&self) -> usize {
        self.parsed.read().len()
    }

    async fn writer_schema(
        &self,
        resolver: &dyn SchemaResolver,
        schema_id: u32,
    ) -> Result<(Arc<AvroSchema>, String), SerdeError> {
        let registered = resolver
            .resolve(schema_id)
            .await
            .map_err(|e| match e {
                ClientError::NotFound(_) => SerdeError::SchemaNotFound { schema_id },
                other => SerdeError::SchemaRegistry {
                    schema_id,
                    message: other.to_string(),
                },
            })?;

        if let Some(parsed) = self.parsed.read().get(&schema_id) {
            return Ok((Arc::clone(parsed), registered.text.clone()));
        }

        let parsed = AvroSchema::parse_str(&registered.text).map_err(|e| {
            SerdeError::SchemaParse {
                schema_id,
                message: e.to_string(),
            }
        })?;
        debug!(schema_id, "parsed writer schema");
        let parsed = Arc::clone(
            self.parsed
                .write()
                .entry(schema_id)
                .or_insert_with(|| Arc::new(parsed)),
        );
        Ok((parsed, registered.text.clone()))
    }
}

impl std::fmt::Debug for AvroDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvroDecoder")
            .field("registry", &self.resolver.is_some())
            .field("parsed_schemas", &self.parsed_schemas())
            .finish()
    }
}

fn render_datum(schema: &AvroSchema, schema_id: u32, mut body: &[u8]) -> Result<String, SerdeError> {
    let value = apache_avro::from_avro_datum(schema, &mut body, None).map_err(|e| {
        SerdeError::AvroDecode {
            schema_id,
            message: e.to_string(),
        }
    })?;
    let json = serde_json::Value::try_from(value).map_err(|e| SerdeError::Json(e.to_string()))?;
    Ok(serde_json::to_string(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticSchemas;
    use apache_avro::types::Value;

    const USER_SCHEMA: &str = r#"{
        "type": "record",
        "name": "User",
        "fields": [
            {"name": "id", "type": "long"},
            {"name": "name", "type": "string"}
        ]
    }"#;

    fn framed(schema_id: u32, body: &[u8]) -> Vec<u8> {
        let mut out = vec![CONFLUENT_MAGIC];
        out.extend_from_slice(&schema_id.to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn user_body(id: i64, name: &str) -> Vec<u8> {
        let schema = AvroSchema::parse_str(USER_SCHEMA).unwrap();
        let record = Value::Record(vec![
            ("id".into(), Value::Long(id)),
            ("name".into(), Value::String(name.into())),
        ]);
        apache_avro::to_avro_datum(&schema, record).unwrap()
    }

    fn decoder() -> AvroDecoder {
        let schemas = StaticSchemas::new().with_schema(7, USER_SCHEMA);
        AvroDecoder::new(Some(Arc::new(schemas)))
    }

    #[test]
    fn test_confluent_schema_id() {
        assert_eq!(confluent_schema_id(&[0, 0, 0, 1, 2, 9]), Some(258));
        assert_eq!(confluent_schema_id(&[0, 0, 0, 1]), None);
        assert_eq!(confluent_schema_id(&[1, 0, 0, 0, 1]), None);
    }

    #[tokio::test]
    async fn test_plain_text_passthrough() {
        let decoded = decoder().decode(b"hello").await;
        assert_eq!(decoded.text, "hello");
        assert!(decoded.schema.is_none());
        assert!(decoded.error.is_none());
    }

    #[tokio::test]
    async fn test_short_payload_with_magic_is_raw() {
        let decoded = decoder().decode(&[0, 0, 7]).await;
        assert!(decoded.error.is_none());
        assert_eq!(decoded.text.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_lossy() {
        let decoded = decoder().decode(&[0xff, b'a']).await;
        assert_eq!(decoded.text, "\u{fffd}a");
    }

    #[tokio::test]
    async fn test_decode_record() {
        let decoder = decoder();
        let decoded = decoder.decode(&framed(7, &user_body(42, "ada"))).await;
        assert!(decoded.error.is_none(), "{:?}", decoded.error);
        let json: serde_json::Value = serde_json::from_str(&decoded.text).unwrap();
        assert_eq!(json, serde_json::json!({"id": 42, "name": "ada"}));
        assert!(decoded.schema.unwrap().contains("User"));
        assert_eq!(decoder.parsed_schemas(), 1);
    }

    #[tokio::test]
    async fn test_parsed_schema_reused() {
        let decoder = decoder();
        decoder.decode(&framed(7, &user_body(1, "a"))).await;
        decoder.decode(&framed(7, &user_body(2, "b"))).await;
        assert_eq!(decoder.parsed_schemas(), 1);
    }

    #[tokio::test]
    async fn test_unknown_schema_id() {
        let decoded = decoder().decode(&framed(99, &user_body(1, "a"))).await;
        assert_eq!(
            decoded.error,
            Some(SerdeError::SchemaNotFound { schema_id: 99 })
        );
        assert!(decoded.schema.is_none());
    }

    #[tokio::test]
    async fn test_registry_failure() {
        let schemas = StaticSchemas::new().unreachable("connection refused");
        let decoder = AvroDecoder::new(Some(Arc::new(schemas)));
        let decoded = decoder.decode(&framed(7, &user_body(1, "a"))).await;
        assert!(matches!(
            decoded.error,
            Some(SerdeError::SchemaRegistry { schema_id: 7, .. })
        ));
    }

    #[tokio::test]
    async fn test_unparseable_schema() {
        let schemas = StaticSchemas::new().with_schema(3, "{not avro");
        let decoder = AvroDecoder::new(Some(Arc::new(schemas)));
        let decoded = decoder.decode(&framed(3, &[2])).await;
        assert!(matches!(
            decoded.error,
            Some(SerdeError::SchemaParse { schema_id: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let body = user_body(42, "a long enough name");
        let decoded = decoder().decode(&framed(7, &body[..body.len() - 4])).await;
        assert!(matches!(
            decoded.error,
            Some(SerdeError::AvroDecode { schema_id: 7, .. })
        ));
        assert!(!decoded.text.is_empty());
    }

    #[tokio::test]
    async fn test_text_only_ignores_framing() {
        let decoded = AvroDecoder::text_only()
            .decode(&framed(7, &user_body(1, "a")))
            .await;
        assert!(decoded.error.is_none());
        assert!(decoded.schema.is_none());
    }
}
