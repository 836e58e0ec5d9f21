//! Payload decoding for display.
//!
//! - [`avro`]: Confluent-framed Avro values rendered as JSON
//! - [`header`]: typed best-effort rendering of header bytes

pub mod avro;
pub mod header;

pub use avro::{AvroDecoder, DecodedPayload, SchemaResolver};
pub use header::{render_header_value, HeaderValue};
