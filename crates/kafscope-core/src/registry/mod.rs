//! Confluent Schema Registry integration.
//!
//! - [`client`]: async REST client with a process-lifetime schema cache
//! - [`transport`]: HTTP client construction, basic auth and status mapping
//! - [`types`]: subjects, schemas and compatibility levels

pub mod client;
pub mod transport;
pub mod types;

pub use client::SchemaRegistryClient;
pub use types::{CompatibilityLevel, CompatibilityResult, Schema, Subject};
