//! JSON Schema checks for persisted records.

use anyhow::{Context, Result, bail};
use jsonschema::{Draft, Validator};
use serde_json::Value;

pub const LOG_RECORD_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/log_record.schema.json"
));
pub const PENDING_REQUEST_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/pending_request.schema.json"
));

/// A compiled schema (Draft 2020-12).
pub struct SchemaCheck {
    validator: Validator,
}

impl SchemaCheck {
    pub fn new(schema_src: &str) -> Result<Self> {
        let schema: Value = serde_json::from_str(schema_src).context("parse json schema")?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .context("compile json schema")?;
        Ok(Self { validator })
    }

    pub fn log_record() -> Result<Self> {
        Self::new(LOG_RECORD_SCHEMA)
    }

    pub fn pending_request() -> Result<Self> {
        Self::new(PENDING_REQUEST_SCHEMA)
    }

    pub fn check(&self, instance: &Value) -> Result<()> {
        let messages: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            bail!("schema validation failed: {}", messages.join("; "));
        }
        Ok(())
    }
}
