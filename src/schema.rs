//! Bundled JSON Schema for serialized snapshots.
//!
//! The schema is compiled once per [`SnapshotSchema`] and pins the exact
//! twelve category keys plus the documented `entries` keys, so stored
//! snapshots can be checked before they are compared.

use anyhow::{Result, anyhow};
use jsonschema::JSONSchema;
use serde_json::Value;

const SNAPSHOT_SCHEMA: &str = include_str!("../schema/snapshot.json");

pub struct SnapshotSchema {
    compiled: JSONSchema,
}

impl SnapshotSchema {
    pub fn load() -> Result<Self> {
        let raw: Value = serde_json::from_str(SNAPSHOT_SCHEMA)
            .map_err(|err| anyhow!("parsing bundled snapshot schema: {err}"))?;
        // Compile errors borrow the schema value, so render them before it drops.
        let compiled = JSONSchema::compile(&raw)
            .map_err(|err| anyhow!("compiling bundled snapshot schema: {err}"))?;
        Ok(Self { compiled })
    }

    /// Every violation as `<instance path>: <message>`; empty when valid.
    pub fn violations(&self, instance: &Value) -> Vec<String> {
        match self.compiled.validate(instance) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|err| format!("{}: {}", err.instance_path, err))
                .collect(),
        }
    }

    pub fn validate(&self, instance: &Value) -> Result<()> {
        let violations = self.violations(instance);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "snapshot failed schema validation:\n{}",
                violations.join("\n")
            ))
        }
    }
}
