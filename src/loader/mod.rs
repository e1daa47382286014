// Module: Loader
// Reads plan files: raw JSON → migrate-on-read → schema gate → serde.

use crate::protocol::{self, Plan};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Loads and deserializes a plan file, migrating old wire versions.
pub fn load_plan_from_file<P: AsRef<Path>>(path: P) -> Result<Plan> {
    let content = fs::read_to_string(&path).with_context(|| {
        format!("Failed to read plan file {}", path.as_ref().display())
    })?;
    load_plan_from_str(&content)
}

/// Same pipeline over an in-memory document (hub responses, tests).
pub fn load_plan_from_str(content: &str) -> Result<Plan> {
    let raw: serde_json::Value =
        serde_json::from_str(content).context("Failed to parse plan JSON")?;
    let migrated = protocol::migrate_to_current(raw)?;
    protocol::schema::validate_raw_plan(&migrated)?;
    let plan: Plan =
        serde_json::from_value(migrated).map_err(protocol::WireError::Deserialize)?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "id": "p1", "name": "health", "project": "shop", "environment": "dev",
        "version": "1.0",
        "nodes": [
            { "type": "HttpRequest", "id": "ping", "method": "GET",
              "base": { "$literal": "https://api.example.com" },
              "path": { "$literal": "/ping" } }
        ],
        "edges": [
            { "source": "__START__", "target": "ping" },
            { "source": "ping", "target": "__END__" }
        ]
    }"#;

    #[test]
    fn test_load_valid_plan() {
        let plan = load_plan_from_str(VALID).unwrap();
        assert_eq!(plan.id, "p1");
        assert_eq!(plan.nodes.len(), 1);
    }

    #[test]
    fn test_schema_gate_runs_before_serde() {
        let err = load_plan_from_str(r#"{ "id": "p1" }"#).unwrap_err();
        assert!(err.to_string().contains("schema"), "{err}");
    }

    #[test]
    fn test_unknown_wire_version_is_rejected() {
        let content = VALID.replace("\"1.0\"", "\"9.9\"");
        let err = load_plan_from_str(&content).unwrap_err();
        assert!(err.to_string().contains("9.9"));
    }

    #[test]
    fn test_missing_file_is_a_readable_error() {
        let err = load_plan_from_file("/does/not/exist.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read plan file"));
    }
}
