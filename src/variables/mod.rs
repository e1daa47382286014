// Module: Variables
// Resolves {$variable} leaves before a plan is persisted or executed.
// Secrets stay in place; they are resolved at execution time instead.

use std::collections::HashMap;
use thiserror::Error;

use crate::protocol::{Node, Plan, StringValue, VariableRef};
use serde_json::Value;

/// Placeholder replaced by the resolved value inside a template.
const TEMPLATE_MARKER: &str = "${value}";

#[derive(Debug, Error)]
pub enum VariableError {
    #[error("variable '{key}' is not defined")]
    Missing { key: String },
}

/// Resolves every `{$variable}` leaf of a plan against `values`.
///
/// Returns a deep copy: the input plan is immutable by contract.
pub fn resolve_plan(
    plan: &Plan,
    values: &HashMap<String, String>,
) -> Result<Plan, VariableError> {
    let mut resolved = plan.clone();

    for node in &mut resolved.nodes {
        let Node::HttpRequest(http) = node else {
            continue;
        };

        http.base = resolve_leaf(&http.base, values)?;
        http.path = resolve_leaf(&http.path, values)?;

        if let Some(headers) = &mut http.headers {
            for leaf in headers.values_mut() {
                *leaf = resolve_leaf(leaf, values)?;
            }
        }

        if let Some(body) = &mut http.body {
            *body = resolve_value(body, values)?;
        }
    }

    Ok(resolved)
}

fn resolve_leaf(
    leaf: &StringValue,
    values: &HashMap<String, String>,
) -> Result<StringValue, VariableError> {
    match leaf {
        StringValue::Variable { variable } => {
            Ok(StringValue::literal(resolve_ref(variable, values)?))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_ref(
    variable: &VariableRef,
    values: &HashMap<String, String>,
) -> Result<String, VariableError> {
    let value = values.get(&variable.key).ok_or_else(|| VariableError::Missing {
        key: variable.key.clone(),
    })?;

    Ok(match &variable.template {
        Some(template) => template.replace(TEMPLATE_MARKER, value),
        None => value.clone(),
    })
}

/// Recursively resolves `{$variable}` objects inside a JSON tree.
fn resolve_value(
    value: &Value,
    values: &HashMap<String, String>,
) -> Result<Value, VariableError> {
    if let Some(variable) = as_variable_leaf(value) {
        return Ok(Value::String(resolve_ref(&variable, values)?));
    }

    match value {
        Value::Array(items) => {
            let mut result = Vec::with_capacity(items.len());
            for item in items {
                result.push(resolve_value(item, values)?);
            }
            Ok(Value::Array(result))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, values)?);
            }
            Ok(Value::Object(out))
        }
        primitive => Ok(primitive.clone()),
    }
}

/// Lists the variable keys of every `{$variable}` leaf in a JSON tree.
/// Used by validation to reject unresolved plans at execution time.
pub fn variable_leaves(value: &Value) -> Vec<String> {
    let mut keys = Vec::new();
    collect(value, &mut keys);
    keys
}

fn collect(value: &Value, keys: &mut Vec<String>) {
    if let Some(variable) = as_variable_leaf(value) {
        keys.push(variable.key);
        return;
    }
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect(v, keys)),
        Value::Object(map) => map.values().for_each(|v| collect(v, keys)),
        _ => {}
    }
}

fn as_variable_leaf(value: &Value) -> Option<VariableRef> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    serde_json::from_value(map.get("$variable")?.clone()).ok()
}
