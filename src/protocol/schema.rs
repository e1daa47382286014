//! Schema embutido do formato de fio "1.0".
//!
//! O JSON de um plano chega de fora do processo (DSL de autoria, hub,
//! arquivos locais) e é tratado como entrada não confiável: antes da
//! desserialização serde, o documento cru passa por este JSON Schema.
//! O schema rejeita cedo, com mensagens posicionais, o que o serde só
//! reportaria campo a campo.

use crate::protocol::WireError;
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_json::{json, Value};

static PLAN_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    JSONSchema::compile(&plan_schema_document()).expect("embedded plan schema is valid")
});

fn plan_schema_document() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["id", "name", "project", "environment", "nodes", "edges"],
        "properties": {
            "id": { "type": "string", "minLength": 1 },
            "name": { "type": "string", "minLength": 1 },
            "project": { "type": "string", "minLength": 1 },
            "environment": { "type": "string", "minLength": 1 },
            "version": { "enum": ["1.0"] },
            "frequency": {
                "type": ["object", "null"],
                "required": ["every", "unit"],
                "properties": {
                    "every": { "type": "integer", "minimum": 1 },
                    "unit": { "enum": ["MINUTE", "HOUR", "DAY"] }
                }
            },
            "locations": {
                "type": "array",
                "items": { "type": "string", "minLength": 1 }
            },
            "nodes": {
                "type": "array",
                "items": { "$ref": "#/definitions/node" }
            },
            "edges": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["source", "target"],
                    "properties": {
                        "source": { "type": "string", "minLength": 1 },
                        "target": { "type": "string", "minLength": 1 }
                    }
                }
            }
        },
        "definitions": {
            "stringValue": {
                "type": "object",
                "oneOf": [
                    {
                        "required": ["$literal"],
                        "properties": { "$literal": { "type": "string" } }
                    },
                    {
                        "required": ["$secret"],
                        "properties": {
                            "$secret": {
                                "type": "object",
                                "required": ["provider", "ref"],
                                "properties": {
                                    "provider": { "type": "string", "minLength": 1 },
                                    "ref": { "type": "string", "minLength": 1 },
                                    "version": { "type": "string" },
                                    "field": { "type": "string" }
                                }
                            }
                        }
                    },
                    {
                        "required": ["$variable"],
                        "properties": {
                            "$variable": {
                                "type": "object",
                                "required": ["key"],
                                "properties": {
                                    "key": { "type": "string", "minLength": 1 },
                                    "template": { "type": "string" }
                                }
                            }
                        }
                    }
                ]
            },
            "node": {
                "type": "object",
                "required": ["type", "id"],
                "properties": {
                    "type": { "enum": ["HttpRequest", "Wait", "Assertions"] },
                    "id": { "type": "string", "minLength": 1 }
                },
                "allOf": [
                    {
                        "if": { "properties": { "type": { "const": "HttpRequest" } } },
                        "then": {
                            "required": ["method", "base", "path"],
                            "properties": {
                                "method": {
                                    "enum": ["GET", "POST", "PUT", "DELETE", "PATCH",
                                             "HEAD", "OPTIONS", "CONNECT", "TRACE"]
                                },
                                "base": { "$ref": "#/definitions/stringValue" },
                                "path": { "$ref": "#/definitions/stringValue" },
                                "headers": {
                                    "type": "object",
                                    "additionalProperties": { "$ref": "#/definitions/stringValue" }
                                },
                                "response_format": { "enum": ["JSON", "XML"] }
                            }
                        }
                    },
                    {
                        "if": { "properties": { "type": { "const": "Wait" } } },
                        "then": {
                            "required": ["duration_ms"],
                            "properties": {
                                "duration_ms": { "type": "integer", "minimum": 0 }
                            }
                        }
                    },
                    {
                        "if": { "properties": { "type": { "const": "Assertions" } } },
                        "then": {
                            "required": ["assertions"],
                            "properties": {
                                "assertions": { "type": "array" }
                            }
                        }
                    }
                ]
            }
        }
    })
}

/// Valida o JSON cru de um plano contra o schema embutido.
///
/// Retorna no máximo os três primeiros erros, com o caminho da
/// instância, para não poluir a saída da CLI.
pub fn validate_raw_plan(raw: &Value) -> Result<(), WireError> {
    let result = PLAN_SCHEMA.validate(raw);
    if let Err(errors) = result {
        let details: Vec<String> = errors
            .map(|e| format!("{} at {}", e, e.instance_path))
            .take(3)
            .collect();
        return Err(WireError::Schema {
            details: details.join("; "),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_plan() -> Value {
        json!({
            "id": "p1",
            "name": "health",
            "project": "shop",
            "environment": "dev",
            "version": "1.0",
            "nodes": [
                {
                    "type": "HttpRequest",
                    "id": "get-users",
                    "method": "GET",
                    "base": { "$literal": "https://api.example.com" },
                    "path": { "$literal": "/users" }
                }
            ],
            "edges": [
                { "source": "__START__", "target": "get-users" },
                { "source": "get-users", "target": "__END__" }
            ]
        })
    }

    #[test]
    fn test_minimal_plan_passes() {
        assert!(validate_raw_plan(&minimal_plan()).is_ok());
    }

    #[test]
    fn test_missing_required_field_fails() {
        let mut plan = minimal_plan();
        plan.as_object_mut().unwrap().remove("project");
        let err = validate_raw_plan(&plan).unwrap_err();
        assert!(err.to_string().contains("project"));
    }

    #[test]
    fn test_unknown_node_type_fails() {
        let mut plan = minimal_plan();
        plan["nodes"][0]["type"] = json!("Browser");
        assert!(validate_raw_plan(&plan).is_err());
    }

    #[test]
    fn test_http_node_without_method_fails() {
        let mut plan = minimal_plan();
        plan["nodes"][0].as_object_mut().unwrap().remove("method");
        assert!(validate_raw_plan(&plan).is_err());
    }

    #[test]
    fn test_frequency_zero_every_fails() {
        let mut plan = minimal_plan();
        plan["frequency"] = json!({ "every": 0, "unit": "MINUTE" });
        assert!(validate_raw_plan(&plan).is_err());
    }

    #[test]
    fn test_secret_leaf_accepted() {
        let mut plan = minimal_plan();
        plan["nodes"][0]["headers"] = json!({
            "Authorization": { "$secret": { "provider": "env", "ref": "TOKEN" } }
        });
        assert!(validate_raw_plan(&plan).is_ok());
    }
}
