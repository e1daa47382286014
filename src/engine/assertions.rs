//! Avaliador de assertions: extração de sujeito + predicado.
//!
//! Uma assertion lê um **sujeito** da resposta capturada (status,
//! latência, um header, um caminho no body) e aplica um predicado
//! unário ou binário. Quando o nó de origem falhou (sem entrada na
//! tabela de respostas), ou o caminho/header não existe, o sujeito é
//! **indefinido**: indefinido falha todo predicado binário e o
//! `IS_NOT_NULL`.
//!
//! Regras de comparação:
//! - igualdade é estrutural e profunda (números comparados como f64)
//! - `CONTAINS`/`STARTS_WITH`/`ENDS_WITH` (e negações) exigem os dois
//!   lados string; sujeito não-string falha
//! - comparações numéricas exigem sujeito numérico
//! - `IS_EMPTY` vale para `""`, array vazio e objeto sem chaves
//! - headers são procurados sem distinção de maiúsculas; chaves de
//!   body JSON são sensíveis a maiúsculas

use serde_json::Value;
use std::collections::HashMap;

use crate::protocol::{Assertion, BinaryOperator, Predicate, ResponseFormat, UnaryOperator};

/// Mensagem fixa para assertions de body XML (reservado no schema).
pub const XML_NOT_SUPPORTED: &str = "XML assertions are not supported yet";

// ============================================================================
// RESPOSTA CAPTURADA
// ============================================================================

/// Snapshot de uma resposta na tabela de respostas da execução.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub body: Value,
    pub headers: HashMap<String, String>,
    pub status: u16,
    pub duration_ms: u64,
}

// ============================================================================
// RESULTADO
// ============================================================================

/// Resultado de uma assertion individual.
#[derive(Debug, Clone)]
pub struct AssertionOutcome {
    /// Descrição do sujeito ("status", "body.users.0.id", ...).
    pub subject: String,
    pub passed: bool,
    /// Mensagem de falha, presente sse `!passed`.
    pub message: Option<String>,
}

// ============================================================================
// AVALIAÇÃO
// ============================================================================

/// Avalia uma assertion contra a resposta capturada (ou a ausência
/// dela, quando o nó de origem falhou).
pub fn evaluate(assertion: &Assertion, response: Option<&CapturedResponse>) -> AssertionOutcome {
    let subject_label = assertion.subject_label();

    // XML é reservado no schema, mas a avaliação não existe.
    if let Assertion::Body {
        response_type: ResponseFormat::Xml,
        ..
    } = assertion
    {
        return AssertionOutcome {
            subject: subject_label,
            passed: false,
            message: Some(XML_NOT_SUPPORTED.to_string()),
        };
    }

    let subject = extract_subject(assertion, response);
    let predicate = match assertion {
        Assertion::Status { predicate }
        | Assertion::Latency { predicate }
        | Assertion::Headers { predicate, .. }
        | Assertion::Body { predicate, .. } => predicate,
    };

    let passed = evaluate_predicate(predicate, subject.as_ref());
    let message = if passed {
        None
    } else {
        Some(failure_message(&subject_label, predicate, subject.as_ref()))
    };

    AssertionOutcome {
        subject: subject_label,
        passed,
        message,
    }
}

/// Extrai o valor do sujeito. `None` é o "undefined" da especificação.
fn extract_subject(
    assertion: &Assertion,
    response: Option<&CapturedResponse>,
) -> Option<Value> {
    let response = response?;
    match assertion {
        Assertion::Status { .. } => Some(Value::from(response.status)),
        Assertion::Latency { .. } => Some(Value::from(response.duration_ms)),
        Assertion::Headers { header_name, .. } => response
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(header_name))
            .map(|(_, value)| Value::String(value.clone())),
        Assertion::Body { path, .. } => navigate_json(&response.body, path),
    }
}

/// Navega um caminho da esquerda para a direita: segmentos numéricos
/// indexam arrays, os demais indexam objetos.
fn navigate_json(body: &Value, path: &[String]) -> Option<Value> {
    let mut current = body;
    for segment in path {
        current = match current {
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            Value::Object(map) => map.get(segment)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

// ============================================================================
// PREDICADOS
// ============================================================================

fn evaluate_predicate(predicate: &Predicate, subject: Option<&Value>) -> bool {
    match predicate {
        Predicate::Unary { operator } => evaluate_unary(*operator, subject),
        Predicate::Binary { operator, expected } => {
            // Sujeito indefinido falha todo predicado binário.
            let Some(subject) = subject else {
                return false;
            };
            evaluate_binary(*operator, subject, expected)
        }
    }
}

fn evaluate_unary(operator: UnaryOperator, subject: Option<&Value>) -> bool {
    match operator {
        UnaryOperator::IsNull => matches!(subject, None | Some(Value::Null)),
        UnaryOperator::IsNotNull => matches!(subject, Some(v) if !v.is_null()),
        UnaryOperator::IsTrue => matches!(subject, Some(Value::Bool(true))),
        UnaryOperator::IsFalse => matches!(subject, Some(Value::Bool(false))),
        UnaryOperator::IsEmpty => match subject {
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Array(items)) => items.is_empty(),
            Some(Value::Object(map)) => map.is_empty(),
            _ => false,
        },
        UnaryOperator::IsNotEmpty => match subject {
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            _ => false,
        },
    }
}

fn evaluate_binary(operator: BinaryOperator, subject: &Value, expected: &Value) -> bool {
    match operator {
        BinaryOperator::Equal => deep_equal(subject, expected),
        BinaryOperator::NotEqual => !deep_equal(subject, expected),
        BinaryOperator::GreaterThan => compare_numbers(subject, expected, |a, b| a > b),
        BinaryOperator::LessThan => compare_numbers(subject, expected, |a, b| a < b),
        BinaryOperator::GreaterThanOrEqual => compare_numbers(subject, expected, |a, b| a >= b),
        BinaryOperator::LessThanOrEqual => compare_numbers(subject, expected, |a, b| a <= b),
        BinaryOperator::Contains => compare_strings(subject, expected, |s, e| s.contains(e)),
        BinaryOperator::NotContains => compare_strings(subject, expected, |s, e| !s.contains(e)),
        BinaryOperator::StartsWith => compare_strings(subject, expected, |s, e| s.starts_with(e)),
        BinaryOperator::NotStartsWith => {
            compare_strings(subject, expected, |s, e| !s.starts_with(e))
        }
        BinaryOperator::EndsWith => compare_strings(subject, expected, |s, e| s.ends_with(e)),
        BinaryOperator::NotEndsWith => compare_strings(subject, expected, |s, e| !s.ends_with(e)),
    }
}

/// Igualdade estrutural profunda, com números comparados por valor
/// (1 == 1.0).
fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| deep_equal(x, y)))
        }
        _ => a == b,
    }
}

fn compare_numbers<F>(subject: &Value, expected: &Value, cmp: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (subject.as_f64(), expected.as_f64()) {
        (Some(s), Some(e)) => cmp(s, e),
        _ => false,
    }
}

fn compare_strings<F>(subject: &Value, expected: &Value, cmp: F) -> bool
where
    F: Fn(&str, &str) -> bool,
{
    match (subject.as_str(), expected.as_str()) {
        (Some(s), Some(e)) => cmp(s, e),
        _ => false,
    }
}

// ============================================================================
// MENSAGENS DE FALHA
// ============================================================================

fn failure_message(subject: &str, predicate: &Predicate, value: Option<&Value>) -> String {
    let got = display_value(value);
    match predicate {
        Predicate::Unary { operator } => {
            format!("Expected {} {}, got {}", subject, unary_phrase(*operator), got)
        }
        Predicate::Binary { operator, expected } => format!(
            "Expected {} {} {}, got {}",
            subject,
            binary_phrase(*operator),
            display_value(Some(expected)),
            got
        ),
    }
}

fn unary_phrase(operator: UnaryOperator) -> &'static str {
    match operator {
        UnaryOperator::IsNull => "to be null",
        UnaryOperator::IsNotNull => "to be not null",
        UnaryOperator::IsTrue => "to be true",
        UnaryOperator::IsFalse => "to be false",
        UnaryOperator::IsEmpty => "to be empty",
        UnaryOperator::IsNotEmpty => "to be not empty",
    }
}

fn binary_phrase(operator: BinaryOperator) -> &'static str {
    match operator {
        BinaryOperator::Equal => "to equal",
        BinaryOperator::NotEqual => "to not equal",
        BinaryOperator::GreaterThan => "to be greater than",
        BinaryOperator::LessThan => "to be less than",
        BinaryOperator::GreaterThanOrEqual => "to be greater than or equal to",
        BinaryOperator::LessThanOrEqual => "to be less than or equal to",
        BinaryOperator::Contains => "to contain",
        BinaryOperator::NotContains => "to not contain",
        BinaryOperator::StartsWith => "to start with",
        BinaryOperator::NotStartsWith => "to not start with",
        BinaryOperator::EndsWith => "to end with",
        BinaryOperator::NotEndsWith => "to not end with",
    }
}

/// Formata um valor para mensagens: strings sem aspas, resto em JSON
/// compacto, indefinido como "undefined".
fn display_value(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(body: Value) -> CapturedResponse {
        CapturedResponse {
            body,
            headers: HashMap::from([
                ("Content-Type".to_string(), "application/json".to_string()),
                ("X-Request-Id".to_string(), "abc".to_string()),
            ]),
            status: 200,
            duration_ms: 42,
        }
    }

    fn binary(operator: BinaryOperator, expected: Value) -> Predicate {
        Predicate::Binary { operator, expected }
    }

    fn unary(operator: UnaryOperator) -> Predicate {
        Predicate::Unary { operator }
    }

    // ========================================================================
    // Sujeitos
    // ========================================================================

    #[test]
    fn test_status_equal_passes() {
        let assertion = Assertion::Status {
            predicate: binary(BinaryOperator::Equal, json!(200)),
        };
        let outcome = evaluate(&assertion, Some(&response(json!({}))));
        assert!(outcome.passed);
        assert!(outcome.message.is_none());
    }

    #[test]
    fn test_latency_less_than() {
        let assertion = Assertion::Latency {
            predicate: binary(BinaryOperator::LessThan, json!(500)),
        };
        assert!(evaluate(&assertion, Some(&response(json!({})))).passed);

        let assertion = Assertion::Latency {
            predicate: binary(BinaryOperator::LessThan, json!(10)),
        };
        assert!(!evaluate(&assertion, Some(&response(json!({})))).passed);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let assertion = Assertion::Headers {
            header_name: "content-type".to_string(),
            predicate: binary(BinaryOperator::Contains, json!("json")),
        };
        assert!(evaluate(&assertion, Some(&response(json!({})))).passed);
    }

    #[test]
    fn test_missing_header_is_undefined() {
        let assertion = Assertion::Headers {
            header_name: "X-Missing".to_string(),
            predicate: unary(UnaryOperator::IsNotNull),
        };
        let outcome = evaluate(&assertion, Some(&response(json!({}))));
        assert!(!outcome.passed);
        assert!(outcome.message.unwrap().contains("undefined"));
    }

    #[test]
    fn test_body_path_navigation_with_array_index() {
        let body = json!({ "users": [{ "id": 1 }, { "id": 2 }] });
        let assertion = Assertion::Body {
            response_type: ResponseFormat::Json,
            path: vec!["users".to_string(), "1".to_string(), "id".to_string()],
            predicate: binary(BinaryOperator::Equal, json!(2)),
        };
        assert!(evaluate(&assertion, Some(&response(body))).passed);
    }

    #[test]
    fn test_body_keys_are_case_sensitive() {
        let body = json!({ "Value": 1 });
        let assertion = Assertion::Body {
            response_type: ResponseFormat::Json,
            path: vec!["value".to_string()],
            predicate: unary(UnaryOperator::IsNotNull),
        };
        assert!(!evaluate(&assertion, Some(&response(body))).passed);
    }

    // ========================================================================
    // Indefinido (propriedade: isolamento de respostas)
    // ========================================================================

    #[test]
    fn test_undefined_fails_binary_and_is_not_null() {
        // Nó de origem falhou: sem resposta na tabela.
        let equal = Assertion::Status {
            predicate: binary(BinaryOperator::Equal, json!(200)),
        };
        assert!(!evaluate(&equal, None).passed);

        let not_null = Assertion::Body {
            response_type: ResponseFormat::Json,
            path: vec!["any".to_string()],
            predicate: unary(UnaryOperator::IsNotNull),
        };
        assert!(!evaluate(&not_null, None).passed);

        // Até NOT_EQUAL falha com sujeito indefinido.
        let not_equal = Assertion::Status {
            predicate: binary(BinaryOperator::NotEqual, json!(500)),
        };
        assert!(!evaluate(&not_equal, None).passed);
    }

    #[test]
    fn test_undefined_satisfies_is_null() {
        let assertion = Assertion::Headers {
            header_name: "X-Missing".to_string(),
            predicate: unary(UnaryOperator::IsNull),
        };
        assert!(evaluate(&assertion, Some(&response(json!({})))).passed);
    }

    // ========================================================================
    // Operadores
    // ========================================================================

    #[test]
    fn test_deep_equality_on_structures() {
        let body = json!({ "user": { "id": 1, "tags": ["a", "b"] } });
        let assertion = Assertion::Body {
            response_type: ResponseFormat::Json,
            path: vec!["user".to_string()],
            predicate: binary(
                BinaryOperator::Equal,
                json!({ "id": 1, "tags": ["a", "b"] }),
            ),
        };
        assert!(evaluate(&assertion, Some(&response(body))).passed);
    }

    #[test]
    fn test_numeric_equality_ignores_representation() {
        assert!(deep_equal(&json!(1), &json!(1.0)));
        assert!(!deep_equal(&json!(1), &json!(2)));
    }

    #[test]
    fn test_string_operators_require_strings() {
        let body = json!({ "count": 5 });
        let assertion = Assertion::Body {
            response_type: ResponseFormat::Json,
            path: vec!["count".to_string()],
            predicate: binary(BinaryOperator::Contains, json!("5")),
        };
        // Sujeito não-string falha, mesmo com "conteúdo equivalente".
        assert!(!evaluate(&assertion, Some(&response(body))).passed);
    }

    #[test]
    fn test_numeric_comparison_requires_number() {
        let body = json!({ "count": "5" });
        let assertion = Assertion::Body {
            response_type: ResponseFormat::Json,
            path: vec!["count".to_string()],
            predicate: binary(BinaryOperator::GreaterThan, json!(1)),
        };
        assert!(!evaluate(&assertion, Some(&response(body))).passed);
    }

    #[test]
    fn test_starts_and_ends_with() {
        let body = json!({ "name": "griffin-runner" });
        let starts = Assertion::Body {
            response_type: ResponseFormat::Json,
            path: vec!["name".to_string()],
            predicate: binary(BinaryOperator::StartsWith, json!("griffin")),
        };
        let ends = Assertion::Body {
            response_type: ResponseFormat::Json,
            path: vec!["name".to_string()],
            predicate: binary(BinaryOperator::NotEndsWith, json!("hub")),
        };
        assert!(evaluate(&starts, Some(&response(body.clone()))).passed);
        assert!(evaluate(&ends, Some(&response(body))).passed);
    }

    #[test]
    fn test_is_empty_variants() {
        for (value, empty) in [
            (json!(""), true),
            (json!([]), true),
            (json!({}), true),
            (json!("x"), false),
            (json!([1]), false),
            (json!(0), false), // números nunca são "empty"
        ] {
            let body = json!({ "v": value });
            let assertion = Assertion::Body {
                response_type: ResponseFormat::Json,
                path: vec!["v".to_string()],
                predicate: unary(UnaryOperator::IsEmpty),
            };
            assert_eq!(
                evaluate(&assertion, Some(&response(body))).passed,
                empty,
                "IS_EMPTY over {:?}",
                value
            );
        }
    }

    #[test]
    fn test_is_true_is_false() {
        let body = json!({ "ok": true });
        let is_true = Assertion::Body {
            response_type: ResponseFormat::Json,
            path: vec!["ok".to_string()],
            predicate: unary(UnaryOperator::IsTrue),
        };
        let is_false = Assertion::Body {
            response_type: ResponseFormat::Json,
            path: vec!["ok".to_string()],
            predicate: unary(UnaryOperator::IsFalse),
        };
        assert!(evaluate(&is_true, Some(&response(body.clone()))).passed);
        assert!(!evaluate(&is_false, Some(&response(body))).passed);
    }

    // ========================================================================
    // Mensagens e XML
    // ========================================================================

    #[test]
    fn test_failure_message_format() {
        // body.v EQUAL 2 sobre {"v": 1}: a mensagem carrega esperado e obtido.
        let body = json!({ "v": 1 });
        let assertion = Assertion::Body {
            response_type: ResponseFormat::Json,
            path: vec!["v".to_string()],
            predicate: binary(BinaryOperator::Equal, json!(2)),
        };
        let outcome = evaluate(&assertion, Some(&response(body)));
        assert_eq!(
            outcome.message.unwrap(),
            "Expected body.v to equal 2, got 1"
        );
    }

    #[test]
    fn test_xml_body_assertion_fails_with_fixed_message() {
        let assertion = Assertion::Body {
            response_type: ResponseFormat::Xml,
            path: vec!["any".to_string()],
            predicate: unary(UnaryOperator::IsNotNull),
        };
        let outcome = evaluate(&assertion, Some(&response(json!({}))));
        assert!(!outcome.passed);
        assert_eq!(outcome.message.unwrap(), XML_NOT_SUPPORTED);
    }
}
