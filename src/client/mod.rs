//! # Módulo de Cliente HTTP
//!
//! O motor não fala `reqwest` diretamente: ele depende do trait
//! [`HttpClient`], cujo contrato é
//! `request({method, url, headers?, body?, timeout}) → {status, statusText, headers, data}`.
//!
//! Duas implementações vivem aqui:
//! - [`ReqwestClient`] - a implementação real, com connection pool
//!   reutilizado entre requisições e timeout por requisição.
//! - [`stub::StubClient`] - o dublê de testes, com matchers por URL
//!   exata, regex e função-predicado.
//!
//! Um status HTTP 4xx/5xx **não** é erro de transporte: obter resposta
//! é sucesso; o status é registrado e avaliado por assertions. Erros de
//! transporte (DNS, conexão recusada, timeout) viram [`TransportError`].

pub mod stub;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

use crate::protocol::HttpMethod;

// ============================================================================
// CONTRATO
// ============================================================================

/// Uma requisição já composta pelo motor (URL final, headers resolvidos).
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

/// A resposta observada.
///
/// `data` já vem interpretado: corpo JSON é parseado; corpo não-JSON
/// passa adiante como string; corpo vazio é `null`.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub data: Value,
}

impl HttpResponse {
    /// `true` quando a resposta carrega algum corpo.
    pub fn has_body(&self) -> bool {
        !self.data.is_null()
    }
}

/// Falha de transporte: a requisição não produziu resposta nenhuma.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{0}")]
    Other(String),
}

/// Contrato consumido pelo motor.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

// ============================================================================
// IMPLEMENTAÇÃO REQWEST
// ============================================================================

/// Cliente HTTP real, baseado em `reqwest`.
///
/// O cliente interno é criado uma vez e reutilizado: manter o
/// connection pool entre requisições evita handshakes repetidos.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    // Todos os nove métodos do formato de fio são nomes válidos.
    reqwest::Method::from_bytes(method.as_str().as_bytes())
        .expect("wire methods are valid HTTP methods")
}

#[async_trait]
impl HttpClient for ReqwestClient {
    #[instrument(
        name = "http_request",
        skip_all,
        fields(http.method = %request.method.as_str(), http.url = %request.url, otel.kind = "client")
    )]
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), &request.url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(request.timeout)
            } else if e.is_connect() {
                TransportError::Connection(e.to_string())
            } else {
                TransportError::Other(e.to_string())
            }
        })?;

        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or("").to_string();

        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|value| (k.as_str().to_string(), value.to_string()))
            })
            .collect();

        let raw = response
            .text()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;

        let data = parse_body(&raw);

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text,
            headers,
            data,
        })
    }
}

/// Interpreta o corpo cru: JSON quando possível, string caso contrário,
/// `null` quando vazio.
fn parse_body(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn get(url: String) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url,
            headers: HashMap::new(),
            body: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_parse_body_variants() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"a\":1}"), json!({ "a": 1 }));
        assert_eq!(parse_body("plain text"), json!("plain text"));
    }

    #[tokio::test]
    async fn test_reqwest_client_parses_json_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "users": [{ "id": 1 }] }))
                    .insert_header("x-request-id", "abc"),
            )
            .mount(&server)
            .await;

        let client = ReqwestClient::new();
        let response = client
            .request(get(format!("{}/users", server.uri())))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.data, json!({ "users": [{ "id": 1 }] }));
        assert_eq!(response.headers.get("x-request-id").unwrap(), "abc");
        assert!(response.has_body());
    }

    #[tokio::test]
    async fn test_reqwest_client_5xx_is_a_response_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = ReqwestClient::new();
        let response = client.request(get(server.uri())).await.unwrap();
        assert_eq!(response.status, 503);
        assert!(!response.has_body());
    }

    #[tokio::test]
    async fn test_reqwest_client_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = ReqwestClient::new();
        let mut request = get(server.uri());
        request.timeout = Duration::from_millis(50);

        let err = client.request(request).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_reqwest_client_connection_refused() {
        let client = ReqwestClient::new();
        // Porta reservada sem listener.
        let err = client
            .request(get("http://127.0.0.1:1/none".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Connection(_) | TransportError::Other(_)
        ));
    }
}
