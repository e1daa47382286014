//! Dublê de testes do cliente HTTP.
//!
//! O [`StubClient`] devolve respostas enlatadas casadas por URL exata,
//! regex, ou função-predicado sobre a requisição inteira. Requisições
//! sem matcher registrado falham como erro de transporte, exatamente
//! como um alvo fora do ar.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{HttpClient, HttpRequest, HttpResponse, TransportError};

/// Como uma rota do stub decide se casa com uma requisição.
pub enum RouteMatcher {
    /// URL exata (comparação de string).
    Exact(String),
    /// Regex sobre a URL.
    Pattern(Regex),
    /// Predicado arbitrário sobre a requisição.
    Predicate(Box<dyn Fn(&HttpRequest) -> bool + Send + Sync>),
}

impl RouteMatcher {
    fn matches(&self, request: &HttpRequest) -> bool {
        match self {
            RouteMatcher::Exact(url) => request.url == *url,
            RouteMatcher::Pattern(regex) => regex.is_match(&request.url),
            RouteMatcher::Predicate(predicate) => predicate(request),
        }
    }
}

/// Resposta enlatada devolvida por uma rota.
#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub data: Value,
}

impl CannedResponse {
    /// Resposta JSON com o status dado.
    pub fn json(status: u16, data: Value) -> Self {
        Self {
            status,
            status_text: reason_phrase(status).to_string(),
            headers: HashMap::from([(
                "content-type".to_string(),
                "application/json".to_string(),
            )]),
            data,
        }
    }

    /// Resposta sem corpo.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            status_text: reason_phrase(status).to_string(),
            headers: HashMap::new(),
            data: Value::Null,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}

/// Cliente HTTP de testes com rotas enlatadas.
///
/// A primeira rota que casar vence (ordem de registro). Toda requisição
/// recebida fica gravada para inspeção posterior.
#[derive(Default)]
pub struct StubClient {
    routes: Mutex<Vec<(RouteMatcher, CannedResponse)>>,
    recorded: Mutex<Vec<HttpRequest>>,
}

impl StubClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra uma rota por URL exata.
    pub fn on_url(self, url: &str, response: CannedResponse) -> Self {
        self.routes
            .lock()
            .expect("stub routes lock")
            .push((RouteMatcher::Exact(url.to_string()), response));
        self
    }

    /// Registra uma rota por regex de URL.
    ///
    /// Panica se o padrão for inválido; em testes isso é o comportamento
    /// desejado.
    pub fn on_pattern(self, pattern: &str, response: CannedResponse) -> Self {
        let regex = Regex::new(pattern).expect("valid stub route pattern");
        self.routes
            .lock()
            .expect("stub routes lock")
            .push((RouteMatcher::Pattern(regex), response));
        self
    }

    /// Registra uma rota por predicado sobre a requisição.
    pub fn on_request<F>(self, predicate: F, response: CannedResponse) -> Self
    where
        F: Fn(&HttpRequest) -> bool + Send + Sync + 'static,
    {
        self.routes
            .lock()
            .expect("stub routes lock")
            .push((RouteMatcher::Predicate(Box::new(predicate)), response));
        self
    }

    /// Requisições recebidas, na ordem.
    pub fn recorded(&self) -> Vec<HttpRequest> {
        self.recorded.lock().expect("stub recorded lock").clone()
    }
}

#[async_trait]
impl HttpClient for StubClient {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.recorded
            .lock()
            .expect("stub recorded lock")
            .push(request.clone());

        let routes = self.routes.lock().expect("stub routes lock");
        for (matcher, canned) in routes.iter() {
            if matcher.matches(&request) {
                return Ok(HttpResponse {
                    status: canned.status,
                    status_text: canned.status_text.clone(),
                    headers: canned.headers.clone(),
                    data: canned.data.clone(),
                });
            }
        }

        Err(TransportError::Connection(format!(
            "no stub registered for {} {}",
            request.method.as_str(),
            request.url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HttpMethod;
    use serde_json::json;
    use std::time::Duration;

    fn get(url: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: HashMap::new(),
            body: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_exact_url_match() {
        let stub = StubClient::new().on_url(
            "https://api.example.com/users",
            CannedResponse::json(200, json!({ "users": [] })),
        );

        let response = stub
            .request(get("https://api.example.com/users"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.data, json!({ "users": [] }));
    }

    #[tokio::test]
    async fn test_pattern_match() {
        let stub = StubClient::new()
            .on_pattern(r"/users/\d+$", CannedResponse::json(200, json!({ "id": 7 })));

        let response = stub
            .request(get("https://api.example.com/users/7"))
            .await
            .unwrap();
        assert_eq!(response.data["id"], 7);
    }

    #[tokio::test]
    async fn test_predicate_match() {
        let stub = StubClient::new().on_request(
            |request| request.method == HttpMethod::Post && request.body.is_some(),
            CannedResponse::json(201, json!({ "created": true })),
        );

        let request = HttpRequest {
            method: HttpMethod::Post,
            url: "https://api.example.com/users".to_string(),
            headers: HashMap::new(),
            body: Some(json!({ "name": "ana" })),
            timeout: Duration::from_secs(1),
        };
        let response = stub.request(request).await.unwrap();
        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn test_unmatched_request_is_transport_error() {
        let stub = StubClient::new();
        let err = stub.request(get("https://nowhere.example")).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
        assert!(err.to_string().contains("no stub registered"));
    }

    #[tokio::test]
    async fn test_requests_are_recorded_in_order() {
        let stub = StubClient::new()
            .on_pattern(".*", CannedResponse::empty(204));

        stub.request(get("https://a.example")).await.unwrap();
        stub.request(get("https://b.example")).await.unwrap();

        let recorded = stub.recorded();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].url, "https://a.example");
        assert_eq!(recorded[1].url, "https://b.example");
    }

    #[tokio::test]
    async fn test_first_registered_route_wins() {
        let stub = StubClient::new()
            .on_pattern("/users", CannedResponse::empty(200))
            .on_pattern("/users", CannedResponse::empty(500));

        let response = stub.request(get("https://x/users")).await.unwrap();
        assert_eq!(response.status, 200);
    }
}
