//! Execução de nós HttpRequest.
//!
//! Compõe a URL como `base + path` (os dois já resolvidos para strings
//! puras - sem templating de parâmetros), dispara pelo trait
//! `HttpClient` e registra o par `HTTP_REQUEST`/`HTTP_RESPONSE`.
//!
//! Obter **qualquer** resposta é sucesso do nó: um 500 é registrado,
//! não é falha - o julgamento do status pertence às assertions. Falha
//! de transporte (DNS, conexão, timeout) marca o nó como falho e emite
//! `HTTP_RESPONSE` com `status = 0`, `statusText = "Error"` e
//! `hasBody = false`; os nós seguintes continuam executando.

use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::client::{HttpClient, HttpRequest};
use crate::engine::assertions::CapturedResponse;
use crate::events::{EventEmitter, EventKind};
use crate::protocol::{HttpRequestNode, NodeResult, ResponseFormat, StringValue};

/// Mensagem fixa para `response_format: XML` (reservado no schema).
pub const UNSUPPORTED_RESPONSE_FORMAT: &str = "Unsupported response format";

/// Executa um nó HttpRequest e devolve o resultado mais, em sucesso, a
/// resposta capturada para a tabela de respostas.
pub async fn execute(
    node: &HttpRequestNode,
    client: &dyn HttpClient,
    emitter: &EventEmitter,
    timeout: Duration,
) -> (NodeResult, Option<CapturedResponse>) {
    let start = Instant::now();

    // XML é aceito pelo schema mas não executável: o nó falha antes de
    // qualquer requisição ser composta.
    if node.response_format == ResponseFormat::Xml {
        return (
            failed(node, UNSUPPORTED_RESPONSE_FORMAT.to_string(), 0),
            None,
        );
    }

    let (base, path) = match (leaf(&node.base), leaf(&node.path)) {
        (Some(base), Some(path)) => (base, path),
        _ => {
            // Folhas não resolvidas não passam pela validação; chegar
            // aqui indica um chamador que pulou o pipeline.
            return (
                failed(node, "unresolved string value in node".to_string(), 0),
                None,
            );
        }
    };
    let url = format!("{}{}", base, path);

    let mut headers = HashMap::new();
    if let Some(node_headers) = &node.headers {
        for (name, value) in node_headers {
            if let Some(value) = leaf(value) {
                headers.insert(name.clone(), value.to_string());
            }
        }
    }

    emitter.emit(EventKind::HttpRequest {
        node_id: node.id.clone(),
        method: node.method.as_str().to_string(),
        url: url.clone(),
    });

    let request = HttpRequest {
        method: node.method,
        url: url.clone(),
        headers,
        body: node.body.clone(),
        timeout,
    };

    match client.request(request).await {
        Ok(response) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let body = normalize_body(response.data);

            emitter.emit(EventKind::HttpResponse {
                node_id: node.id.clone(),
                status: response.status,
                status_text: response.status_text.clone(),
                has_body: !body.is_null(),
                duration_ms,
            });

            info!(
                node_id = %node.id,
                method = node.method.as_str(),
                %url,
                status = response.status,
                duration_ms,
                "HTTP node finished"
            );

            let captured = CapturedResponse {
                body: body.clone(),
                headers: response.headers.clone(),
                status: response.status,
                duration_ms,
            };

            (
                NodeResult {
                    node_id: node.id.clone(),
                    success: true,
                    response: Some(body),
                    headers: Some(response.headers),
                    status: Some(response.status),
                    error: None,
                    duration_ms,
                },
                Some(captured),
            )
        }
        Err(e) => {
            let duration_ms = start.elapsed().as_millis() as u64;

            emitter.emit(EventKind::HttpResponse {
                node_id: node.id.clone(),
                status: 0,
                status_text: "Error".to_string(),
                has_body: false,
                duration_ms,
            });

            warn!(node_id = %node.id, %url, error = %e, "HTTP node transport failure");

            (failed(node, e.to_string(), duration_ms), None)
        }
    }
}

fn leaf(value: &StringValue) -> Option<&str> {
    value.as_literal()
}

fn failed(node: &HttpRequestNode, error: String, duration_ms: u64) -> NodeResult {
    NodeResult {
        node_id: node.id.clone(),
        success: false,
        response: None,
        headers: None,
        status: None,
        error: Some(error),
        duration_ms,
    }
}

/// Se o corpo chegou como string, tenta interpretá-lo como JSON;
/// qualquer outra coisa passa adiante sem mudança.
fn normalize_body(data: Value) -> Value {
    match data {
        Value::String(raw) => {
            serde_json::from_str(&raw).unwrap_or(Value::String(raw))
        }
        other => other,
    }
}
