//! # Módulo do Motor de Execução
//!
//! O coração do runner: recebe um plano **resolvido** (sem variáveis),
//! atravessa o grafo sequencialmente a partir de `__START__`, executa
//! cada nó e devolve `{success, results, errors, totalDuration_ms}`.
//!
//! ## Travessia
//!
//! A travessia é sequencial (uma thread lógica por execução): a cada
//! passo executa-se o sucessor único do último nó completado. Se
//! `__START__` declara vários sucessores, vale a primeira aresta
//! declarada (determinístico pela ordem das arestas). Nós não
//! alcançáveis a partir de `__START__` são pulados em silêncio. A
//! execução termina ao alcançar `__END__`; um plano vazio
//! (`__START__ → __END__` apenas) é um no-op bem-sucedido.
//!
//! ## Semântica de falha
//!
//! Falha de nó **não** interrompe a travessia: todo nó alcançável é
//! visitado, e assertions sobre um nó falho leem sujeito indefinido. A
//! run tem `success = false` sse algum nó registrou falha. Erros fatais
//! (grafo inválido, provider de segredo desconhecido) derrubam a run
//! antes de qualquer nó, com uma única mensagem descritiva em `errors`.
//!
//! ## Pontos de suspensão
//!
//! Dentro de uma execução, os awaits acontecem: na requisição HTTP
//! (limitada pelo timeout), no sleep do Wait, na resolução de segredos
//! (I/O para aws/vault) e no flush do sink de eventos. Nenhum nó
//! paraleliza internamente - a tabela de respostas é exclusiva da
//! execução e a ordem dos eventos é parte do contrato.
//!
//! ## Cancelamento
//!
//! Cada execução recebe um `CancellationToken`. Cancelar aborta o I/O
//! ou sleep corrente, marca a run como FAILED com erro `"cancelled"`,
//! emite o `NODE_END` pendente e o `PLAN_END`, faz flush e retorna. O
//! timeout de plano (opcional) se comporta de forma idêntica.

pub mod assertions;
pub mod http;
pub mod wait;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use crate::client::HttpClient;
use crate::engine::assertions::CapturedResponse;
use crate::errors::ErrorCode;
use crate::events::{EventEmitter, EventKind, EventSink};
use crate::protocol::{
    Edge, Node, NodeResult, Plan, RunOutcome, RunStatus, END_NODE, SECRETS_NODE, START_NODE,
};
use crate::secrets::{self, SecretRegistry};
use crate::telemetry;
use crate::validation;

/// Erro registrado quando uma execução é cancelada (ou estoura o
/// timeout de plano).
pub const CANCELLED: &str = "cancelled";

/// Timeout HTTP padrão por requisição.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// CALLBACKS DE STATUS
// ============================================================================

/// Resumo entregue ao `on_complete`.
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub errors: Option<Vec<String>>,
}

/// Callbacks de ciclo de vida (o worker os usa para manter o registro
/// da run no store).
///
/// `on_start` roda antes do `PLAN_START` ser emitido; `on_complete`
/// depois do `PLAN_END`. Erros de callback são logados e **nunca**
/// afetam o resultado da run.
#[async_trait]
pub trait StatusCallbacks: Send + Sync {
    async fn on_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_complete(&self, completion: &RunCompletion) -> anyhow::Result<()> {
        let _ = completion;
        Ok(())
    }
}

// ============================================================================
// OPÇÕES
// ============================================================================

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Timeout por requisição HTTP.
    pub http_timeout: Duration,

    /// Timeout da execução inteira. `None` = sem limite. Ao expirar, o
    /// comportamento é idêntico ao cancelamento.
    pub plan_timeout: Option<Duration>,

    /// Organização carregada no envelope de todos os eventos.
    pub organization_id: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            plan_timeout: None,
            organization_id: "local".to_string(),
        }
    }
}

// ============================================================================
// RUNNER
// ============================================================================

/// O executor de planos. Barato de clonar via `Arc`s internos; um por
/// processo basta, compartilhado entre workers.
pub struct PlanRunner {
    client: Arc<dyn HttpClient>,
    secrets: Arc<SecretRegistry>,
    sink: Option<Arc<dyn EventSink>>,
    options: EngineOptions,
}

impl PlanRunner {
    pub fn new(client: Arc<dyn HttpClient>, secrets: Arc<SecretRegistry>) -> Self {
        Self {
            client,
            secrets,
            sink: None,
            options: EngineOptions::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Executa um plano de ponta a ponta.
    ///
    /// A execução inteira vive dentro de um span `plan_execution`; o
    /// veredito é gravado nos campos `griffin.*` ao final, então um
    /// trace exportado carrega plano, location e resultado.
    pub async fn execute(
        &self,
        plan: &Plan,
        execution_id: &str,
        location: &str,
        callbacks: Option<Arc<dyn StatusCallbacks>>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let span = telemetry::execution_span(&plan.id, execution_id, location);
        let outcome = self
            .execute_inner(plan, execution_id, location, callbacks, cancel)
            .instrument(span.clone())
            .await;
        span.record("griffin.success", outcome.success);
        span.record("griffin.nodes", outcome.results.len() as u64);
        outcome
    }

    async fn execute_inner(
        &self,
        plan: &Plan,
        execution_id: &str,
        location: &str,
        callbacks: Option<Arc<dyn StatusCallbacks>>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let start = Instant::now();
        let emitter = EventEmitter::new(
            plan.id.clone(),
            execution_id,
            self.options.organization_id.clone(),
            self.sink.clone(),
        );

        if let Some(cb) = &callbacks {
            if let Err(e) = cb.on_start().await {
                warn!(error = %e, "on_start callback failed");
            }
        }

        emitter.emit(EventKind::PlanStart {
            plan_name: plan.name.clone(),
            location: location.to_string(),
        });
        info!(fingerprint = %plan.fingerprint(), "plan execution started");

        // Boa-formação do grafo: fatal antes de qualquer nó.
        if let Err(validation_errors) = validation::validate_plan(plan) {
            let message = validation_errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            emitter.emit(EventKind::Error {
                error_name: ErrorCode::GRAPH_MALFORMED.category().event_name().to_string(),
                message: message.clone(),
                context: "plan validation".to_string(),
                stack: None,
            });
            return self.finish_fatal(message, &emitter, &callbacks, start).await;
        }

        // Prelúdio de segredos: substitui toda folha {$secret} antes de
        // qualquer nó rodar. A falha aparece no nó sintético __SECRETS__.
        let resolved_plan;
        let plan = if secrets::has_secret_leaves(plan) {
            match secrets::resolve_plan(plan, &self.secrets).await {
                Ok(resolved) => {
                    resolved_plan = resolved;
                    &resolved_plan
                }
                Err(e) => {
                    let message = e.to_string();
                    emitter.emit(EventKind::NodeStart {
                        node_id: SECRETS_NODE.to_string(),
                        node_type: "Secrets".to_string(),
                    });
                    emitter.emit(EventKind::NodeEnd {
                        node_id: SECRETS_NODE.to_string(),
                        success: false,
                        error: Some(message.clone()),
                        duration_ms: 0,
                    });
                    return self.finish_fatal(message, &emitter, &callbacks, start).await;
                }
            }
        } else {
            plan
        };

        // Timeout de plano = cancelamento disparado por um watchdog.
        let cancel = match self.options.plan_timeout {
            Some(timeout) => {
                let child = cancel.child_token();
                let watchdog = child.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    watchdog.cancel();
                });
                child
            }
            None => cancel,
        };

        let adjacency = build_adjacency(&plan.edges);
        let mut responses: HashMap<String, CapturedResponse> = HashMap::new();
        let mut results: Vec<NodeResult> = Vec::new();
        let mut last_http: Option<String> = None;
        let mut cancelled = false;

        let mut current = first_successor(&adjacency, START_NODE);

        while let Some(node_id) = current.take() {
            if node_id == END_NODE {
                break;
            }
            let Some(node) = plan.node(&node_id) else {
                // A validação garante endpoints conhecidos; um id
                // ausente aqui seria aresta órfã já rejeitada.
                break;
            };

            emitter.emit(EventKind::NodeStart {
                node_id: node_id.clone(),
                node_type: node.kind().to_string(),
            });
            let node_start = Instant::now();
            let node_span = telemetry::node_span(&node_id, node.kind());

            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                outcome = self
                    .execute_node(node, &responses, last_http.as_deref(), &emitter)
                    .instrument(node_span.clone()) => {
                    Some(outcome)
                }
            };

            match outcome {
                None => {
                    let duration_ms = node_start.elapsed().as_millis() as u64;
                    node_span.record("griffin.node_success", false);
                    emitter.emit(EventKind::NodeEnd {
                        node_id: node_id.clone(),
                        success: false,
                        error: Some(CANCELLED.to_string()),
                        duration_ms,
                    });
                    results.push(NodeResult {
                        node_id: node_id.clone(),
                        success: false,
                        response: None,
                        headers: None,
                        status: None,
                        error: Some(CANCELLED.to_string()),
                        duration_ms,
                    });
                    cancelled = true;
                    break;
                }
                Some((result, captured)) => {
                    // Só nós bem-sucedidos escrevem na tabela de
                    // respostas; os falhos deixam o sujeito indefinido.
                    if let Some(captured) = captured {
                        responses.insert(node_id.clone(), captured);
                    }
                    if matches!(node, Node::HttpRequest(_)) {
                        last_http = Some(node_id.clone());
                    }
                    node_span.record("griffin.node_success", result.success);
                    emitter.emit(EventKind::NodeEnd {
                        node_id: node_id.clone(),
                        success: result.success,
                        error: result.error.clone(),
                        duration_ms: result.duration_ms,
                    });
                    results.push(result);
                }
            }

            current = first_successor(&adjacency, &node_id);
        }

        let total_duration_ms = start.elapsed().as_millis() as u64;
        let (success, errors) = if cancelled {
            (false, vec![CANCELLED.to_string()])
        } else {
            let errors: Vec<String> = results
                .iter()
                .filter(|r| !r.success)
                .map(|r| {
                    format!(
                        "{}: {}",
                        r.node_id,
                        r.error.as_deref().unwrap_or("unknown error")
                    )
                })
                .collect();
            (errors.is_empty(), errors)
        };

        emitter.emit(EventKind::PlanEnd {
            success,
            errors: errors.clone(),
            total_duration_ms,
        });
        emitter.flush().await;

        let status = if cancelled {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        notify_complete(
            &callbacks,
            RunCompletion {
                status,
                completed_at: Utc::now(),
                duration_ms: total_duration_ms,
                success,
                errors: if errors.is_empty() {
                    None
                } else {
                    Some(errors.clone())
                },
            },
        )
        .await;

        info!(success, total_duration_ms, nodes = results.len(), "plan execution finished");

        RunOutcome {
            success,
            results,
            errors,
            total_duration_ms,
        }
    }

    async fn execute_node(
        &self,
        node: &Node,
        responses: &HashMap<String, CapturedResponse>,
        last_http: Option<&str>,
        emitter: &EventEmitter,
    ) -> (NodeResult, Option<CapturedResponse>) {
        match node {
            Node::HttpRequest(http_node) => {
                http::execute(
                    http_node,
                    self.client.as_ref(),
                    emitter,
                    self.options.http_timeout,
                )
                .await
            }
            Node::Wait(wait_node) => (wait::execute(wait_node, emitter).await, None),
            Node::Assertions(assertions_node) => {
                let start = Instant::now();
                let response = last_http.and_then(|id| responses.get(id));

                let mut failures = Vec::new();
                for assertion in &assertions_node.assertions {
                    let outcome = assertions::evaluate(assertion, response);
                    emitter.emit(EventKind::AssertionResult {
                        node_id: assertions_node.id.clone(),
                        subject: outcome.subject.clone(),
                        passed: outcome.passed,
                        message: outcome.message.clone(),
                    });
                    if let Some(message) = outcome.message {
                        failures.push(message);
                    }
                }

                let success = failures.is_empty();
                (
                    NodeResult {
                        node_id: assertions_node.id.clone(),
                        success,
                        response: None,
                        headers: None,
                        status: None,
                        error: if success {
                            None
                        } else {
                            Some(failures.join("; "))
                        },
                        duration_ms: start.elapsed().as_millis() as u64,
                    },
                    None,
                )
            }
        }
    }

    /// Encerramento de falha fatal: nenhum nó executou (ou executará).
    async fn finish_fatal(
        &self,
        message: String,
        emitter: &EventEmitter,
        callbacks: &Option<Arc<dyn StatusCallbacks>>,
        start: Instant,
    ) -> RunOutcome {
        let total_duration_ms = start.elapsed().as_millis() as u64;
        emitter.emit(EventKind::PlanEnd {
            success: false,
            errors: vec![message.clone()],
            total_duration_ms,
        });
        emitter.flush().await;

        notify_complete(
            callbacks,
            RunCompletion {
                status: RunStatus::Failed,
                completed_at: Utc::now(),
                duration_ms: total_duration_ms,
                success: false,
                errors: Some(vec![message.clone()]),
            },
        )
        .await;

        RunOutcome {
            success: false,
            results: Vec::new(),
            errors: vec![message],
            total_duration_ms,
        }
    }
}

async fn notify_complete(
    callbacks: &Option<Arc<dyn StatusCallbacks>>,
    completion: RunCompletion,
) {
    if let Some(cb) = callbacks {
        if let Err(e) = cb.on_complete(&completion).await {
            warn!(error = %e, "on_complete callback failed");
        }
    }
}

// ============================================================================
// ADJACÊNCIA
// ============================================================================

/// Adjacência na ordem de declaração das arestas.
fn build_adjacency(edges: &[Edge]) -> HashMap<&str, Vec<&str>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }
    adjacency
}

/// Primeiro sucessor declarado de um nó, se houver.
fn first_successor(adjacency: &HashMap<&str, Vec<&str>>, node_id: &str) -> Option<String> {
    adjacency
        .get(node_id)
        .and_then(|successors| successors.first())
        .map(|s| s.to_string())
}
