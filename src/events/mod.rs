//! # Módulo de Eventos de Execução
//!
//! Cada execução de plano emite um fluxo **totalmente ordenado** de
//! eventos: `PLAN_START`, depois para cada nó `NODE_START` → (eventos
//! específicos do nó) → `NODE_END`, e por fim `PLAN_END`. Os números de
//! sequência começam em 0 e crescem de um em um, sem buracos.
//!
//! ## Formato no fio
//!
//! Cada evento é um objeto JSON **plano**: o envelope base (`eventId`,
//! `seq`, `timestamp`, `planId`, `executionId`, `organizationId`)
//! achatado junto com os campos específicos do tipo:
//!
//! ```json
//! { "eventId": "…", "seq": 2, "timestamp": 1718000000123,
//!   "planId": "p1", "executionId": "e1", "organizationId": "org",
//!   "type": "HTTP_REQUEST", "nodeId": "get-users",
//!   "method": "GET", "url": "https://api.example.com/users" }
//! ```
//!
//! ## Sinks
//!
//! O motor só conhece `emit(event)` + `flush()`. O [`LocalSink`] faz
//! fan-out em processo (testes, runs de CLI); o sink durável em
//! [`durable`] acumula lotes e publica via adapter. `emit` é síncrono e
//! não bloqueante: um sink com problema gera uma linha de log, nunca
//! uma falha da run.
//!
//! Entre execuções diferentes nenhuma ordem é prometida; consumidores
//! desambiguam pelo `executionId`.

pub mod durable;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use async_trait::async_trait;

// ============================================================================
// ENVELOPE E TIPOS DE EVENTO
// ============================================================================

/// Campos comuns a todo evento.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Identificador único do evento.
    #[serde(rename = "eventId")]
    pub event_id: Uuid,

    /// Número de sequência, monotônico por execução, começando em 0.
    pub seq: u64,

    /// Epoch Unix em milissegundos.
    pub timestamp: i64,

    #[serde(rename = "planId")]
    pub plan_id: String,

    #[serde(rename = "executionId")]
    pub execution_id: String,

    #[serde(rename = "organizationId")]
    pub organization_id: String,
}

/// Campos específicos de cada tipo de evento.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    #[serde(rename = "PLAN_START")]
    PlanStart {
        #[serde(rename = "planName")]
        plan_name: String,
        location: String,
    },

    #[serde(rename = "NODE_START")]
    NodeStart {
        #[serde(rename = "nodeId")]
        node_id: String,
        #[serde(rename = "nodeType")]
        node_type: String,
    },

    #[serde(rename = "HTTP_REQUEST")]
    HttpRequest {
        #[serde(rename = "nodeId")]
        node_id: String,
        method: String,
        url: String,
    },

    /// Emitido também em falha de transporte, com `status = 0`,
    /// `statusText = "Error"` e `hasBody = false`.
    #[serde(rename = "HTTP_RESPONSE")]
    HttpResponse {
        #[serde(rename = "nodeId")]
        node_id: String,
        status: u16,
        #[serde(rename = "statusText")]
        status_text: String,
        #[serde(rename = "hasBody")]
        has_body: bool,
        duration_ms: u64,
    },

    #[serde(rename = "WAIT_START")]
    WaitStart {
        #[serde(rename = "nodeId")]
        node_id: String,
        duration_ms: u64,
    },

    #[serde(rename = "ASSERTION_RESULT")]
    AssertionResult {
        #[serde(rename = "nodeId")]
        node_id: String,
        subject: String,
        passed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(rename = "NODE_END")]
    NodeEnd {
        #[serde(rename = "nodeId")]
        node_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
    },

    #[serde(rename = "PLAN_END")]
    PlanEnd {
        success: bool,
        errors: Vec<String>,
        #[serde(rename = "totalDuration_ms")]
        total_duration_ms: u64,
    },

    /// Falha interna do motor (não uma falha de nó).
    #[serde(rename = "ERROR")]
    Error {
        #[serde(rename = "errorName")]
        error_name: String,
        message: String,
        context: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
}

impl EventKind {
    /// Nome da tag, para logs.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::PlanStart { .. } => "PLAN_START",
            EventKind::NodeStart { .. } => "NODE_START",
            EventKind::HttpRequest { .. } => "HTTP_REQUEST",
            EventKind::HttpResponse { .. } => "HTTP_RESPONSE",
            EventKind::WaitStart { .. } => "WAIT_START",
            EventKind::AssertionResult { .. } => "ASSERTION_RESULT",
            EventKind::NodeEnd { .. } => "NODE_END",
            EventKind::PlanEnd { .. } => "PLAN_END",
            EventKind::Error { .. } => "ERROR",
        }
    }
}

/// Um evento completo: envelope achatado + campos do tipo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    #[serde(flatten)]
    pub kind: EventKind,
}

// ============================================================================
// SINK
// ============================================================================

/// Consumidor downstream dos eventos de execução.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Entrega um evento. Síncrono e não bloqueante: erros internos do
    /// sink são engolidos com uma linha de log.
    fn emit(&self, event: ExecutionEvent);

    /// Aguarda o dreno dos eventos em voo. O motor chama antes de
    /// devolver o resultado da run, limitando eventos pendentes por
    /// execução.
    async fn flush(&self) {}
}

// ============================================================================
// EMISSOR
// ============================================================================

/// Emissor sequenciado de uma execução.
///
/// Carrega o envelope fixo (plano, execução, organização) e numera os
/// eventos com um contador atômico. Sem sink configurado, os eventos
/// são descartados mas a sequência continua avançando - o `seq` é uma
/// propriedade da execução, não do sink.
pub struct EventEmitter {
    plan_id: String,
    execution_id: String,
    organization_id: String,
    seq: AtomicU64,
    sink: Option<Arc<dyn EventSink>>,
}

impl EventEmitter {
    pub fn new(
        plan_id: impl Into<String>,
        execution_id: impl Into<String>,
        organization_id: impl Into<String>,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Self {
        Self {
            plan_id: plan_id.into(),
            execution_id: execution_id.into(),
            organization_id: organization_id.into(),
            seq: AtomicU64::new(0),
            sink,
        }
    }

    /// Emite um evento e devolve o `seq` atribuído.
    pub fn emit(&self, kind: EventKind) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let event = ExecutionEvent {
            envelope: EventEnvelope {
                event_id: Uuid::new_v4(),
                seq,
                timestamp: chrono::Utc::now().timestamp_millis(),
                plan_id: self.plan_id.clone(),
                execution_id: self.execution_id.clone(),
                organization_id: self.organization_id.clone(),
            },
            kind,
        };

        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
        seq
    }

    pub async fn flush(&self) {
        if let Some(sink) = &self.sink {
            sink.flush().await;
        }
    }
}

// ============================================================================
// SINK LOCAL
// ============================================================================

type Subscriber = Box<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Fan-out em processo: guarda os eventos e repassa a subscribers.
///
/// Usado em testes e em runs locais de CLI (onde o subscriber imprime
/// o fluxo no terminal).
#[derive(Default)]
pub struct LocalSink {
    events: Mutex<Vec<ExecutionEvent>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl LocalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.subscribers
            .lock()
            .expect("local sink subscribers lock")
            .push(Box::new(subscriber));
    }

    /// Snapshot dos eventos recebidos até aqui.
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().expect("local sink events lock").clone()
    }
}

#[async_trait]
impl EventSink for LocalSink {
    fn emit(&self, event: ExecutionEvent) {
        for subscriber in self
            .subscribers
            .lock()
            .expect("local sink subscribers lock")
            .iter()
        {
            subscriber(&event);
        }
        self.events
            .lock()
            .expect("local sink events lock")
            .push(event);
    }
}
