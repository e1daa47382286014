//! # Módulo da Fila Durável de Jobs
//!
//! Fila agnóstica de backend com semântica de **no máximo um claim por
//! job**: o claim é atômico, dá ao worker um lease com prazo, e um
//! lease vencido devolve o job à fila (o ack/fail do claimer antigo é
//! ignorado para aquela tentativa).
//!
//! ## Operações
//!
//! - `enqueue(data, {location, maxAttempts, availableAt?})` → job PENDING
//! - `claim(location, lease)` → seleciona atomicamente um job
//!   *claimable*, marca RUNNING e devolve (ou `None`)
//! - `acknowledge(job)` → COMPLETED
//! - `fail(job, error, retry)` → re-enfileira com backoff exponencial
//!   enquanto `attempts < maxAttempts`; depois FAILED
//! - `extend_lease(job, lease)` → prorroga o lease de execuções longas
//!
//! Um job é *claimable* sse está PENDING, `availableAt ≤ now` e sem
//! lease vigente - ou RUNNING com lease vencido (o worker anterior
//! morreu no meio da execução).
//!
//! ## Backends
//!
//! O backend padrão é em memória ([`memory`]): um único mutex guardando
//! a fila ordenada por location. O backend Postgres ([`postgres`],
//! atrás da feature `postgres`) usa `SELECT … FOR UPDATE SKIP LOCKED`
//! ordenado por `(priority DESC, availableAt ASC)`. SQLite **não** é
//! suportado: o dequeue skip-locked exige lock por linha.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// TIPOS
// ============================================================================

/// Estados de um job. COMPLETED/FAILED são terminais: jobs nesses
/// estados nunca voltam a ser claimados.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

/// Um job persistido na fila.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,

    /// Payload opaco (o worker desserializa para `protocol::JobData`).
    pub data: Value,

    pub status: JobStatus,

    /// Tentativas já consumidas (incrementa no `fail`).
    pub attempts: u32,

    pub max_attempts: u32,

    /// Instante a partir do qual o job pode ser claimado.
    pub available_at: DateTime<Utc>,

    /// Location que roteia o job para o pool de workers certo.
    pub location: String,

    /// Prioridade de dequeue (maior vence).
    pub priority: i32,

    /// Token do claim corrente. Ack/fail carregando um token antigo
    /// são ignorados - o job já pertence a outro worker.
    pub locked_by: Option<Uuid>,

    pub locked_until: Option<DateTime<Utc>>,

    /// Último erro registrado por `fail`.
    pub last_error: Option<String>,
}

/// Opções do enqueue.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub location: String,
    pub max_attempts: u32,
    /// Agendamento futuro; `None` = disponível imediatamente.
    pub available_at: Option<DateTime<Utc>>,
    pub priority: i32,
}

impl EnqueueOptions {
    pub fn for_location(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            max_attempts: 3,
            available_at: None,
            priority: 0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Falhas do backend da fila. O scheduler tenta de novo no próximo
/// tick; os workers saem do loop de claim após uma sequência limitada
/// de falhas consecutivas.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend unavailable: {0}")]
    Backend(String),

    #[error("job {0} not found")]
    NotFound(Uuid),
}

// ============================================================================
// BACKOFF
// ============================================================================

/// Base do backoff exponencial.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Teto do backoff.
pub const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// `backoff(n) = min(base · 2^(n-1), cap)`, com `n` = tentativa (1-based).
pub fn backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let factor = 1u64 << exponent;
    let secs = BACKOFF_BASE.as_secs().saturating_mul(factor);
    Duration::from_secs(secs.min(BACKOFF_CAP.as_secs()))
}

// ============================================================================
// CONTRATO
// ============================================================================

/// A fila durável. Compartilhada entre scheduler e workers; toda
/// mutação passa pelo protocolo de claim.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Persiste um job PENDING e devolve seu id.
    async fn enqueue(&self, data: Value, options: EnqueueOptions) -> Result<Uuid, QueueError>;

    /// Seleciona atomicamente um job claimable da location, marca
    /// RUNNING com lease, e devolve. `None` quando não há job pronto.
    async fn claim(&self, location: &str, lease: Duration) -> Result<Option<Job>, QueueError>;

    /// Marca COMPLETED. Ignorado se o claim do chamador não é mais o
    /// corrente (lease vencido e job re-claimado).
    async fn acknowledge(&self, job: &Job) -> Result<(), QueueError>;

    /// Registra uma falha. Com `retry` e tentativas sobrando, volta a
    /// PENDING com `availableAt = now + backoff(attempts)`; senão FAILED.
    async fn fail(&self, job: &Job, error: &str, retry: bool) -> Result<(), QueueError>;

    /// Prorroga o lease de uma execução longa.
    async fn extend_lease(&self, job: &Job, lease: Duration) -> Result<(), QueueError>;

    /// Consulta um job pelo id (inspeção e testes).
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError>;
}
