//! # Módulo de Armazenamento
//!
//! Contratos de persistência de planos e runs. O hub (CRUD HTTP, ORM)
//! vive fora deste crate; o núcleo só precisa destes dois traits:
//!
//! - [`PlanStore`] - busca de planos e a consulta de vencidos que o
//!   scheduler roda a cada tick
//! - [`RunStore`] - criação e atualização dos registros de run
//!   (o worker os mantém via callbacks de status do motor)
//!
//! O [`MemoryStore`] implementa os dois sobre um único mutex, o que dá
//! à consulta de vencidos a atomicidade pedida (passada única; no
//! backend Postgres do hub isso é um único statement SQL).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::protocol::{JobRun, Plan, RunStatus};

// ============================================================================
// ERROS
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("store backend error: {0}")]
    Backend(String),
}

// ============================================================================
// CONTRATOS
// ============================================================================

/// Acesso a planos, incluindo a consulta de vencidos do scheduler.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Busca um plano pelo id.
    async fn get(&self, plan_id: &str) -> Result<Option<Plan>, StoreError>;

    /// Planos *vencidos* em `now`: têm `frequency` não nula E (nunca
    /// produziram uma run OU `now ≥ lastStartedAt + every·unit`).
    ///
    /// A consulta é atômica: uma única passada consistente sobre o
    /// estado (um único statement SQL no backend do hub).
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Plan>, StoreError>;

    /// Insere ou substitui um plano (carga de diretório na CLI, testes).
    async fn upsert(&self, plan: Plan) -> Result<(), StoreError>;
}

/// Campos do PATCH de uma run (espelha `PATCH /runs/:id` do hub).
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub success: Option<bool>,
    pub errors: Option<Vec<String>>,
}

/// Registro de runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create(&self, run: JobRun) -> Result<(), StoreError>;

    /// Aplica um patch. Transições de status regressivas (ex: RUNNING →
    /// PENDING) são ignoradas com log: o ciclo PENDING→RUNNING→terminal
    /// é monotônico.
    async fn update(&self, run_id: Uuid, patch: RunPatch) -> Result<(), StoreError>;

    async fn get(&self, run_id: Uuid) -> Result<Option<JobRun>, StoreError>;
}

// ============================================================================
// IMPLEMENTAÇÃO EM MEMÓRIA
// ============================================================================

#[derive(Default)]
struct Inner {
    plans: HashMap<String, Plan>,
    runs: HashMap<Uuid, JobRun>,
}

/// Store em memória para planos e runs, sob um único mutex.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Posição de um status no ciclo de vida, para impor monotonicidade.
fn status_rank(status: RunStatus) -> u8 {
    match status {
        RunStatus::Pending => 0,
        RunStatus::Running => 1,
        RunStatus::Completed | RunStatus::Failed | RunStatus::Timeout => 2,
    }
}

#[async_trait]
impl PlanStore for MemoryStore {
    async fn get(&self, plan_id: &str) -> Result<Option<Plan>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("memory store lock")
            .plans
            .get(plan_id)
            .cloned())
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Plan>, StoreError> {
        let inner = self.inner.lock().expect("memory store lock");

        let due = inner
            .plans
            .values()
            .filter(|plan| {
                let Some(frequency) = &plan.frequency else {
                    return false;
                };
                let last_started = inner
                    .runs
                    .values()
                    .filter(|run| run.plan_id == plan.id)
                    .map(|run| run.started_at)
                    .max();
                match last_started {
                    None => true,
                    Some(last) => now >= last + frequency.as_duration(),
                }
            })
            .cloned()
            .collect();

        Ok(due)
    }

    async fn upsert(&self, plan: Plan) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("memory store lock")
            .plans
            .insert(plan.id.clone(), plan);
        Ok(())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create(&self, run: JobRun) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("memory store lock")
            .runs
            .insert(run.id, run);
        Ok(())
    }

    async fn update(&self, run_id: Uuid, patch: RunPatch) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        let Some(run) = inner.runs.get_mut(&run_id) else {
            return Err(StoreError::RunNotFound(run_id));
        };

        if let Some(status) = patch.status {
            if status_rank(status) < status_rank(run.status) {
                warn!(
                    %run_id,
                    from = ?run.status,
                    to = ?status,
                    "ignoring backwards run status transition"
                );
            } else {
                run.status = status;
            }
        }
        if patch.completed_at.is_some() {
            run.completed_at = patch.completed_at;
        }
        if patch.duration_ms.is_some() {
            run.duration_ms = patch.duration_ms;
        }
        if patch.success.is_some() {
            run.success = patch.success;
        }
        if patch.errors.is_some() {
            run.errors = patch.errors;
        }
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<JobRun>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("memory store lock")
            .runs
            .get(&run_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Frequency, FrequencyUnit, TriggeredBy};
    use serde_json::json;

    fn plan_with_frequency(id: &str, every: u32) -> Plan {
        serde_json::from_value(json!({
            "id": id, "name": id, "project": "proj", "environment": "dev",
            "frequency": { "every": every, "unit": "MINUTE" },
            "nodes": [], "edges": []
        }))
        .unwrap()
    }

    fn run_for(plan_id: &str, started_at: DateTime<Utc>) -> JobRun {
        JobRun {
            id: Uuid::new_v4(),
            plan_id: plan_id.to_string(),
            execution_group_id: Uuid::new_v4(),
            location: "local".to_string(),
            environment: "dev".to_string(),
            status: RunStatus::Pending,
            triggered_by: TriggeredBy::Scheduled,
            started_at,
            completed_at: None,
            duration_ms: None,
            success: None,
            errors: None,
        }
    }

    #[tokio::test]
    async fn test_plan_without_runs_is_due() {
        let store = MemoryStore::new();
        store.upsert(plan_with_frequency("p1", 5)).await.unwrap();

        let due = store.find_due(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn test_due_detection_window() {
        let store = MemoryStore::new();
        store.upsert(plan_with_frequency("p1", 5)).await.unwrap();

        let t = Utc::now();
        store.create(run_for("p1", t)).await.unwrap();

        // Antes de T+5min: não vence.
        let before = t + chrono::Duration::minutes(4);
        assert!(store.find_due(before).await.unwrap().is_empty());

        // Em T+5min (e depois): vence.
        let at = t + chrono::Duration::minutes(5);
        assert_eq!(store.find_due(at).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_plan_without_frequency_is_never_due() {
        let store = MemoryStore::new();
        let plan: Plan = serde_json::from_value(json!({
            "id": "manual", "name": "manual", "project": "proj", "environment": "dev",
            "nodes": [], "edges": []
        }))
        .unwrap();
        store.upsert(plan).await.unwrap();

        assert!(store
            .find_due(Utc::now() + chrono::Duration::days(365))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_new_run_advances_last_started_at() {
        let store = MemoryStore::new();
        store.upsert(plan_with_frequency("p1", 5)).await.unwrap();

        let now = Utc::now();
        assert_eq!(store.find_due(now).await.unwrap().len(), 1);

        // Criar a run (startedAt = now) remove o plano do conjunto
        // vencido para o mesmo instante: sem enqueue duplo.
        store.create(run_for("p1", now)).await.unwrap();
        assert!(store.find_due(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_patch_applies_terminal_fields() {
        let store = MemoryStore::new();
        let run = run_for("p1", Utc::now());
        let run_id = run.id;
        store.create(run).await.unwrap();

        store
            .update(
                run_id,
                RunPatch {
                    status: Some(RunStatus::Running),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .update(
                run_id,
                RunPatch {
                    status: Some(RunStatus::Completed),
                    completed_at: Some(Utc::now()),
                    duration_ms: Some(1234),
                    success: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let stored = RunStore::get(&store, run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.duration_ms, Some(1234));
        assert_eq!(stored.success, Some(true));
    }

    #[tokio::test]
    async fn test_backwards_status_transition_is_ignored() {
        let store = MemoryStore::new();
        let run = run_for("p1", Utc::now());
        let run_id = run.id;
        store.create(run).await.unwrap();

        store
            .update(
                run_id,
                RunPatch {
                    status: Some(RunStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .update(
                run_id,
                RunPatch {
                    status: Some(RunStatus::Pending),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let stored = RunStore::get(&store, run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_update_unknown_run_errors() {
        let store = MemoryStore::new();
        let err = store
            .update(Uuid::new_v4(), RunPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RunNotFound(_)));
    }

    #[test]
    fn test_frequency_duration_units() {
        let frequency = Frequency {
            every: 2,
            unit: FrequencyUnit::Hour,
        };
        assert_eq!(frequency.as_duration(), chrono::Duration::hours(2));
    }
}
