//! # Módulo do Scheduler
//!
//! Loop de controle periódico: a cada `tick_interval` (padrão 10 s)
//! consulta o store por planos **vencidos** e enfileira atomicamente um
//! grupo de execução - uma run PENDING e um job `execute-plan` por
//! location do plano.
//!
//! ## Precisão
//!
//! A detecção por tick aceita até um tick de latência. Frequências
//! menores que `tick_interval` são arredondadas para cima
//! implicitamente: o plano roda no primeiro tick em que está vencido.
//!
//! ## Desvio e empates
//!
//! Se um tick demora mais que o intervalo, o tick seguinte ainda
//! processa o conjunto vencido completo. Um plano nunca é enfileirado
//! duas vezes para o mesmo instante vencido: o `startedAt` da run
//! criada avança o `lastStartedAt` que a consulta de vencidos usa.
//!
//! ## Parada
//!
//! `stop()` é cooperativo: liga a flag e o loop sai **depois** que o
//! tick corrente termina (o cancelamento nunca interrompe um tick no
//! meio).

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::protocol::{JobData, JobRun, Plan, RunStatus, TriggeredBy};
use crate::queue::{EnqueueOptions, JobQueue, QueueError};
use crate::store::{PlanStore, RunStore, StoreError};

/// Intervalo padrão entre ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Tentativas máximas de um job `execute-plan`.
const EXECUTE_PLAN_MAX_ATTEMPTS: u32 = 3;

// ============================================================================
// CONFIGURAÇÃO E ERROS
// ============================================================================

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

impl SchedulerConfig {
    /// `GRIFFIN_TICK_SECS` sobrescreve o intervalo padrão.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("GRIFFIN_TICK_SECS") {
            if let Ok(secs) = value.parse::<u64>() {
                config.tick_interval = Duration::from_secs(secs.max(1));
            }
        }
        config
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("job payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("plan '{0}' not found")]
    PlanNotFound(String),
}

// ============================================================================
// SCHEDULER
// ============================================================================

pub struct Scheduler {
    plans: Arc<dyn PlanStore>,
    runs: Arc<dyn RunStore>,
    queue: Arc<dyn JobQueue>,
    config: SchedulerConfig,
    stop: CancellationToken,
}

impl Scheduler {
    pub fn new(
        plans: Arc<dyn PlanStore>,
        runs: Arc<dyn RunStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            plans,
            runs,
            queue,
            config: SchedulerConfig::default(),
            stop: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Liga a flag de parada. O loop sai após o tick corrente.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Token observável por quem orquestra o processo.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Loop principal. Erros de tick (fila fora do ar, store) são
    /// logados e retentados no próximo tick.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(tick_interval = ?self.config.tick_interval, "scheduler started");

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = interval.tick() => {}
            }
            // O tick roda fora do select: a parada nunca o interrompe.
            match self.tick(Utc::now()).await {
                Ok(enqueued) if enqueued > 0 => {
                    info!(enqueued, "scheduler tick enqueued executions")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "scheduler tick failed; retrying next tick"),
            }
            if self.stop.is_cancelled() {
                break;
            }
        }
        info!("scheduler stopped");
    }

    /// Um tick: enfileira um grupo de execução para cada plano vencido.
    /// Devolve o número de jobs enfileirados.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let due = self.plans.find_due(now).await?;
        let mut enqueued = 0;

        for plan in due {
            enqueued += self
                .enqueue_group(&plan, &plan.environment, TriggeredBy::Scheduled, now)
                .await?
                .len();
        }

        Ok(enqueued)
    }

    /// Trigger manual (o hub expõe como `POST /runs/trigger/:planId`).
    /// Devolve as runs criadas, uma por location.
    pub async fn trigger_manual(
        &self,
        plan_id: &str,
        environment: &str,
    ) -> Result<Vec<JobRun>, SchedulerError> {
        let plan = self
            .plans
            .get(plan_id)
            .await?
            .ok_or_else(|| SchedulerError::PlanNotFound(plan_id.to_string()))?;
        self.enqueue_group(&plan, environment, TriggeredBy::Manual, Utc::now())
            .await
    }

    /// Cria o grupo de execução: uma run PENDING + um job por location.
    async fn enqueue_group(
        &self,
        plan: &Plan,
        environment: &str,
        triggered_by: TriggeredBy,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobRun>, SchedulerError> {
        let execution_group_id = Uuid::new_v4();
        let mut runs = Vec::new();

        for location in plan.effective_locations() {
            let run = JobRun {
                id: Uuid::new_v4(),
                plan_id: plan.id.clone(),
                execution_group_id,
                location: location.clone(),
                environment: environment.to_string(),
                status: RunStatus::Pending,
                triggered_by,
                started_at: now,
                completed_at: None,
                duration_ms: None,
                success: None,
                errors: None,
            };
            self.runs.create(run.clone()).await?;

            let data = serde_json::to_value(JobData::ExecutePlan {
                plan_id: plan.id.clone(),
                job_run_id: run.id,
                environment: environment.to_string(),
                scheduled_at: now,
            })?;
            self.queue
                .enqueue(
                    data,
                    EnqueueOptions::for_location(&location)
                        .with_max_attempts(EXECUTE_PLAN_MAX_ATTEMPTS),
                )
                .await?;

            runs.push(run);
        }

        info!(
            plan_id = %plan.id,
            execution_group_id = %execution_group_id,
            locations = runs.len(),
            triggered_by = ?triggered_by,
            "execution group enqueued"
        );
        Ok(runs)
    }
}
