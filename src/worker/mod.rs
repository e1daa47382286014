//! # Módulo do Worker
//!
//! Um worker por location: o loop claima jobs `execute-plan` da fila,
//! busca o plano no store, roda o motor e mantém o registro da run via
//! callbacks de status.
//!
//! ## Slots
//!
//! O número de execuções em voo é limitado por `slots` (padrão 1, via
//! `GRIFFIN_WORKER_SLOTS`): um semáforo dá a permissão **antes** do
//! claim, então o worker só tira um job da fila quando tem capacidade
//! para executá-lo. Cada execução claimada roda em uma task própria;
//! com um slot o comportamento degenera para o sequencial
//! claim → executa → claim.
//!
//! ## Lease e heartbeat
//!
//! O claim instala um lease; para execuções mais longas que ele, uma
//! task de heartbeat chama `extend_lease` a cada meia-vida do lease. Se
//! o worker morre no meio, o lease expira e o próximo claim recomeça a
//! tentativa do zero - o ack/fail do worker morto é ignorado.
//!
//! ## Falhas de fila
//!
//! Erros de claim são tolerados até `max_consecutive_failures` seguidos;
//! depois disso o worker sai do loop (o processo decide se o recria).

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use async_trait::async_trait;

use crate::engine::{PlanRunner, RunCompletion, StatusCallbacks, CANCELLED};
use crate::protocol::{JobData, RunStatus};
use crate::queue::{Job, JobQueue};
use crate::store::{PlanStore, RunPatch, RunStore};

// ============================================================================
// CONFIGURAÇÃO
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Duração do lease de cada claim.
    pub lease: Duration,

    /// Pausa entre claims vazios. Um jitter pequeno é somado para
    /// dessincronizar workers que acordam juntos.
    pub poll_interval: Duration,

    /// Falhas de claim consecutivas toleradas antes de sair do loop.
    pub max_consecutive_failures: u32,

    /// Execuções simultâneas em voo neste worker. Espelha
    /// `ExecutionLimits::worker_slots` (`GRIFFIN_WORKER_SLOTS`).
    pub slots: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            max_consecutive_failures: 5,
            slots: crate::limits::DEFAULT_WORKER_SLOTS,
        }
    }
}

impl WorkerConfig {
    /// Configuração com o teto de slots vindo dos limites do processo.
    pub fn from_limits(limits: &crate::limits::ExecutionLimits) -> Self {
        Self {
            slots: limits.worker_slots,
            ..Default::default()
        }
    }
}

// ============================================================================
// CALLBACKS DE RUN-RECORD
// ============================================================================

/// Mantém o registro da run no store conforme o motor progride:
/// RUNNING no `on_start`, terminal no `on_complete`.
struct RunRecordCallbacks {
    runs: Arc<dyn RunStore>,
    run_id: Uuid,
}

#[async_trait]
impl StatusCallbacks for RunRecordCallbacks {
    async fn on_start(&self) -> anyhow::Result<()> {
        self.runs
            .update(
                self.run_id,
                RunPatch {
                    status: Some(RunStatus::Running),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn on_complete(&self, completion: &RunCompletion) -> anyhow::Result<()> {
        self.runs
            .update(
                self.run_id,
                RunPatch {
                    status: Some(completion.status),
                    completed_at: Some(completion.completed_at),
                    duration_ms: Some(completion.duration_ms),
                    success: Some(completion.success),
                    errors: completion.errors.clone(),
                },
            )
            .await?;
        Ok(())
    }
}

// ============================================================================
// WORKER
// ============================================================================

pub struct Worker {
    location: String,
    queue: Arc<dyn JobQueue>,
    plans: Arc<dyn PlanStore>,
    runs: Arc<dyn RunStore>,
    runner: Arc<PlanRunner>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        location: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        plans: Arc<dyn PlanStore>,
        runs: Arc<dyn RunStore>,
        runner: Arc<PlanRunner>,
    ) -> Self {
        Self {
            location: location.into(),
            queue,
            plans,
            runs,
            runner,
            config: WorkerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Loop de claim. Sai no cancelamento cooperativo ou após uma
    /// sequência de falhas de fila.
    ///
    /// O semáforo de slots é adquirido antes de cada claim: sem
    /// capacidade livre, o worker espera em vez de tirar da fila um job
    /// que não pode executar. Cada job claimado roda em uma task do
    /// `JoinSet`, que é drenado antes do retorno.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            location = %self.location,
            slots = self.config.slots,
            "worker started"
        );
        let slots = Arc::new(Semaphore::new(self.config.slots.max(1)));
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut consecutive_failures = 0u32;

        loop {
            // Colhe execuções já terminadas sem bloquear.
            while in_flight.try_join_next().is_some() {}

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.queue.claim(&self.location, self.config.lease).await {
                Err(e) => {
                    drop(permit);
                    consecutive_failures += 1;
                    warn!(
                        location = %self.location,
                        error = %e,
                        consecutive_failures,
                        "claim failed"
                    );
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        error!(
                            location = %self.location,
                            "too many consecutive queue failures; worker exiting claim loop"
                        );
                        break;
                    }
                    self.idle(&cancel).await;
                }
                Ok(None) => {
                    drop(permit);
                    consecutive_failures = 0;
                    self.idle(&cancel).await;
                }
                Ok(Some(job)) => {
                    consecutive_failures = 0;
                    let worker = self.clone();
                    let token = cancel.clone();
                    in_flight.spawn(async move {
                        worker.process(job, &token).await;
                        drop(permit);
                    });
                }
            }
        }

        // Parada cooperativa: espera as execuções em voo terminarem
        // (canceladas, elas devolvem o job à fila via fail+retry).
        while in_flight.join_next().await.is_some() {}
        info!(location = %self.location, "worker stopped");
    }

    /// Pausa entre claims vazios, com jitter, abortável pela parada.
    async fn idle(&self, cancel: &CancellationToken) {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100));
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval + jitter) => {}
        }
    }

    async fn process(&self, job: Job, cancel: &CancellationToken) {
        let data: JobData = match serde_json::from_value(job.data.clone()) {
            Ok(data) => data,
            Err(e) => {
                // Payload podre não melhora com retry.
                error!(job_id = %job.id, error = %e, "invalid job payload");
                if let Err(e) = self
                    .queue
                    .fail(&job, &format!("invalid job payload: {e}"), false)
                    .await
                {
                    warn!(job_id = %job.id, error = %e, "failed to mark job as failed");
                }
                return;
            }
        };

        let JobData::ExecutePlan {
            plan_id,
            job_run_id,
            ..
        } = data;

        let plan = match self.plans.get(&plan_id).await {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                error!(job_id = %job.id, %plan_id, "plan not found for job");
                let _ = self
                    .runs
                    .update(
                        job_run_id,
                        RunPatch {
                            status: Some(RunStatus::Failed),
                            completed_at: Some(chrono::Utc::now()),
                            success: Some(false),
                            errors: Some(vec![format!("plan '{plan_id}' not found")]),
                            ..Default::default()
                        },
                    )
                    .await;
                let _ = self
                    .queue
                    .fail(&job, &format!("plan '{plan_id}' not found"), false)
                    .await;
                return;
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "plan store unavailable; retrying job");
                let _ = self.queue.fail(&job, &e.to_string(), true).await;
                return;
            }
        };

        // Heartbeat: prorroga o lease enquanto a execução estiver viva.
        let heartbeat_stop = CancellationToken::new();
        let heartbeat = {
            let queue = self.queue.clone();
            let job = job.clone();
            let lease = self.config.lease;
            let stop = heartbeat_stop.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(lease / 2);
                interval.tick().await; // o primeiro tick é imediato
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = interval.tick() => {
                            if queue.extend_lease(&job, lease).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        let callbacks = Arc::new(RunRecordCallbacks {
            runs: self.runs.clone(),
            run_id: job_run_id,
        });

        let outcome = self
            .runner
            .execute(
                &plan,
                &job_run_id.to_string(),
                &self.location,
                Some(callbacks),
                cancel.child_token(),
            )
            .await;

        heartbeat_stop.cancel();
        let _ = heartbeat.await;

        // A execução que percorreu o grafo "completou" o job, mesmo com
        // nós falhando (o veredito vive na run). Cancelamento devolve o
        // job para a próxima tentativa.
        let was_cancelled =
            !outcome.success && outcome.errors.iter().any(|e| e == CANCELLED);
        if was_cancelled {
            if let Err(e) = self.queue.fail(&job, CANCELLED, true).await {
                warn!(job_id = %job.id, error = %e, "failed to requeue cancelled job");
            }
        } else if let Err(e) = self.queue.acknowledge(&job).await {
            warn!(job_id = %job.id, error = %e, "failed to acknowledge job");
        }
    }
}
