//! Backend em memória: um único mutex guardando os jobs.
//!
//! É o backend padrão do processo. O claim inteiro acontece dentro de
//! uma seção crítica, o que dá a atomicidade exigida pelo invariante de
//! "no máximo um claim por job" - duas chamadas concorrentes de
//! `claim` sobre um único job claimable devolvem o job para exatamente
//! uma delas.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{backoff, EnqueueOptions, Job, JobQueue, JobStatus, QueueError};

#[derive(Default)]
pub struct MemoryQueue {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.lock().expect("memory queue lock")
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, data: Value, options: EnqueueOptions) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        let job = Job {
            id,
            data,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: options.max_attempts,
            available_at: options.available_at.unwrap_or_else(Utc::now),
            location: options.location,
            priority: options.priority,
            locked_by: None,
            locked_until: None,
            last_error: None,
        };
        debug!(job_id = %id, location = %job.location, "job enqueued");
        self.lock().insert(id, job);
        Ok(id)
    }

    async fn claim(&self, location: &str, lease: Duration) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        let mut jobs = self.lock();

        // Claimable: PENDING disponível e sem lease vigente, ou RUNNING
        // com lease vencido (worker anterior morreu no meio).
        let mut candidates: Vec<&Job> = jobs
            .values()
            .filter(|job| job.location == location)
            .filter(|job| match job.status {
                JobStatus::Pending => {
                    job.available_at <= now
                        && job.locked_until.map_or(true, |until| until < now)
                }
                JobStatus::Running => job.locked_until.is_some_and(|until| until < now),
                JobStatus::Completed | JobStatus::Failed => false,
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.available_at.cmp(&b.available_at))
        });

        let Some(id) = candidates.first().map(|job| job.id) else {
            return Ok(None);
        };

        let job = jobs.get_mut(&id).expect("candidate came from the map");
        job.status = JobStatus::Running;
        job.locked_by = Some(Uuid::new_v4());
        job.locked_until = Some(now + chrono::Duration::from_std(lease).unwrap_or_default());

        debug!(job_id = %id, %location, "job claimed");
        Ok(Some(job.clone()))
    }

    async fn acknowledge(&self, claimed: &Job) -> Result<(), QueueError> {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(&claimed.id) else {
            return Err(QueueError::NotFound(claimed.id));
        };

        // Claim antigo: o lease venceu e o job mudou de dono (ou já
        // terminou). O ack desta tentativa é ignorado.
        if job.locked_by != claimed.locked_by || job.status != JobStatus::Running {
            debug!(job_id = %claimed.id, "stale acknowledge ignored");
            return Ok(());
        }

        job.status = JobStatus::Completed;
        job.locked_by = None;
        job.locked_until = None;
        Ok(())
    }

    async fn fail(&self, claimed: &Job, error: &str, retry: bool) -> Result<(), QueueError> {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(&claimed.id) else {
            return Err(QueueError::NotFound(claimed.id));
        };

        if job.locked_by != claimed.locked_by || job.status != JobStatus::Running {
            debug!(job_id = %claimed.id, "stale fail ignored");
            return Ok(());
        }

        job.attempts += 1;
        job.last_error = Some(error.to_string());
        job.locked_by = None;
        job.locked_until = None;

        if retry && job.attempts < job.max_attempts {
            job.status = JobStatus::Pending;
            job.available_at = Utc::now()
                + chrono::Duration::from_std(backoff(job.attempts)).unwrap_or_default();
            debug!(
                job_id = %claimed.id,
                attempts = job.attempts,
                available_at = %job.available_at,
                "job requeued with backoff"
            );
        } else {
            job.status = JobStatus::Failed;
            debug!(job_id = %claimed.id, attempts = job.attempts, "job failed terminally");
        }
        Ok(())
    }

    async fn extend_lease(&self, claimed: &Job, lease: Duration) -> Result<(), QueueError> {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(&claimed.id) else {
            return Err(QueueError::NotFound(claimed.id));
        };

        if job.locked_by != claimed.locked_by || job.status != JobStatus::Running {
            return Ok(());
        }

        job.locked_until =
            Some(Utc::now() + chrono::Duration::from_std(lease).unwrap_or_default());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.lock().get(&job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    const LEASE: Duration = Duration::from_secs(30);

    async fn enqueue_one(queue: &MemoryQueue, location: &str) -> Uuid {
        queue
            .enqueue(
                json!({ "type": "execute-plan", "planId": "p1" }),
                EnqueueOptions::for_location(location),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_then_claim_roundtrip() {
        let queue = MemoryQueue::new();
        let id = enqueue_one(&queue, "local").await;

        let job = queue.claim("local", LEASE).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.locked_by.is_some());
        assert!(job.locked_until.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_claim_respects_location_routing() {
        let queue = MemoryQueue::new();
        enqueue_one(&queue, "us-east-1").await;

        assert!(queue.claim("eu-west-1", LEASE).await.unwrap().is_none());
        assert!(queue.claim("us-east-1", LEASE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_claim_ignores_future_available_at() {
        let queue = MemoryQueue::new();
        queue
            .enqueue(
                json!({}),
                EnqueueOptions {
                    available_at: Some(Utc::now() + chrono::Duration::seconds(60)),
                    ..EnqueueOptions::for_location("local")
                },
            )
            .await
            .unwrap();

        assert!(queue.claim("local", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_at_most_one_claim_under_concurrency() {
        let queue = Arc::new(MemoryQueue::new());
        enqueue_one(&queue, "local").await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.claim("local", LEASE).await.unwrap()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1, "exactly one concurrent claim wins");
    }

    #[tokio::test]
    async fn test_retry_bound_and_backoff_schedule() {
        let queue = MemoryQueue::new();
        let id = enqueue_one(&queue, "local").await;
        let enqueued_at = Utc::now();

        for attempt in 1..=3u32 {
            let job = queue.claim("local", LEASE).await.unwrap();
            let job = match job {
                Some(job) => job,
                None => {
                    // Backoff deixou o job no futuro: antecipa para o teste.
                    let mut jobs = queue.lock();
                    let stored = jobs.values_mut().find(|j| j.id == id).unwrap();
                    stored.available_at = Utc::now();
                    drop(jobs);
                    queue.claim("local", LEASE).await.unwrap().unwrap()
                }
            };
            queue.fail(&job, "boom", true).await.unwrap();

            let stored = queue.get(id).await.unwrap().unwrap();
            assert_eq!(stored.attempts, attempt);

            if attempt < 3 {
                assert_eq!(stored.status, JobStatus::Pending);
                // availableAt avança pelo backoff 2^(n-1): 1s, 2s.
                let expected = Duration::from_secs(1 << (attempt - 1));
                let delta = (stored.available_at - enqueued_at)
                    .to_std()
                    .unwrap_or_default();
                assert!(
                    delta >= expected && delta < expected + Duration::from_secs(2),
                    "attempt {attempt}: backoff delta was {delta:?}"
                );
            }
        }

        // Após maxAttempts falhas, FAILED e fim.
        let stored = queue.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 3);
        assert_eq!(stored.last_error.as_deref(), Some("boom"));
        assert!(queue.claim("local", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_without_retry_is_terminal() {
        let queue = MemoryQueue::new();
        enqueue_one(&queue, "local").await;

        let job = queue.claim("local", LEASE).await.unwrap().unwrap();
        queue.fail(&job, "fatal", false).await.unwrap();

        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_expired_lease_makes_job_claimable_again() {
        let queue = MemoryQueue::new();
        enqueue_one(&queue, "local").await;

        let first = queue
            .claim("local", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = queue.claim("local", LEASE).await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_ne!(first.locked_by, second.locked_by);

        // O ack do claimer antigo é ignorado para esta tentativa.
        queue.acknowledge(&first).await.unwrap();
        let stored = queue.get(first.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);

        // O dono corrente ainda consegue concluir.
        queue.acknowledge(&second).await.unwrap();
        let stored = queue.get(first.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_completed_job_is_never_reclaimed() {
        let queue = MemoryQueue::new();
        enqueue_one(&queue, "local").await;

        let job = queue.claim("local", LEASE).await.unwrap().unwrap();
        queue.acknowledge(&job).await.unwrap();

        assert!(queue.claim("local", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_priority_then_available_at_ordering() {
        let queue = MemoryQueue::new();
        let past = Utc::now() - chrono::Duration::seconds(60);

        queue
            .enqueue(
                json!({ "n": "older-low" }),
                EnqueueOptions {
                    available_at: Some(past),
                    priority: 0,
                    ..EnqueueOptions::for_location("local")
                },
            )
            .await
            .unwrap();
        queue
            .enqueue(
                json!({ "n": "newer-high" }),
                EnqueueOptions {
                    priority: 10,
                    ..EnqueueOptions::for_location("local")
                },
            )
            .await
            .unwrap();

        let first = queue.claim("local", LEASE).await.unwrap().unwrap();
        assert_eq!(first.data["n"], "newer-high");

        let second = queue.claim("local", LEASE).await.unwrap().unwrap();
        assert_eq!(second.data["n"], "older-low");
    }

    #[tokio::test]
    async fn test_extend_lease_pushes_deadline() {
        let queue = MemoryQueue::new();
        enqueue_one(&queue, "local").await;

        let job = queue.claim("local", Duration::from_secs(1)).await.unwrap().unwrap();
        let before = job.locked_until.unwrap();

        queue.extend_lease(&job, Duration::from_secs(600)).await.unwrap();
        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert!(stored.locked_until.unwrap() > before);
    }
}
