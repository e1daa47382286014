//! Backend Postgres da fila (feature `postgres`).
//!
//! O claim é um único statement: CTE com `FOR UPDATE SKIP LOCKED`
//! ordenada por `(priority DESC, available_at ASC)` seguida do UPDATE
//! que instala o lease. Dois workers concorrentes nunca levam o mesmo
//! job - o SKIP LOCKED pula a linha que o outro claim já travou.
//!
//! O ack/fail condiciona em `locked_by`: um worker cujo lease venceu e
//! cujo job foi re-claimado atualiza zero linhas, que é exatamente o
//! "ignorado" do contrato.
//!
//! Testes de integração exigem um Postgres real e rodam com
//! `cargo test --features postgres -- --ignored` com
//! `GRIFFIN_TEST_DATABASE_URL` apontando para ele.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::time::Duration;
use uuid::Uuid;

use super::{EnqueueOptions, Job, JobQueue, JobStatus, QueueError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS griffin_jobs (
    id            UUID PRIMARY KEY,
    data          JSONB NOT NULL,
    status        TEXT NOT NULL,
    attempts      INTEGER NOT NULL DEFAULT 0,
    max_attempts  INTEGER NOT NULL,
    available_at  TIMESTAMPTZ NOT NULL,
    location      TEXT NOT NULL,
    priority      INTEGER NOT NULL DEFAULT 0,
    locked_by     UUID,
    locked_until  TIMESTAMPTZ,
    last_error    TEXT
);
CREATE INDEX IF NOT EXISTS griffin_jobs_claim_idx
    ON griffin_jobs (location, status, priority DESC, available_at ASC);
"#;

pub struct PostgresQueue {
    pool: PgPool,
}

impl PostgresQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Cria a tabela e o índice de claim, se ausentes.
    pub async fn migrate(&self) -> Result<(), QueueError> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        }
        Ok(())
    }
}

fn backend(e: sqlx::Error) -> QueueError {
    QueueError::Backend(e.to_string())
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Job {
    let status: String = row.get("status");
    Job {
        id: row.get("id"),
        data: row.get("data"),
        status: match status.as_str() {
            "PENDING" => JobStatus::Pending,
            "RUNNING" => JobStatus::Running,
            "COMPLETED" => JobStatus::Completed,
            _ => JobStatus::Failed,
        },
        attempts: row.get::<i32, _>("attempts") as u32,
        max_attempts: row.get::<i32, _>("max_attempts") as u32,
        available_at: row.get("available_at"),
        location: row.get("location"),
        priority: row.get("priority"),
        locked_by: row.get("locked_by"),
        locked_until: row.get("locked_until"),
        last_error: row.get("last_error"),
    }
}

#[async_trait]
impl JobQueue for PostgresQueue {
    async fn enqueue(&self, data: Value, options: EnqueueOptions) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        let available_at: DateTime<Utc> = options.available_at.unwrap_or_else(Utc::now);
        sqlx::query(
            r#"
            INSERT INTO griffin_jobs
                (id, data, status, attempts, max_attempts, available_at, location, priority)
            VALUES ($1, $2, 'PENDING', 0, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(&data)
        .bind(options.max_attempts as i32)
        .bind(available_at)
        .bind(&options.location)
        .bind(options.priority)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(id)
    }

    async fn claim(&self, location: &str, lease: Duration) -> Result<Option<Job>, QueueError> {
        let locked_by = Uuid::new_v4();
        let locked_until =
            Utc::now() + chrono::Duration::from_std(lease).unwrap_or_default();

        let row = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id FROM griffin_jobs
                WHERE location = $1
                  AND (
                        (status = 'PENDING'
                         AND available_at <= now()
                         AND (locked_until IS NULL OR locked_until < now()))
                     OR (status = 'RUNNING' AND locked_until < now())
                  )
                ORDER BY priority DESC, available_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE griffin_jobs j
            SET status = 'RUNNING', locked_by = $2, locked_until = $3
            FROM claimable
            WHERE j.id = claimable.id
            RETURNING j.id, j.data, j.status, j.attempts, j.max_attempts,
                      j.available_at, j.location, j.priority, j.locked_by,
                      j.locked_until, j.last_error
            "#,
        )
        .bind(location)
        .bind(locked_by)
        .bind(locked_until)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.as_ref().map(row_to_job))
    }

    async fn acknowledge(&self, job: &Job) -> Result<(), QueueError> {
        // Zero linhas afetadas = claim antigo; ignorado por contrato.
        sqlx::query(
            r#"
            UPDATE griffin_jobs
            SET status = 'COMPLETED', locked_by = NULL, locked_until = NULL
            WHERE id = $1 AND locked_by = $2 AND status = 'RUNNING'
            "#,
        )
        .bind(job.id)
        .bind(job.locked_by)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &str, retry: bool) -> Result<(), QueueError> {
        // backoff(n) = min(2^(n-1), 300) segundos, com n = attempts
        // depois do incremento; em SQL, power(2, attempts) com o valor
        // antigo de attempts.
        sqlx::query(
            r#"
            UPDATE griffin_jobs
            SET attempts     = attempts + 1,
                last_error   = $3,
                locked_by    = NULL,
                locked_until = NULL,
                status       = CASE
                    WHEN $4 AND attempts + 1 < max_attempts THEN 'PENDING'
                    ELSE 'FAILED'
                END,
                available_at = CASE
                    WHEN $4 AND attempts + 1 < max_attempts
                    THEN now() + make_interval(secs => LEAST(power(2, attempts), 300))
                    ELSE available_at
                END
            WHERE id = $1 AND locked_by = $2 AND status = 'RUNNING'
            "#,
        )
        .bind(job.id)
        .bind(job.locked_by)
        .bind(error)
        .bind(retry)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn extend_lease(&self, job: &Job, lease: Duration) -> Result<(), QueueError> {
        let locked_until =
            Utc::now() + chrono::Duration::from_std(lease).unwrap_or_default();
        sqlx::query(
            r#"
            UPDATE griffin_jobs
            SET locked_until = $3
            WHERE id = $1 AND locked_by = $2 AND status = 'RUNNING'
            "#,
        )
        .bind(job.id)
        .bind(job.locked_by)
        .bind(locked_until)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT id, data, status, attempts, max_attempts, available_at,
                   location, priority, locked_by, locked_until, last_error
            FROM griffin_jobs WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.as_ref().map(row_to_job))
    }
}
