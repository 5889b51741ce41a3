//! Job repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use previsa_core::{Error, Job, JobRepository, JobState, JobStateCount, QueueStats, Result};

const JOB_COLUMNS: &str = "id, job_type, batch_id, external_id, tenant_id, payload, state, \
                           attempts, max_attempts, error_message, result, created_at, updated_at";

/// PostgreSQL implementation of JobRepository.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: Pool<Postgres>,
}

impl PgJobRepository {
    /// Create a new PgJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_job_row(row: PgRow) -> Result<Job> {
        let job_type: String = row.try_get("job_type")?;
        let state: String = row.try_get("state")?;
        let payload: JsonValue = row.try_get("payload")?;

        Ok(Job {
            id: row.try_get("id")?,
            job_type: job_type.parse()?,
            batch_id: row.try_get("batch_id")?,
            external_id: row.try_get("external_id")?,
            tenant_id: row.try_get("tenant_id")?,
            payload: serde_json::from_value(payload)?,
            state: state.parse()?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            error_message: row.try_get("error_message")?,
            result: row.try_get("result")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Guarded state transition; fails when the job is not in one of `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: &[JobState],
        to: JobState,
        attempts: Option<i32>,
        error: Option<&str>,
        result: Option<JsonValue>,
    ) -> Result<()> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();

        let rows = sqlx::query(
            "UPDATE job_queue
             SET state = $2,
                 attempts = COALESCE($3, attempts),
                 error_message = COALESCE($4, error_message),
                 result = COALESCE($5, result),
                 updated_at = $6
             WHERE id = $1 AND state = ANY($7)",
        )
        .bind(id)
        .bind(to.as_str())
        .bind(attempts)
        .bind(error)
        .bind(result)
        .bind(Utc::now())
        .bind(&from)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if rows == 0 {
            return Err(Error::Conflict(format!(
                "job {} cannot move to {} (expected state {})",
                id,
                to,
                from.join("|")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_value(&job.payload)?;

        sqlx::query(
            "INSERT INTO job_queue (id, job_type, batch_id, external_id, tenant_id, payload, state,
                                    attempts, max_attempts, error_message, result, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(job.id)
        .bind(job.job_type.as_str())
        .bind(job.batch_id)
        .bind(&job.external_id)
        .bind(job.tenant_id)
        .bind(payload)
        .bind(job.state.as_str())
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(&job.error_message)
        .bind(&job.result)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn list_by_batch(&self, batch_id: Uuid) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job_queue WHERE batch_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn mark_processing(&self, id: Uuid) -> Result<()> {
        self.transition(id, &[JobState::Queued], JobState::Processing, None, None, None)
            .await
    }

    async fn complete(&self, id: Uuid, attempts: i32, result: Option<JsonValue>) -> Result<()> {
        self.transition(
            id,
            &[JobState::Processing],
            JobState::Done,
            Some(attempts),
            None,
            result,
        )
        .await
    }

    async fn requeue(&self, id: Uuid, attempts: i32, error: &str) -> Result<()> {
        self.transition(
            id,
            &[JobState::Processing],
            JobState::Queued,
            Some(attempts),
            Some(error),
            None,
        )
        .await
    }

    async fn fail(&self, id: Uuid, attempts: i32, error: &str) -> Result<()> {
        self.transition(
            id,
            &[JobState::Queued, JobState::Processing],
            JobState::Failed,
            Some(attempts),
            Some(error),
            None,
        )
        .await
    }

    async fn recover_processing(&self) -> Result<u64> {
        let rows = sqlx::query(
            "UPDATE job_queue SET state = 'queued', updated_at = $1 WHERE state = 'processing'",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        Ok(rows)
    }

    async fn list_queued(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job_queue WHERE state = 'queued' ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query(
            "SELECT job_type, state, COUNT(*)::BIGINT AS count
             FROM job_queue
             GROUP BY job_type, state
             ORDER BY job_type, state",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let counts = rows
            .into_iter()
            .map(|row| {
                let job_type: String = row.try_get("job_type")?;
                let state: String = row.try_get("state")?;
                Ok(JobStateCount {
                    job_type: job_type.parse()?,
                    state: state.parse()?,
                    count: row.try_get("count")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(QueueStats { counts })
    }
}
