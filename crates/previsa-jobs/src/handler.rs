//! Job handlers for each job type.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use previsa_core::{Job, JobPayload, JobType};

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: Job,
    /// 1-based number of the attempt now running.
    pub attempt: i32,
    /// No retry follows if this attempt fails.
    pub is_final_attempt: bool,
}

impl JobContext {
    /// Context for the next attempt of `job`.
    pub fn new(job: Job) -> Self {
        let attempt = job.attempts + 1;
        let is_final_attempt = attempt >= job.max_attempts;
        Self {
            job,
            attempt,
            is_final_attempt,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        self.job.tenant_id
    }

    /// Get the job payload.
    pub fn payload(&self) -> &JobPayload {
        &self.job.payload
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// The attempt failed; the queue decides whether to retry.
    Failed(String),
}

/// Trait for job handlers.
///
/// Handlers never touch the job table; the queue persists every outcome.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute one attempt of the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Check if this handler can process the given job type.
    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use previsa_core::{CatalogEmbeddingRequest, JobState};

    fn job(attempts: i32, max_attempts: i32) -> Job {
        Job {
            id: Uuid::new_v4(),
            job_type: JobType::EmbedPractices,
            batch_id: Uuid::new_v4(),
            external_id: None,
            tenant_id: Some(Uuid::new_v4()),
            payload: JobPayload::EmbedPractices(CatalogEmbeddingRequest { ids: vec![1] }),
            state: JobState::Processing,
            attempts,
            max_attempts,
            error_message: None,
            result: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_attempt() {
        let ctx = JobContext::new(job(0, 3));
        assert_eq!(ctx.attempt, 1);
        assert!(!ctx.is_final_attempt);
    }

    #[test]
    fn test_final_attempt() {
        let ctx = JobContext::new(job(2, 3));
        assert_eq!(ctx.attempt, 3);
        assert!(ctx.is_final_attempt);

        let single = JobContext::new(job(0, 1));
        assert!(single.is_final_attempt);
    }

    #[test]
    fn test_context_accessors() {
        let job = job(0, 3);
        let ctx = JobContext::new(job.clone());
        assert_eq!(ctx.job_id(), job.id);
        assert_eq!(ctx.tenant_id(), job.tenant_id);
        assert!(matches!(ctx.payload(), JobPayload::EmbedPractices(_)));
    }
}
