//! Runs the generator for a pre-authorization job and notifies the outcome.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, instrument, warn};

use previsa_core::{JobPayload, JobType, Notifier};
use previsa_matching::PreAuthorizationGenerator;

use crate::handler::{JobContext, JobHandler, JobResult};

/// Event sent after a pre-authorization was stored.
pub const EVENT_GENERATED: &str = "pre_authorization.generated";
/// Event sent when the last attempt of a job failed.
pub const EVENT_FAILED: &str = "pre_authorization.failed";

pub struct PreAuthorizationHandler {
    generator: Arc<PreAuthorizationGenerator>,
    notifier: Arc<dyn Notifier>,
}

impl PreAuthorizationHandler {
    pub fn new(generator: Arc<PreAuthorizationGenerator>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            generator,
            notifier,
        }
    }

    /// Delivery problems are logged and never fail the job.
    async fn notify(&self, ctx: &JobContext, event: &str, payload: serde_json::Value) {
        if let Err(e) = self.notifier.notify(ctx.tenant_id(), event, payload).await {
            warn!(job_id = %ctx.job_id(), event, error = %e, "Notification failed");
        }
    }
}

#[async_trait]
impl JobHandler for PreAuthorizationHandler {
    fn job_type(&self) -> JobType {
        JobType::PreAuthorization
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "pre_authorization_handler", op = "execute", job_id = %ctx.job_id(), attempt = ctx.attempt)
    )]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let request = match ctx.payload() {
            JobPayload::PreAuthorization(request) => request,
            other => {
                return JobResult::Failed(format!(
                    "expected a pre_authorization payload, got {}",
                    other.job_type()
                ))
            }
        };

        match self
            .generator
            .generate(Some(ctx.job_id()), ctx.tenant_id(), request)
            .await
        {
            Ok(generated) => {
                let summary = generated.summary();
                info!(
                    pre_authorization_id = %summary.pre_authorization_id,
                    confidence = summary.overall_confidence,
                    requires_review = summary.requires_review,
                    new = generated.is_new(),
                    "Pre-authorization job finished"
                );
                // A stored record was already announced by the attempt that created it.
                if generated.is_new() {
                    self.notify(
                        &ctx,
                        EVENT_GENERATED,
                        json!({
                            "job_id": ctx.job_id(),
                            "batch_id": ctx.job.batch_id,
                            "external_id": ctx.job.external_id,
                            "pre_authorization_id": summary.pre_authorization_id,
                            "overall_confidence": summary.overall_confidence,
                            "requires_review": summary.requires_review,
                            "item_count": summary.item_count,
                        }),
                    )
                    .await;
                }

                match serde_json::to_value(summary) {
                    Ok(value) => JobResult::Success(Some(value)),
                    Err(e) => JobResult::Failed(format!("failed to serialize summary: {}", e)),
                }
            }
            Err(e) => {
                let message = e.to_string();
                if ctx.is_final_attempt {
                    self.notify(
                        &ctx,
                        EVENT_FAILED,
                        json!({
                            "job_id": ctx.job_id(),
                            "batch_id": ctx.job.batch_id,
                            "external_id": ctx.job.external_id,
                            "attempts": ctx.attempt,
                            "error": message,
                        }),
                    )
                    .await;
                }
                JobResult::Failed(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;
    use uuid::Uuid;

    use previsa_core::{
        ExtractedPractice, ExtractionResult, Job, JobState, PreAuthorizationRequest, Result,
    };
    use previsa_db::{
        MemoryAgreementRepository, MemoryCatalogRepository, MemoryPreAuthorizationRepository,
    };
    use previsa_inference::mock::MockEmbeddingBackend;
    use previsa_matching::MatchingEngine;

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            _tenant_id: Option<Uuid>,
            event: &str,
            _payload: serde_json::Value,
        ) -> Result<()> {
            self.events.lock().unwrap().push(event.to_string());
            Ok(())
        }
    }

    fn handler(
        notifier: Arc<RecordingNotifier>,
    ) -> (PreAuthorizationHandler, Arc<MemoryPreAuthorizationRepository>) {
        let store = Arc::new(MemoryPreAuthorizationRepository::new());
        let engine = MatchingEngine::new(
            Arc::new(MemoryCatalogRepository::new()),
            Arc::new(MemoryAgreementRepository::new()),
            Arc::new(MockEmbeddingBackend::new(8)),
        );
        let generator = PreAuthorizationGenerator::new(Arc::new(engine), store.clone());
        (PreAuthorizationHandler::new(Arc::new(generator), notifier), store)
    }

    fn job(attempts: i32) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            job_type: JobType::PreAuthorization,
            batch_id: Uuid::new_v4(),
            external_id: None,
            tenant_id: None,
            payload: JobPayload::PreAuthorization(PreAuthorizationRequest {
                extraction: ExtractionResult {
                    practices: vec![ExtractedPractice {
                        description: "hemograma".to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                ..Default::default()
            }),
            state: JobState::Processing,
            attempts,
            max_attempts: 3,
            error_message: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_rerun_of_stored_job_does_not_notify_again() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (handler, store) = handler(notifier.clone());
        let first = job(0);
        let mut rerun = first.clone();
        rerun.attempts = 1;

        let a = handler.execute(JobContext::new(first)).await;
        let b = handler.execute(JobContext::new(rerun)).await;

        assert!(matches!(a, JobResult::Success(Some(_))));
        assert!(matches!(b, JobResult::Success(Some(_))));
        assert_eq!(store.count().await, 1);
        assert_eq!(*notifier.events.lock().unwrap(), vec![EVENT_GENERATED.to_string()]);
    }

    #[tokio::test]
    async fn test_wrong_payload_fails_without_notification() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (handler, _) = handler(notifier.clone());
        let mut wrong = job(0);
        wrong.payload = JobPayload::EmbedPractices(previsa_core::CatalogEmbeddingRequest {
            ids: vec![1],
        });

        let result = handler.execute(JobContext::new(wrong)).await;

        assert!(matches!(result, JobResult::Failed(msg) if msg.contains("embed_practices")));
        assert!(notifier.events.lock().unwrap().is_empty());
    }
}
