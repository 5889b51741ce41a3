//! End-to-end flow: catalog embedding job, then a pre-authorization job,
//! through the queue with in-memory repositories.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use uuid::Uuid;

use previsa_core::{
    CatalogEmbeddingRequest, CatalogEntity, CatalogKind, EnqueueOptions, ExtractedPractice,
    ExtractionResult, JobPayload, JobState, Notifier, PreAuthorizationRepository,
    PreAuthorizationRequest, Result,
};
use previsa_db::{
    MemoryAgreementRepository, MemoryCatalogRepository, MemoryJobRepository,
    MemoryPreAuthorizationRepository,
};
use previsa_inference::mock::MockEmbeddingBackend;
use previsa_inference::CachedEmbedder;
use previsa_jobs::{
    CatalogEmbeddingHandler, JobQueue, PreAuthorizationHandler, QueueBuilder, QueueConfig,
    QueueEvent,
};
use previsa_matching::{MatchingEngine, PreAuthorizationGenerator};

const CATALOG_TEXT: &str = "Chest X-ray front/lateral";
const ORDER_TEXT: &str = "chest X-ray";

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(Option<Uuid>, String, JsonValue)>>,
}

impl RecordingNotifier {
    fn events(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, e, _)| e.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, tenant_id: Option<Uuid>, event: &str, payload: JsonValue) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((tenant_id, event.to_string(), payload));
        Ok(())
    }
}

struct Harness {
    queue: JobQueue,
    catalog: Arc<MemoryCatalogRepository>,
    store: Arc<MemoryPreAuthorizationRepository>,
    notifier: Arc<RecordingNotifier>,
}

fn harness(backend: MockEmbeddingBackend) -> Harness {
    let catalog = Arc::new(MemoryCatalogRepository::new());
    let agreements = Arc::new(MemoryAgreementRepository::new());
    let store = Arc::new(MemoryPreAuthorizationRepository::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let embedder = Arc::new(CachedEmbedder::new(Arc::new(backend)));

    let engine = Arc::new(MatchingEngine::new(
        catalog.clone(),
        agreements,
        embedder.clone(),
    ));
    let generator = Arc::new(PreAuthorizationGenerator::new(engine, store.clone()));

    let queue = QueueBuilder::new(Arc::new(MemoryJobRepository::new()))
        .with_config(QueueConfig::default().with_concurrency(1))
        .with_handler(PreAuthorizationHandler::new(generator, notifier.clone()))
        .with_handler(CatalogEmbeddingHandler::practices(catalog.clone(), embedder.clone()))
        .with_handler(CatalogEmbeddingHandler::providers(catalog.clone(), embedder))
        .build()
        .expect("handlers register");

    Harness {
        queue,
        catalog,
        store,
        notifier,
    }
}

async fn wait_for(events: &mut broadcast::Receiver<QueueEvent>, job_id: Uuid) -> QueueEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("event stream open");
            let finished = matches!(
                &event,
                QueueEvent::JobCompleted { job_id: id, .. } | QueueEvent::JobFailed { job_id: id, .. }
                    if *id == job_id
            );
            if finished {
                return event;
            }
        }
    })
    .await
    .expect("job finished in time")
}

fn chest_xray_order() -> JobPayload {
    JobPayload::PreAuthorization(PreAuthorizationRequest {
        extraction: ExtractionResult {
            practices: vec![ExtractedPractice {
                description: ORDER_TEXT.to_string(),
                quantity: Some(1),
                ..Default::default()
            }],
            ..Default::default()
        },
        plan_id: None,
        file_name: Some("order-0001.pdf".to_string()),
    })
}

#[tokio::test]
async fn test_chest_xray_order_end_to_end() {
    // cos(query, catalog) = 0.95
    let backend = MockEmbeddingBackend::new(8)
        .with_vector(ORDER_TEXT, vec![1.0, 0.0])
        .with_vector(CATALOG_TEXT, vec![0.95, 0.312_25]);
    let h = harness(backend);
    h.catalog
        .upsert(CatalogEntity::new(42, CatalogKind::Practice, CATALOG_TEXT))
        .await;

    let mut events = h.queue.events();
    h.queue.start().await.unwrap();

    let embed = h
        .queue
        .enqueue(
            JobPayload::EmbedPractices(CatalogEmbeddingRequest { ids: vec![42] }),
            EnqueueOptions::new(),
        )
        .await
        .unwrap();
    assert!(matches!(
        wait_for(&mut events, embed.job_id).await,
        QueueEvent::JobCompleted { .. }
    ));

    let tenant = Uuid::new_v4();
    let batch = Uuid::new_v4();
    let enqueued = h
        .queue
        .enqueue(
            chest_xray_order(),
            EnqueueOptions::new()
                .with_batch(batch)
                .with_tenant(tenant)
                .with_external_id("order-0001"),
        )
        .await
        .unwrap();
    assert!(matches!(
        wait_for(&mut events, enqueued.job_id).await,
        QueueEvent::JobCompleted { .. }
    ));

    let job = h.queue.get_job_status(enqueued.job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.attempts, 1);

    let auth = h
        .store
        .find_by_job(enqueued.job_id)
        .await
        .unwrap()
        .expect("pre-authorization stored");
    assert_eq!(auth.tenant_id, Some(tenant));
    assert_eq!(auth.items.len(), 1);

    let item = &auth.items[0];
    let best = item.suggested_match.as_ref().expect("line matched");
    assert_eq!(best.candidate_id, 42);
    assert!((best.vector_similarity - 0.95).abs() < 1e-3);
    assert!(best.combined_score > 0.665);
    assert!(!item.has_agreement);
    assert_eq!(item.note.as_deref(), Some("no agreement with provider"));

    // Only the line score contributes; agreement absence is not penalised.
    let expected = ((best.combined_score / 4.0) * 100.0).round() / 100.0;
    assert_eq!(auth.overall_confidence, expected);
    assert!(auth.requires_review);

    let result = job.result.expect("job result stored");
    assert_eq!(result["pre_authorization_id"], serde_json::json!(auth.id));
    assert_eq!(result["item_count"], 1);

    assert_eq!(h.notifier.events(), vec!["pre_authorization.generated"]);
    {
        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(sent[0].0, Some(tenant));
        assert_eq!(sent[0].2["external_id"], "order-0001");
    }

    let batch_status = h.queue.get_batch_status(batch).await.unwrap().unwrap();
    assert!(batch_status.is_finished());
    assert_eq!(batch_status.done, 1);
    h.queue.shutdown().await;
}

#[tokio::test]
async fn test_final_failure_is_notified_once() {
    let h = harness(MockEmbeddingBackend::new(8).failing());
    h.catalog
        .upsert(CatalogEntity::new(42, CatalogKind::Practice, CATALOG_TEXT))
        .await;

    let mut events = h.queue.events();
    h.queue.start().await.unwrap();

    let enqueued = h
        .queue
        .enqueue(chest_xray_order(), EnqueueOptions::new().with_max_attempts(1))
        .await
        .unwrap();
    assert!(matches!(
        wait_for(&mut events, enqueued.job_id).await,
        QueueEvent::JobFailed { .. }
    ));

    let job = h.queue.get_job_status(enqueued.job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(h.store.count().await, 0);
    assert_eq!(h.notifier.events(), vec!["pre_authorization.failed"]);
    h.queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retried_generation_notifies_failure_only_on_last_attempt() {
    let h = harness(MockEmbeddingBackend::new(8).failing());
    h.catalog
        .upsert(CatalogEntity::new(42, CatalogKind::Practice, CATALOG_TEXT))
        .await;

    let mut events = h.queue.events();
    h.queue.start().await.unwrap();

    let enqueued = h
        .queue
        .enqueue(chest_xray_order(), EnqueueOptions::new())
        .await
        .unwrap();
    wait_for(&mut events, enqueued.job_id).await;

    let job = h.queue.get_job_status(enqueued.job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(h.notifier.events(), vec!["pre_authorization.failed"]);
    h.queue.shutdown().await;
}
