//! Core traits for previsa abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::*;
use crate::Vector;

// =============================================================================
// JOB REPOSITORY
// =============================================================================

/// Durable job table. The persisted state is the source of truth; the queue's
/// in-memory ready index is rebuilt from it on start.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist a freshly created job (state Queued, attempts 0).
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Fetch a job by id.
    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    /// All jobs of a batch, oldest first.
    async fn list_by_batch(&self, batch_id: Uuid) -> Result<Vec<Job>>;

    /// Queued to Processing. The attempt counter is left untouched.
    async fn mark_processing(&self, id: Uuid) -> Result<()>;

    /// Processing to Done with the handler result.
    async fn complete(&self, id: Uuid, attempts: i32, result: Option<JsonValue>) -> Result<()>;

    /// Processing back to Queued after a failed attempt.
    async fn requeue(&self, id: Uuid, attempts: i32, error: &str) -> Result<()>;

    /// Terminal failure.
    async fn fail(&self, id: Uuid, attempts: i32, error: &str) -> Result<()>;

    /// Reset every Processing job to Queued; returns how many were reset.
    async fn recover_processing(&self) -> Result<u64>;

    /// Every Queued job, oldest first.
    async fn list_queued(&self) -> Result<Vec<Job>>;

    /// Job counts grouped by type and state.
    async fn queue_stats(&self) -> Result<QueueStats>;
}

// =============================================================================
// CATALOG REPOSITORY
// =============================================================================

/// Reference catalog of practices and providers (the similarity store).
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Nearest active entities of `kind` visible to `tenant`.
    ///
    /// Returns the union of the `k` nearest embedded entities by cosine
    /// similarity and the `k` best lexical matches against
    /// `normalized_query`, so unembedded entities can still surface with a
    /// lexical-only score. Each id appears at most once.
    async fn search(
        &self,
        kind: CatalogKind,
        query_vector: &Vector,
        normalized_query: &str,
        k: usize,
        tenant: Option<Uuid>,
    ) -> Result<Vec<CandidateHit>>;

    /// Active provider with exactly this tax id.
    async fn find_provider_by_tax_id(
        &self,
        tax_id: &str,
        tenant: Option<Uuid>,
    ) -> Result<Option<CatalogEntity>>;

    /// Active provider with exactly this professional license.
    async fn find_provider_by_license(
        &self,
        license: &str,
        tenant: Option<Uuid>,
    ) -> Result<Option<CatalogEntity>>;

    /// Load entities by id (missing ids are skipped).
    async fn get_many(&self, kind: CatalogKind, ids: &[i64]) -> Result<Vec<CatalogEntity>>;

    /// Store a fresh embedding and the normalized text it was derived from.
    async fn store_embedding(
        &self,
        kind: CatalogKind,
        id: i64,
        embedding: Vector,
        normalized_text: &str,
    ) -> Result<()>;
}

// =============================================================================
// AGREEMENT REPOSITORY
// =============================================================================

#[async_trait]
pub trait AgreementRepository: Send + Sync {
    /// Agreement in force on `day` for the triple, latest effective date first.
    async fn find_in_force(
        &self,
        provider_id: i64,
        practice_id: i64,
        plan_id: i32,
        day: NaiveDate,
    ) -> Result<Option<Agreement>>;
}

// =============================================================================
// PRE-AUTHORIZATION REPOSITORY
// =============================================================================

#[async_trait]
pub trait PreAuthorizationRepository: Send + Sync {
    /// Persist header and line items atomically.
    async fn insert(&self, auth: &PreAuthorization) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<PreAuthorization>>;

    /// Aggregate previously generated by `job_id`, if any.
    async fn find_by_job(&self, job_id: Uuid) -> Result<Option<PreAuthorization>>;

    /// Pending to Approved.
    async fn approve(&self, id: Uuid, reviewer: &str) -> Result<PreAuthorization>;

    /// Pending to Rejected with a reason.
    async fn reject(&self, id: Uuid, reviewer: &str, reason: &str) -> Result<PreAuthorization>;

    /// Replace the practice of one line and record matching feedback, in
    /// one unit of work. Only allowed while Pending.
    async fn correct_item(
        &self,
        id: Uuid,
        sequence: i32,
        practice_id: i64,
        reviewer: &str,
        reason: &str,
    ) -> Result<PreAuthorization>;

    /// Pending records, newest first. `None` lists every tenant.
    async fn list_pending(
        &self,
        tenant: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<PreAuthorization>>;
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for generating embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts.
    ///
    /// Returns one embedding vector per input text, in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vector> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("cannot embed empty text".to_string()));
        }
        self.embed_texts(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("provider returned no vectors".to_string()))
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Outbound event dispatch to external collaborators (tenant webhooks).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, tenant_id: Option<Uuid>, event: &str, payload: JsonValue) -> Result<()>;
}
