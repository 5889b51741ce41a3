//! In-memory repository implementations.
//!
//! These mirror the PostgreSQL repositories' semantics (state guards, tenant
//! visibility, trigram scoring, agreement ordering) and back the unit tests of
//! the queue, the matching engine and the generator. They are also usable for
//! single-process deployments that do not need durability.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use pgvector::Vector;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use uuid::Uuid;

use previsa_core::defaults::LEXICAL_MATCH_THRESHOLD;
use previsa_core::{
    cosine_similarity, trigram_similarity, Agreement, AgreementRepository, CandidateHit,
    CatalogEntity, CatalogKind, CatalogRepository, Error, Job, JobRepository, JobState,
    JobStateCount, MatchFeedback, PreAuthStatus, PreAuthorization, PreAuthorizationRepository,
    QueueStats, Result,
};

// =============================================================================
// JOBS
// =============================================================================

/// In-memory job table.
#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored job, oldest first.
    pub async fn all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        sort_jobs(&mut jobs);
        jobs
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[JobState],
        to: JobState,
        update: impl FnOnce(&mut Job),
    ) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;

        if !from.contains(&job.state) {
            return Err(Error::Conflict(format!(
                "job {} cannot move from {} to {}",
                id, job.state, to
            )));
        }
        job.state = to;
        job.updated_at = Utc::now();
        update(job);
        Ok(())
    }
}

fn sort_jobs(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(Error::Conflict(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list_by_batch(&self, batch_id: Uuid) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.batch_id == batch_id)
            .cloned()
            .collect();
        sort_jobs(&mut jobs);
        Ok(jobs)
    }

    async fn mark_processing(&self, id: Uuid) -> Result<()> {
        self.transition(id, &[JobState::Queued], JobState::Processing, |_| {})
            .await
    }

    async fn complete(&self, id: Uuid, attempts: i32, result: Option<JsonValue>) -> Result<()> {
        self.transition(id, &[JobState::Processing], JobState::Done, |job| {
            job.attempts = attempts;
            if result.is_some() {
                job.result = result;
            }
        })
        .await
    }

    async fn requeue(&self, id: Uuid, attempts: i32, error: &str) -> Result<()> {
        self.transition(id, &[JobState::Processing], JobState::Queued, |job| {
            job.attempts = attempts;
            job.error_message = Some(error.to_string());
        })
        .await
    }

    async fn fail(&self, id: Uuid, attempts: i32, error: &str) -> Result<()> {
        self.transition(
            id,
            &[JobState::Queued, JobState::Processing],
            JobState::Failed,
            |job| {
                job.attempts = attempts;
                job.error_message = Some(error.to_string());
            },
        )
        .await
    }

    async fn recover_processing(&self) -> Result<u64> {
        let mut jobs = self.jobs.write().await;
        let now = Utc::now();
        let mut reset = 0;
        for job in jobs.values_mut().filter(|j| j.state == JobState::Processing) {
            job.state = JobState::Queued;
            job.updated_at = now;
            reset += 1;
        }
        Ok(reset)
    }

    async fn list_queued(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.state == JobState::Queued)
            .cloned()
            .collect();
        sort_jobs(&mut jobs);
        Ok(jobs)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let mut grouped: HashMap<(previsa_core::JobType, JobState), i64> = HashMap::new();
        for job in self.jobs.read().await.values() {
            *grouped.entry((job.job_type, job.state)).or_default() += 1;
        }

        let mut counts: Vec<JobStateCount> = grouped
            .into_iter()
            .map(|((job_type, state), count)| JobStateCount {
                job_type,
                state,
                count,
            })
            .collect();
        counts.sort_by_key(|c| (c.job_type.as_str(), c.state.as_str()));
        Ok(QueueStats { counts })
    }
}

// =============================================================================
// CATALOG
// =============================================================================

/// In-memory practice/provider catalog.
#[derive(Default)]
pub struct MemoryCatalogRepository {
    entities: RwLock<HashMap<(CatalogKind, i64), CatalogEntity>>,
}

impl MemoryCatalogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity.
    pub async fn upsert(&self, entity: CatalogEntity) {
        self.entities
            .write()
            .await
            .insert((entity.kind, entity.id), entity);
    }

    pub async fn get(&self, kind: CatalogKind, id: i64) -> Option<CatalogEntity> {
        self.entities.read().await.get(&(kind, id)).cloned()
    }

    async fn find_provider_where(
        &self,
        tenant: Option<Uuid>,
        matches: impl Fn(&CatalogEntity) -> bool,
    ) -> Option<CatalogEntity> {
        let entities = self.entities.read().await;
        let mut found: Vec<&CatalogEntity> = entities
            .values()
            .filter(|e| e.kind == CatalogKind::Provider && e.active && e.visible_to(tenant))
            .filter(|e| matches(e))
            .collect();
        // Tenant-specific entries win over global ones.
        found.sort_by_key(|e| (e.tenant_id.is_none(), e.id));
        found.first().map(|e| (*e).clone())
    }
}

#[async_trait]
impl CatalogRepository for MemoryCatalogRepository {
    async fn search(
        &self,
        kind: CatalogKind,
        query_vector: &Vector,
        normalized_query: &str,
        k: usize,
        tenant: Option<Uuid>,
    ) -> Result<Vec<CandidateHit>> {
        let entities = self.entities.read().await;
        let query = query_vector.as_slice();

        let scored: Vec<CandidateHit> = entities
            .values()
            .filter(|e| e.kind == kind && e.active && e.visible_to(tenant))
            .map(|e| CandidateHit {
                id: e.id,
                canonical_text: e.canonical_text.clone(),
                vector_similarity: e
                    .embedding
                    .as_ref()
                    .map(|v| cosine_similarity(v.as_slice(), query)),
                lexical_similarity: trigram_similarity(&e.normalized_text, normalized_query),
            })
            .collect();

        let mut semantic: Vec<&CandidateHit> = scored
            .iter()
            .filter(|h| h.vector_similarity.is_some())
            .collect();
        semantic.sort_by(|a, b| {
            b.vector_similarity
                .partial_cmp(&a.vector_similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });

        let mut lexical: Vec<&CandidateHit> = scored
            .iter()
            .filter(|h| h.lexical_similarity > LEXICAL_MATCH_THRESHOLD)
            .collect();
        lexical.sort_by(|a, b| {
            b.lexical_similarity
                .partial_cmp(&a.lexical_similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });

        let mut hits: Vec<CandidateHit> = Vec::new();
        for hit in semantic.into_iter().take(k).chain(lexical.into_iter().take(k)) {
            if !hits.iter().any(|h| h.id == hit.id) {
                hits.push(hit.clone());
            }
        }
        Ok(hits)
    }

    async fn find_provider_by_tax_id(
        &self,
        tax_id: &str,
        tenant: Option<Uuid>,
    ) -> Result<Option<CatalogEntity>> {
        let tax_id = tax_id.trim();
        Ok(self
            .find_provider_where(tenant, |e| e.tax_id.as_deref() == Some(tax_id))
            .await)
    }

    async fn find_provider_by_license(
        &self,
        license: &str,
        tenant: Option<Uuid>,
    ) -> Result<Option<CatalogEntity>> {
        let license = license.trim();
        Ok(self
            .find_provider_where(tenant, |e| e.license.as_deref() == Some(license))
            .await)
    }

    async fn get_many(&self, kind: CatalogKind, ids: &[i64]) -> Result<Vec<CatalogEntity>> {
        let entities = self.entities.read().await;
        let mut found: Vec<CatalogEntity> = ids
            .iter()
            .filter_map(|id| entities.get(&(kind, *id)).cloned())
            .collect();
        found.sort_by_key(|e| e.id);
        found.dedup_by_key(|e| e.id);
        Ok(found)
    }

    async fn store_embedding(
        &self,
        kind: CatalogKind,
        id: i64,
        embedding: Vector,
        normalized_text: &str,
    ) -> Result<()> {
        let mut entities = self.entities.write().await;
        let entity = entities
            .get_mut(&(kind, id))
            .ok_or_else(|| Error::NotFound(format!("{} {}", kind, id)))?;
        entity.embedding = Some(embedding);
        entity.normalized_text = normalized_text.to_string();
        Ok(())
    }
}

// =============================================================================
// AGREEMENTS
// =============================================================================

/// In-memory agreement table.
#[derive(Default)]
pub struct MemoryAgreementRepository {
    agreements: RwLock<Vec<Agreement>>,
}

impl MemoryAgreementRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, agreement: Agreement) {
        let mut agreements = self.agreements.write().await;
        agreements.retain(|a| a.id != agreement.id);
        agreements.push(agreement);
    }
}

#[async_trait]
impl AgreementRepository for MemoryAgreementRepository {
    async fn find_in_force(
        &self,
        provider_id: i64,
        practice_id: i64,
        plan_id: i32,
        day: NaiveDate,
    ) -> Result<Option<Agreement>> {
        let agreements = self.agreements.read().await;
        Ok(agreements
            .iter()
            .filter(|a| {
                a.provider_id == provider_id
                    && a.practice_id == practice_id
                    && a.plan_id == plan_id
                    && a.is_in_force(day)
            })
            .max_by(|a, b| a.effective_from.cmp(&b.effective_from).then(a.id.cmp(&b.id)))
            .cloned())
    }
}

// =============================================================================
// PRE-AUTHORIZATIONS
// =============================================================================

/// In-memory pre-authorization store.
#[derive(Default)]
pub struct MemoryPreAuthorizationRepository {
    records: RwLock<HashMap<Uuid, PreAuthorization>>,
    feedback: RwLock<Vec<MatchFeedback>>,
}

impl MemoryPreAuthorizationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Feedback recorded by corrections, oldest first.
    pub async fn feedback(&self) -> Vec<MatchFeedback> {
        self.feedback.read().await.clone()
    }

    async fn review(
        &self,
        id: Uuid,
        status: PreAuthStatus,
        reviewer: &str,
        reason: Option<String>,
    ) -> Result<PreAuthorization> {
        let mut records = self.records.write().await;
        let auth = records
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("pre-authorization {}", id)))?;
        auth.review(status, reviewer, reason, Utc::now())?;
        Ok(auth.clone())
    }
}

#[async_trait]
impl PreAuthorizationRepository for MemoryPreAuthorizationRepository {
    async fn insert(&self, auth: &PreAuthorization) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&auth.id) {
            return Err(Error::Conflict(format!(
                "pre-authorization {} already exists",
                auth.id
            )));
        }
        if let Some(job_id) = auth.job_id {
            if records.values().any(|r| r.job_id == Some(job_id)) {
                return Err(Error::Conflict(format!(
                    "job {} already produced a pre-authorization",
                    job_id
                )));
            }
        }
        records.insert(auth.id, auth.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PreAuthorization>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_by_job(&self, job_id: Uuid) -> Result<Option<PreAuthorization>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.job_id == Some(job_id))
            .cloned())
    }

    async fn approve(&self, id: Uuid, reviewer: &str) -> Result<PreAuthorization> {
        self.review(id, PreAuthStatus::Approved, reviewer, None).await
    }

    async fn reject(&self, id: Uuid, reviewer: &str, reason: &str) -> Result<PreAuthorization> {
        self.review(id, PreAuthStatus::Rejected, reviewer, Some(reason.to_string()))
            .await
    }

    async fn correct_item(
        &self,
        id: Uuid,
        sequence: i32,
        practice_id: i64,
        reviewer: &str,
        reason: &str,
    ) -> Result<PreAuthorization> {
        let mut records = self.records.write().await;
        let auth = records
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("pre-authorization {}", id)))?;
        let feedback = auth.correct_item(sequence, practice_id, reviewer, reason, Utc::now())?;
        // Taken while the records lock is held so both change together.
        self.feedback.write().await.push(feedback);
        Ok(auth.clone())
    }

    async fn list_pending(
        &self,
        tenant: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<PreAuthorization>> {
        let records = self.records.read().await;
        let mut pending: Vec<PreAuthorization> = records
            .values()
            .filter(|r| r.status == PreAuthStatus::Pending)
            .filter(|r| tenant.is_none() || r.tenant_id == tenant)
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        pending.truncate(limit);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use previsa_core::{
        new_v7, CatalogEmbeddingRequest, JobPayload, JobType, LineItem, MatchResult,
    };

    fn queued_job(job_type: JobType) -> Job {
        let now = Utc::now();
        Job {
            id: new_v7(),
            job_type,
            batch_id: Uuid::nil(),
            external_id: None,
            tenant_id: None,
            payload: JobPayload::EmbedPractices(CatalogEmbeddingRequest { ids: vec![1] }),
            state: JobState::Queued,
            attempts: 0,
            max_attempts: 3,
            error_message: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    // ========== Jobs ==========

    #[tokio::test]
    async fn test_job_lifecycle_transitions() {
        let repo = MemoryJobRepository::new();
        let job = queued_job(JobType::EmbedPractices);
        repo.insert(&job).await.unwrap();

        repo.mark_processing(job.id).await.unwrap();
        repo.requeue(job.id, 1, "boom").await.unwrap();
        repo.mark_processing(job.id).await.unwrap();
        repo.complete(job.id, 2, Some(serde_json::json!({"ok": true})))
            .await
            .unwrap();

        let stored = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Done);
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
        assert!(stored.result.is_some());
    }

    #[tokio::test]
    async fn test_job_transition_guard() {
        let repo = MemoryJobRepository::new();
        let job = queued_job(JobType::EmbedPractices);
        repo.insert(&job).await.unwrap();

        let err = repo.complete(job.id, 1, None).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(matches!(
            repo.mark_processing(Uuid::new_v4()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_recover_processing_resets_only_processing() {
        let repo = MemoryJobRepository::new();
        let a = queued_job(JobType::EmbedPractices);
        let b = queued_job(JobType::EmbedPractices);
        repo.insert(&a).await.unwrap();
        repo.insert(&b).await.unwrap();
        repo.mark_processing(a.id).await.unwrap();

        assert_eq!(repo.recover_processing().await.unwrap(), 1);
        assert_eq!(repo.list_queued().await.unwrap().len(), 2);
        assert_eq!(repo.recover_processing().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_stats_groups_by_type_and_state() {
        let repo = MemoryJobRepository::new();
        let a = queued_job(JobType::EmbedPractices);
        repo.insert(&a).await.unwrap();
        repo.insert(&queued_job(JobType::EmbedPractices)).await.unwrap();
        repo.insert(&queued_job(JobType::PreAuthorization)).await.unwrap();
        repo.fail(a.id, 0, "no handler").await.unwrap();

        let stats = repo.queue_stats().await.unwrap();
        assert_eq!(stats.count(JobType::EmbedPractices, JobState::Queued), 1);
        assert_eq!(stats.count(JobType::EmbedPractices, JobState::Failed), 1);
        assert_eq!(stats.count(JobType::PreAuthorization, JobState::Queued), 1);
    }

    // ========== Catalog ==========

    #[tokio::test]
    async fn test_search_includes_unembedded_lexical_hits() {
        let repo = MemoryCatalogRepository::new();
        repo.upsert(
            CatalogEntity::new(1, CatalogKind::Practice, "Radiografía de tórax")
                .with_embedding(Vector::from(vec![1.0, 0.0])),
        )
        .await;
        repo.upsert(CatalogEntity::new(2, CatalogKind::Practice, "Radiografia torax frente"))
            .await;
        repo.upsert(CatalogEntity::new(3, CatalogKind::Practice, "Hemograma completo"))
            .await;

        let hits = repo
            .search(
                CatalogKind::Practice,
                &Vector::from(vec![1.0, 0.0]),
                "radiografia de torax",
                10,
                None,
            )
            .await
            .unwrap();

        let ids: Vec<i64> = hits.iter().map(|h| h.id).collect();
        assert!(ids.contains(&1));
        assert!(ids.contains(&2));
        assert!(!ids.contains(&3));
        let lexical_only = hits.iter().find(|h| h.id == 2).unwrap();
        assert!(lexical_only.vector_similarity.is_none());
    }

    #[tokio::test]
    async fn test_search_skips_inactive_and_foreign_tenants() {
        let repo = MemoryCatalogRepository::new();
        let tenant = Uuid::new_v4();
        let v = Vector::from(vec![1.0, 0.0]);
        repo.upsert(CatalogEntity::new(1, CatalogKind::Practice, "a").with_embedding(v.clone()).inactive())
            .await;
        repo.upsert(
            CatalogEntity::new(2, CatalogKind::Practice, "b")
                .with_embedding(v.clone())
                .with_tenant(Uuid::new_v4()),
        )
        .await;
        repo.upsert(
            CatalogEntity::new(3, CatalogKind::Practice, "c")
                .with_embedding(v.clone())
                .with_tenant(tenant),
        )
        .await;

        let hits = repo
            .search(CatalogKind::Practice, &v, "zzz", 10, Some(tenant))
            .await
            .unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![3]);
    }

    #[tokio::test]
    async fn test_find_provider_by_tax_id_prefers_tenant_entry() {
        let repo = MemoryCatalogRepository::new();
        let tenant = Uuid::new_v4();
        repo.upsert(CatalogEntity::new(1, CatalogKind::Provider, "Global").with_tax_id("80001-1"))
            .await;
        repo.upsert(
            CatalogEntity::new(2, CatalogKind::Provider, "Local")
                .with_tax_id("80001-1")
                .with_tenant(tenant),
        )
        .await;

        let found = repo
            .find_provider_by_tax_id(" 80001-1 ", Some(tenant))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, 2);

        let global = repo.find_provider_by_tax_id("80001-1", None).await.unwrap().unwrap();
        assert_eq!(global.id, 1);
    }

    #[tokio::test]
    async fn test_store_embedding_unknown_entity() {
        let repo = MemoryCatalogRepository::new();
        let err = repo
            .store_embedding(CatalogKind::Provider, 9, Vector::from(vec![1.0]), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    // ========== Agreements ==========

    #[tokio::test]
    async fn test_agreement_latest_effective_date_wins() {
        let repo = MemoryAgreementRepository::new();
        let base = Agreement {
            id: 1,
            provider_id: 10,
            practice_id: 20,
            plan_id: 1,
            price: 100.0,
            effective_from: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            valid_until: None,
            active: true,
        };
        repo.upsert(base.clone()).await;
        repo.upsert(Agreement {
            id: 2,
            price: 150.0,
            effective_from: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            ..base.clone()
        })
        .await;
        repo.upsert(Agreement {
            id: 3,
            price: 999.0,
            effective_from: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            active: false,
            ..base.clone()
        })
        .await;

        let day = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let found = repo.find_in_force(10, 20, 1, day).await.unwrap().unwrap();
        assert_eq!(found.id, 2);
        assert!(repo.find_in_force(10, 20, 2, day).await.unwrap().is_none());
    }

    // ========== Pre-authorizations ==========

    fn stored_auth(tenant_id: Option<Uuid>, age_minutes: i64) -> PreAuthorization {
        PreAuthorization {
            id: new_v7(),
            job_id: None,
            tenant_id,
            file_name: None,
            plan_id: 1,
            patient: None,
            order_date: None,
            ordering_provider: None,
            physician: None,
            diagnosis: None,
            overall_confidence: 0.8,
            requires_review: false,
            status: PreAuthStatus::Pending,
            observations: String::new(),
            warnings: vec![],
            items: vec![LineItem {
                sequence: 1,
                original_text: "eco abdominal".to_string(),
                quantity: 1,
                suggested_match: Some(MatchResult::exact(40, "Ecografía abdominal")),
                alternative_matches: vec![],
                has_agreement: false,
                agreement_id: None,
                agreed_price: None,
                executing_provider_id: None,
                note: None,
                correction: None,
            }],
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
            created_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    #[tokio::test]
    async fn test_correct_item_stores_correction_and_feedback() {
        let repo = MemoryPreAuthorizationRepository::new();
        let auth = stored_auth(None, 0);
        repo.insert(&auth).await.unwrap();

        let corrected = repo
            .correct_item(auth.id, 1, 41, "auditor", "complete study")
            .await
            .unwrap();

        let correction = corrected.items[0].correction.as_ref().unwrap();
        assert_eq!(correction.practice_id, 41);
        assert_eq!(corrected.status, PreAuthStatus::Pending);
        let feedback = repo.feedback().await;
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].suggested_practice_id, Some(40));
        assert_eq!(feedback[0].corrected_practice_id, 41);
        assert_eq!(feedback[0].reason, "complete study");
    }

    #[tokio::test]
    async fn test_correct_item_after_review_is_conflict() {
        let repo = MemoryPreAuthorizationRepository::new();
        let auth = stored_auth(None, 0);
        repo.insert(&auth).await.unwrap();
        repo.reject(auth.id, "auditor", "duplicate").await.unwrap();

        let err = repo
            .correct_item(auth.id, 1, 41, "auditor", "late")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(repo.feedback().await.is_empty());

        let err = repo
            .correct_item(new_v7(), 1, 41, "auditor", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_pending_newest_first_with_tenant_filter() {
        let repo = MemoryPreAuthorizationRepository::new();
        let tenant = new_v7();
        let old = stored_auth(Some(tenant), 30);
        let new = stored_auth(Some(tenant), 1);
        let other = stored_auth(None, 10);
        let approved = stored_auth(Some(tenant), 5);
        for auth in [&old, &new, &other, &approved] {
            repo.insert(auth).await.unwrap();
        }
        repo.approve(approved.id, "auditor").await.unwrap();

        let all = repo.list_pending(None, 50).await.unwrap();
        let ids: Vec<Uuid> = all.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![new.id, other.id, old.id]);

        let scoped = repo.list_pending(Some(tenant), 50).await.unwrap();
        let ids: Vec<Uuid> = scoped.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![new.id, old.id]);

        let limited = repo.list_pending(None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, new.id);
    }
}
