//! Core data models for previsa.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// JOB TYPES
// =============================================================================

/// Type of background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Turn an extraction result into a persisted pre-authorization.
    PreAuthorization,
    /// (Re-)embed provider catalog entries.
    EmbedProviders,
    /// (Re-)embed practice catalog entries.
    EmbedPractices,
}

impl JobType {
    /// Dispatch order across types; earlier types always win a free slot.
    pub const PRIORITY: [JobType; 3] = [
        JobType::PreAuthorization,
        JobType::EmbedProviders,
        JobType::EmbedPractices,
    ];

    /// Stable database/wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::PreAuthorization => "pre_authorization",
            JobType::EmbedProviders => "embed_providers",
            JobType::EmbedPractices => "embed_practices",
        }
    }

    /// Position in [`JobType::PRIORITY`] (0 = highest).
    pub fn priority_rank(&self) -> usize {
        match self {
            JobType::PreAuthorization => 0,
            JobType::EmbedProviders => 1,
            JobType::EmbedPractices => 2,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pre_authorization" => Ok(JobType::PreAuthorization),
            "embed_providers" => Ok(JobType::EmbedProviders),
            "embed_practices" => Ok(JobType::EmbedPractices),
            other => Err(Error::InvalidInput(format!("unknown job type: {}", other))),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Done,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }

    /// Done and Failed never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(JobState::Queued),
            "processing" => Ok(JobState::Processing),
            "done" => Ok(JobState::Done),
            "failed" => Ok(JobState::Failed),
            other => Err(Error::InvalidInput(format!("unknown job state: {}", other))),
        }
    }
}

// =============================================================================
// JOB PAYLOADS
// =============================================================================

/// Typed job payload. The variant determines the job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    PreAuthorization(PreAuthorizationRequest),
    EmbedProviders(CatalogEmbeddingRequest),
    EmbedPractices(CatalogEmbeddingRequest),
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::PreAuthorization(_) => JobType::PreAuthorization,
            JobPayload::EmbedProviders(_) => JobType::EmbedProviders,
            JobPayload::EmbedPractices(_) => JobType::EmbedPractices,
        }
    }

    /// Reject payloads a handler could never process.
    pub fn validate(&self) -> Result<()> {
        match self {
            JobPayload::PreAuthorization(req) => req.validate(),
            JobPayload::EmbedProviders(req) | JobPayload::EmbedPractices(req) => req.validate(),
        }
    }
}

/// Payload of a pre-authorization job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PreAuthorizationRequest {
    /// Structured output of the vision extraction step.
    pub extraction: ExtractionResult,
    /// Health plan to price agreements against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<i32>,
    /// Original file name of the scanned order, kept for traceability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl PreAuthorizationRequest {
    pub fn validate(&self) -> Result<()> {
        if let Some(plan) = self.plan_id {
            if plan <= 0 {
                return Err(Error::InvalidInput(format!("plan_id must be positive, got {}", plan)));
            }
        }
        for (index, practice) in self.extraction.practices.iter().enumerate() {
            if practice.description.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "practice {} has an empty description",
                    index + 1
                )));
            }
            match practice.quantity {
                Some(0) => {
                    return Err(Error::InvalidInput(format!(
                        "practice {} has quantity 0",
                        index + 1
                    )));
                }
                Some(quantity) if i32::try_from(quantity).is_err() => {
                    return Err(Error::InvalidInput(format!(
                        "practice {} quantity {} out of range",
                        index + 1,
                        quantity
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Payload of a catalog embedding job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CatalogEmbeddingRequest {
    /// Catalog ids to (re-)embed.
    pub ids: Vec<i64>,
}

impl CatalogEmbeddingRequest {
    pub fn validate(&self) -> Result<()> {
        if self.ids.is_empty() {
            return Err(Error::InvalidInput(
                "embedding job needs at least one catalog id".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// A persisted background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub batch_id: Uuid,
    pub external_id: Option<String>,
    pub tenant_id: Option<Uuid>,
    pub payload: JobPayload,
    pub state: JobState,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    pub result: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Options accepted by `enqueue`.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub batch_id: Option<Uuid>,
    pub external_id: Option<String>,
    pub tenant_id: Option<Uuid>,
    pub max_attempts: Option<i32>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Effective attempt limit.
    pub fn resolved_max_attempts(&self) -> Result<i32> {
        let max = self.max_attempts.unwrap_or(defaults::JOB_MAX_ATTEMPTS);
        if max < 1 {
            return Err(Error::InvalidInput(format!(
                "max_attempts must be at least 1, got {}",
                max
            )));
        }
        Ok(max)
    }
}

/// Identifiers returned by `enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enqueued {
    pub job_id: Uuid,
    pub batch_id: Uuid,
}

/// Aggregated state of every job sharing a batch id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatus {
    pub batch_id: Uuid,
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub done: usize,
    pub failed: usize,
    /// Jobs in creation order.
    pub jobs: Vec<Job>,
}

impl BatchStatus {
    /// Aggregate a batch from its jobs; `None` when the batch is empty.
    pub fn from_jobs(batch_id: Uuid, mut jobs: Vec<Job>) -> Option<Self> {
        if jobs.is_empty() {
            return None;
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let count = |state: JobState| jobs.iter().filter(|j| j.state == state).count();
        Some(Self {
            batch_id,
            total: jobs.len(),
            queued: count(JobState::Queued),
            processing: count(JobState::Processing),
            done: count(JobState::Done),
            failed: count(JobState::Failed),
            jobs,
        })
    }

    /// True once every job reached Done or Failed.
    pub fn is_finished(&self) -> bool {
        self.done + self.failed == self.total
    }
}

/// Job count for one (type, state) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStateCount {
    pub job_type: JobType,
    pub state: JobState,
    pub count: i64,
}

/// Per type, per state job counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub counts: Vec<JobStateCount>,
}

impl QueueStats {
    pub fn count(&self, job_type: JobType, state: JobState) -> i64 {
        self.counts
            .iter()
            .filter(|c| c.job_type == job_type && c.state == state)
            .map(|c| c.count)
            .sum()
    }

    /// Jobs in `state` across all types.
    pub fn total_in(&self, state: JobState) -> i64 {
        self.counts
            .iter()
            .filter(|c| c.state == state)
            .map(|c| c.count)
            .sum()
    }
}

// =============================================================================
// EXTRACTION RESULT
// =============================================================================

/// Structured data produced by the vision extraction step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionResult {
    pub patient: Option<PatientInfo>,
    pub order: Option<OrderInfo>,
    pub ordering_provider: Option<ProviderRef>,
    pub physician: Option<PhysicianRef>,
    pub diagnosis: Option<Diagnosis>,
    pub practices: Vec<ExtractedPractice>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientInfo {
    pub name: Option<String>,
    pub document_id: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub confidence: Option<f64>,
}

impl PatientInfo {
    pub fn is_identified(&self) -> bool {
        has_text(&self.name) || has_text(&self.document_id)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderInfo {
    pub issued_on: Option<NaiveDate>,
    pub confidence: Option<f64>,
}

/// Provider as written on the order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderRef {
    pub name: Option<String>,
    pub tax_id: Option<String>,
    pub license: Option<String>,
}

impl ProviderRef {
    pub fn is_empty(&self) -> bool {
        !has_text(&self.name) && !has_text(&self.tax_id) && !has_text(&self.license)
    }

    /// Whether two references name the same provider (tax id first, then name).
    pub fn same_as(&self, other: &ProviderRef) -> bool {
        if let (Some(a), Some(b)) = (non_blank(&self.tax_id), non_blank(&other.tax_id)) {
            return a == b;
        }
        match (non_blank(&self.name), non_blank(&other.name)) {
            (Some(a), Some(b)) => crate::similarity::normalize_text(a) == crate::similarity::normalize_text(b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicianRef {
    pub name: Option<String>,
    pub license: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Diagnosis {
    pub description: Option<String>,
    pub code: Option<String>,
}

/// One requested practice as read from the order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedPractice {
    pub description: String,
    pub quantity: Option<u32>,
    /// Provider expected to perform the practice, when the order names one.
    pub executing_provider: Option<ProviderRef>,
    pub confidence: Option<f64>,
}

/// Trimmed, non-empty view of an optional string.
pub fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn has_text(value: &Option<String>) -> bool {
    non_blank(value).is_some()
}

// =============================================================================
// CATALOG
// =============================================================================

/// Which catalog an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    Practice,
    Provider,
}

impl CatalogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogKind::Practice => "practice",
            CatalogKind::Provider => "provider",
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A practice or provider in the reference catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntity {
    pub id: i64,
    pub kind: CatalogKind,
    pub canonical_text: String,
    pub normalized_text: String,
    #[serde(skip)]
    pub embedding: Option<Vector>,
    /// `None` for entries shared by every tenant.
    pub tenant_id: Option<Uuid>,
    pub active: bool,
    // Practice attributes
    pub code: Option<String>,
    pub specialty: Option<String>,
    pub synonyms: Vec<String>,
    // Provider attributes
    pub legal_name: Option<String>,
    pub tax_id: Option<String>,
    pub license: Option<String>,
}

impl CatalogEntity {
    /// New active, unembedded entity with its normalized text derived.
    pub fn new(id: i64, kind: CatalogKind, canonical_text: impl Into<String>) -> Self {
        let canonical_text = canonical_text.into();
        Self {
            id,
            kind,
            normalized_text: crate::similarity::normalize_text(&canonical_text),
            canonical_text,
            embedding: None,
            tenant_id: None,
            active: true,
            code: None,
            specialty: None,
            synonyms: Vec::new(),
            legal_name: None,
            tax_id: None,
            license: None,
        }
    }

    pub fn with_tax_id(mut self, tax_id: impl Into<String>) -> Self {
        self.tax_id = Some(tax_id.into());
        self
    }

    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.license = Some(license.into());
        self
    }

    pub fn with_legal_name(mut self, legal_name: impl Into<String>) -> Self {
        self.legal_name = Some(legal_name.into());
        self
    }

    pub fn with_specialty(mut self, specialty: impl Into<String>) -> Self {
        self.specialty = Some(specialty.into());
        self
    }

    pub fn with_synonyms(mut self, synonyms: Vec<String>) -> Self {
        self.synonyms = synonyms;
        self
    }

    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_embedding(mut self, embedding: Vector) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Visible to `tenant` (global entries are visible to everyone).
    pub fn visible_to(&self, tenant: Option<Uuid>) -> bool {
        match (self.tenant_id, tenant) {
            (None, _) => true,
            (Some(own), Some(requested)) => own == requested,
            (Some(_), None) => false,
        }
    }

    /// Text sent to the embedding provider for this entity.
    pub fn embedding_text(&self) -> String {
        let parts: Vec<&str> = match self.kind {
            CatalogKind::Provider => [
                Some(self.canonical_text.as_str()),
                self.legal_name.as_deref(),
                self.license.as_deref(),
            ]
            .into_iter()
            .flatten()
            .collect(),
            CatalogKind::Practice => {
                let mut parts: Vec<&str> = [self.specialty.as_deref(), Some(self.canonical_text.as_str())]
                    .into_iter()
                    .flatten()
                    .collect();
                parts.extend(self.synonyms.iter().map(String::as_str));
                parts
            }
        };

        parts
            .into_iter()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Raw hit returned by the catalog before scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateHit {
    pub id: i64,
    pub canonical_text: String,
    /// `None` when the entity has no embedding yet (lexical-only match).
    pub vector_similarity: Option<f64>,
    pub lexical_similarity: f64,
}

/// A scored catalog match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub candidate_id: i64,
    pub canonical_text: String,
    pub vector_similarity: f64,
    pub lexical_similarity: f64,
    pub combined_score: f64,
    pub has_agreement: bool,
    pub agreement_id: Option<i64>,
    pub agreement_price: Option<f64>,
}

impl MatchResult {
    /// Exact identifier match; every similarity is 1.0.
    pub fn exact(candidate_id: i64, canonical_text: impl Into<String>) -> Self {
        Self {
            candidate_id,
            canonical_text: canonical_text.into(),
            vector_similarity: 1.0,
            lexical_similarity: 1.0,
            combined_score: 1.0,
            has_agreement: false,
            agreement_id: None,
            agreement_price: None,
        }
    }

    pub fn with_agreement(mut self, agreement: Option<&Agreement>) -> Self {
        self.has_agreement = agreement.is_some();
        self.agreement_id = agreement.map(|a| a.id);
        self.agreement_price = agreement.map(|a| a.price);
        self
    }
}

/// Lightweight reference to a resolved catalog entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: i64,
    pub name: String,
}

impl From<&CatalogEntity> for EntityRef {
    fn from(entity: &CatalogEntity) -> Self {
        Self {
            id: entity.id,
            name: entity.canonical_text.clone(),
        }
    }
}

// =============================================================================
// AGREEMENTS
// =============================================================================

/// Priced contract between a provider and a practice under a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    pub id: i64,
    pub provider_id: i64,
    pub practice_id: i64,
    pub plan_id: i32,
    pub price: f64,
    pub effective_from: NaiveDate,
    pub valid_until: Option<NaiveDate>,
    pub active: bool,
}

impl Agreement {
    /// Active and within its validity window on `day`.
    pub fn is_in_force(&self, day: NaiveDate) -> bool {
        self.active
            && self.effective_from <= day
            && self.valid_until.map_or(true, |until| until >= day)
    }
}

// =============================================================================
// PRE-AUTHORIZATIONS
// =============================================================================

/// Review status of a pre-authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreAuthStatus {
    Pending,
    Approved,
    Rejected,
}

impl PreAuthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreAuthStatus::Pending => "pending",
            PreAuthStatus::Approved => "approved",
            PreAuthStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for PreAuthStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PreAuthStatus::Pending),
            "approved" => Ok(PreAuthStatus::Approved),
            "rejected" => Ok(PreAuthStatus::Rejected),
            other => Err(Error::InvalidInput(format!(
                "unknown pre-authorization status: {}",
                other
            ))),
        }
    }
}

/// One practice line of a pre-authorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// 1-based, dense.
    pub sequence: i32,
    pub original_text: String,
    pub quantity: i32,
    pub suggested_match: Option<MatchResult>,
    pub alternative_matches: Vec<MatchResult>,
    pub has_agreement: bool,
    pub agreement_id: Option<i64>,
    pub agreed_price: Option<f64>,
    pub executing_provider_id: Option<i64>,
    pub note: Option<String>,
    /// Reviewer replacement of the suggested practice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<ItemCorrection>,
}

/// Practice chosen by a reviewer in place of the suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCorrection {
    pub practice_id: i64,
    pub reviewer: String,
    pub reason: String,
    pub corrected_at: DateTime<Utc>,
}

/// Suggested-versus-correct pair recorded for every correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFeedback {
    pub pre_authorization_id: Uuid,
    pub sequence: i32,
    pub original_text: String,
    pub suggested_practice_id: Option<i64>,
    pub corrected_practice_id: i64,
    pub reviewer: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl LineItem {
    /// Score contributed to the overall confidence (0 when unmatched).
    pub fn match_score(&self) -> f64 {
        self.suggested_match
            .as_ref()
            .map(|m| m.combined_score)
            .unwrap_or(0.0)
    }
}

/// Pre-authorization aggregate: header plus ordered line items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreAuthorization {
    pub id: Uuid,
    pub job_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub file_name: Option<String>,
    pub plan_id: i32,
    pub patient: Option<PatientInfo>,
    pub order_date: Option<NaiveDate>,
    pub ordering_provider: Option<MatchResult>,
    pub physician: Option<EntityRef>,
    pub diagnosis: Option<Diagnosis>,
    pub overall_confidence: f64,
    pub requires_review: bool,
    pub status: PreAuthStatus,
    pub observations: String,
    pub warnings: Vec<String>,
    pub items: Vec<LineItem>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PreAuthorization {
    pub fn summary(&self) -> PreAuthSummary {
        PreAuthSummary {
            pre_authorization_id: self.id,
            overall_confidence: self.overall_confidence,
            requires_review: self.requires_review,
            item_count: self.items.len(),
        }
    }

    /// Move out of Pending; any other starting status is a conflict.
    pub fn review(
        &mut self,
        status: PreAuthStatus,
        reviewer: &str,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if self.status != PreAuthStatus::Pending {
            return Err(Error::Conflict(format!(
                "pre-authorization {} is already {}",
                self.id,
                self.status.as_str()
            )));
        }
        if status == PreAuthStatus::Pending {
            return Err(Error::InvalidInput(
                "review must approve or reject".to_string(),
            ));
        }
        self.status = status;
        self.reviewed_by = Some(reviewer.to_string());
        self.reviewed_at = Some(at);
        self.rejection_reason = reason;
        Ok(())
    }

    /// Replace the practice of line `sequence` while still Pending.
    ///
    /// A later correction of the same line overwrites the earlier one; each
    /// produces its own feedback record.
    pub fn correct_item(
        &mut self,
        sequence: i32,
        practice_id: i64,
        reviewer: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<MatchFeedback> {
        if self.status != PreAuthStatus::Pending {
            return Err(Error::Conflict(format!(
                "pre-authorization {} is already {}",
                self.id,
                self.status.as_str()
            )));
        }
        if practice_id <= 0 {
            return Err(Error::InvalidInput(format!(
                "practice id must be positive, got {}",
                practice_id
            )));
        }
        let id = self.id;
        let item = self
            .items
            .iter_mut()
            .find(|item| item.sequence == sequence)
            .ok_or_else(|| {
                Error::NotFound(format!("line {} of pre-authorization {}", sequence, id))
            })?;

        item.correction = Some(ItemCorrection {
            practice_id,
            reviewer: reviewer.to_string(),
            reason: reason.to_string(),
            corrected_at: at,
        });
        Ok(MatchFeedback {
            pre_authorization_id: id,
            sequence,
            original_text: item.original_text.clone(),
            suggested_practice_id: item.suggested_match.as_ref().map(|m| m.candidate_id),
            corrected_practice_id: practice_id,
            reviewer: reviewer.to_string(),
            reason: reason.to_string(),
            created_at: at,
        })
    }
}

/// Result returned to the job queue after generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreAuthSummary {
    pub pre_authorization_id: Uuid,
    pub overall_confidence: f64,
    pub requires_review: bool,
    pub item_count: usize,
}
