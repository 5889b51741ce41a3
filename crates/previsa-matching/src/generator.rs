//! Turns an extraction result into a scored, persisted pre-authorization.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use previsa_core::{
    new_v7, non_blank, EntityRef, ExtractedPractice, ExtractionResult, LineItem, MatchResult,
    PatientInfo, OrderInfo, PreAuthStatus, PreAuthSummary, PreAuthorization,
    Error, PreAuthorizationRepository, PreAuthorizationRequest, ProviderRef, Result,
};

use crate::config::GeneratorConfig;
use crate::engine::MatchingEngine;

const NOTE_NO_CANDIDATES: &str = "no similar practice found";
const NOTE_NO_AGREEMENT: &str = "no agreement with provider";
const WARN_PHYSICIAN_LICENSE: &str = "physician license not found";

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Outcome of [`PreAuthorizationGenerator::generate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Generated {
    /// A new record was stored by this call.
    Created(PreAuthSummary),
    /// The job had already produced this record.
    Existing(PreAuthSummary),
}

impl Generated {
    pub fn summary(&self) -> PreAuthSummary {
        match self {
            Generated::Created(summary) | Generated::Existing(summary) => *summary,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Generated::Created(_))
    }
}

/// Orchestrates matching for every part of an extraction.
pub struct PreAuthorizationGenerator {
    engine: Arc<MatchingEngine>,
    store: Arc<dyn PreAuthorizationRepository>,
    config: GeneratorConfig,
}

impl PreAuthorizationGenerator {
    pub fn new(engine: Arc<MatchingEngine>, store: Arc<dyn PreAuthorizationRepository>) -> Self {
        Self {
            engine,
            store,
            config: GeneratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: GeneratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generate and persist the pre-authorization for a job.
    ///
    /// Re-running a job that already produced a record returns that record's
    /// summary as [`Generated::Existing`] instead of inserting a second one.
    #[instrument(
        skip(self, request),
        fields(subsystem = "matching", component = "generator", op = "generate", job_id = ?job_id)
    )]
    pub async fn generate(
        &self,
        job_id: Option<Uuid>,
        tenant: Option<Uuid>,
        request: &PreAuthorizationRequest,
    ) -> Result<Generated> {
        let start = Instant::now();

        if let Some(job_id) = job_id {
            if let Some(existing) = self.store.find_by_job(job_id).await? {
                info!(
                    pre_authorization_id = %existing.id,
                    "Pre-authorization already generated for job"
                );
                return Ok(Generated::Existing(existing.summary()));
            }
        }

        let auth = self.build(job_id, tenant, request).await?;
        self.store.insert(&auth).await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            pre_authorization_id = %auth.id,
            confidence = auth.overall_confidence,
            requires_review = auth.requires_review,
            item_count = auth.items.len(),
            duration_ms,
            "Pre-authorization generated"
        );
        if duration_ms > 5000 {
            warn!(duration_ms, "Slow pre-authorization generation");
        }
        Ok(Generated::Created(auth.summary()))
    }

    /// Assemble the aggregate without persisting it.
    pub async fn build(
        &self,
        job_id: Option<Uuid>,
        tenant: Option<Uuid>,
        request: &PreAuthorizationRequest,
    ) -> Result<PreAuthorization> {
        request.validate()?;
        let extraction = &request.extraction;
        let plan_id = request.plan_id.unwrap_or(self.config.default_plan_id);
        let mut warnings = extraction.warnings.clone();

        let ordering = match &extraction.ordering_provider {
            Some(provider) => self.resolve_provider(provider, tenant).await?,
            None => None,
        };
        let provider_confidence = ordering.as_ref().map_or(0.0, |m| m.combined_score);

        let (physician, physician_missing) = self.resolve_physician(extraction, tenant).await?;
        if physician_missing {
            warnings.push(WARN_PHYSICIAN_LICENSE.to_string());
        }

        let pricing_provider = ordering
            .as_ref()
            .map(|m| m.candidate_id)
            .or(self.config.default_provider_id);

        let mut items = Vec::with_capacity(extraction.practices.len());
        for (index, practice) in extraction.practices.iter().enumerate() {
            let item = self
                .build_line(
                    index,
                    practice,
                    extraction.ordering_provider.as_ref(),
                    pricing_provider,
                    plan_id,
                    tenant,
                )
                .await?;
            items.push(item);
        }

        let overall_confidence = self.overall_confidence(extraction, provider_confidence, &items);
        let requires_review = overall_confidence < self.config.review_threshold;
        let observations = observations(
            items.len(),
            ordering.as_ref().map(|m| m.canonical_text.as_str()),
            physician_missing,
        );

        debug!(
            item_count = items.len(),
            confidence = overall_confidence,
            requires_review,
            "Assembled pre-authorization"
        );

        Ok(PreAuthorization {
            id: new_v7(),
            job_id,
            tenant_id: tenant,
            file_name: request.file_name.clone(),
            plan_id,
            patient: extraction.patient.clone(),
            order_date: extraction.order.as_ref().and_then(|o| o.issued_on),
            ordering_provider: ordering,
            physician,
            diagnosis: extraction.diagnosis.clone(),
            overall_confidence,
            requires_review,
            status: PreAuthStatus::Pending,
            observations,
            warnings,
            items,
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
            created_at: Utc::now(),
        })
    }

    /// Tax id, then fuzzy name, then exact license.
    async fn resolve_provider(
        &self,
        provider: &ProviderRef,
        tenant: Option<Uuid>,
    ) -> Result<Option<MatchResult>> {
        if provider.is_empty() {
            return Ok(None);
        }
        let name = non_blank(&provider.name).unwrap_or("");
        let matches = self
            .engine
            .find_provider(name, non_blank(&provider.tax_id), tenant)
            .await?;
        if let Some(best) = matches.into_iter().next() {
            return Ok(Some(best));
        }

        match non_blank(&provider.license) {
            Some(license) => Ok(self
                .engine
                .find_provider_by_license(license, tenant)
                .await?
                .map(|p| MatchResult::exact(p.id, p.canonical_text))),
            None => Ok(None),
        }
    }

    /// Physician reference, plus whether a given license went unmatched.
    async fn resolve_physician(
        &self,
        extraction: &ExtractionResult,
        tenant: Option<Uuid>,
    ) -> Result<(Option<EntityRef>, bool)> {
        let license = extraction
            .physician
            .as_ref()
            .and_then(|p| non_blank(&p.license));
        let Some(license) = license else {
            return Ok((None, false));
        };

        match self.engine.find_provider_by_license(license, tenant).await? {
            Some(entity) => Ok((Some(EntityRef::from(&entity)), false)),
            None => {
                debug!("Physician license not in catalog");
                Ok((None, true))
            }
        }
    }

    async fn build_line(
        &self,
        index: usize,
        practice: &ExtractedPractice,
        ordering: Option<&ProviderRef>,
        pricing_provider: Option<i64>,
        plan_id: i32,
        tenant: Option<Uuid>,
    ) -> Result<LineItem> {
        let executing_provider_id = match &practice.executing_provider {
            Some(executing)
                if !executing.is_empty() && !ordering.is_some_and(|o| executing.same_as(o)) =>
            {
                self.resolve_provider(executing, tenant)
                    .await?
                    .map(|m| m.candidate_id)
            }
            _ => None,
        };

        let candidates = self
            .engine
            .find_candidates(&practice.description, self.config.candidate_limit, tenant)
            .await?;

        let ranked = self
            .engine
            .rank_with_agreement_preference(candidates, pricing_provider, plan_id)
            .await?;

        let note = match &ranked.best {
            None => Some(NOTE_NO_CANDIDATES.to_string()),
            Some(best) if !best.has_agreement => Some(NOTE_NO_AGREEMENT.to_string()),
            Some(_) => None,
        };

        Ok(LineItem {
            sequence: index as i32 + 1,
            original_text: practice.description.clone(),
            quantity: line_quantity(index, practice)?,
            has_agreement: ranked.best.as_ref().is_some_and(|b| b.has_agreement),
            agreement_id: ranked.best.as_ref().and_then(|b| b.agreement_id),
            agreed_price: ranked.best.as_ref().and_then(|b| b.agreement_price),
            suggested_match: ranked.best,
            alternative_matches: ranked.alternatives,
            executing_provider_id,
            note,
            correction: None,
        })
    }

    fn overall_confidence(
        &self,
        extraction: &ExtractionResult,
        provider_confidence: f64,
        items: &[LineItem],
    ) -> f64 {
        let presence = self.config.presence_confidence;
        let patient = extraction
            .patient
            .as_ref()
            .map_or(0.0, |p| patient_signal(p, presence));
        let order = extraction
            .order
            .as_ref()
            .map_or(0.0, |o| order_signal(o, presence));
        let scores: Vec<f64> = items.iter().map(LineItem::match_score).collect();

        round2(mean(&[patient, order, provider_confidence, mean(&scores)]))
    }
}

fn line_quantity(index: usize, practice: &ExtractedPractice) -> Result<i32> {
    let quantity = practice.quantity.unwrap_or(1);
    i32::try_from(quantity).map_err(|_| {
        Error::InvalidInput(format!(
            "practice {} quantity {} out of range",
            index + 1,
            quantity
        ))
    })
}

fn patient_signal(patient: &PatientInfo, presence: f64) -> f64 {
    match patient.confidence {
        Some(confidence) => confidence.clamp(0.0, 1.0),
        None if patient.is_identified() => presence,
        None => 0.0,
    }
}

fn order_signal(order: &OrderInfo, presence: f64) -> f64 {
    match order.confidence {
        Some(confidence) => confidence.clamp(0.0, 1.0),
        None if order.issued_on.is_some() => presence,
        None => 0.0,
    }
}

fn observations(item_count: usize, provider: Option<&str>, physician_missing: bool) -> String {
    let mut text = format!("Order processed: {} practice(s).", item_count);
    match provider {
        Some(name) => text.push_str(&format!(" Ordering provider: {}.", name)),
        None => text.push_str(" Ordering provider not identified."),
    }
    if physician_missing {
        text.push_str(" Warning: physician license not found.");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use previsa_core::{Agreement, CatalogEntity, CatalogKind, EmbeddingBackend, PhysicianRef};
    use previsa_db::{
        MemoryAgreementRepository, MemoryCatalogRepository, MemoryPreAuthorizationRepository,
    };
    use previsa_inference::mock::MockEmbeddingBackend;

    const PROVIDER_ID: i64 = 500;
    const PROVIDER_TAX_ID: &str = "30-70000000-1";

    struct Fixture {
        catalog: Arc<MemoryCatalogRepository>,
        agreements: Arc<MemoryAgreementRepository>,
        store: Arc<MemoryPreAuthorizationRepository>,
        embedder: MockEmbeddingBackend,
    }

    impl Fixture {
        async fn new() -> Self {
            let fx = Self {
                catalog: Arc::new(MemoryCatalogRepository::new()),
                agreements: Arc::new(MemoryAgreementRepository::new()),
                store: Arc::new(MemoryPreAuthorizationRepository::new()),
                embedder: MockEmbeddingBackend::new(16),
            };
            fx.catalog
                .upsert(
                    CatalogEntity::new(PROVIDER_ID, CatalogKind::Provider, "Centro Médico Norte")
                        .with_tax_id(PROVIDER_TAX_ID),
                )
                .await;
            fx
        }

        async fn add_practice(&self, id: i64, text: &str) {
            let vector = self.embedder.embed(text).await.unwrap();
            self.catalog
                .upsert(CatalogEntity::new(id, CatalogKind::Practice, text).with_embedding(vector))
                .await;
        }

        async fn add_agreement(&self, id: i64, practice_id: i64, price: f64) {
            self.agreements
                .upsert(Agreement {
                    id,
                    provider_id: PROVIDER_ID,
                    practice_id,
                    plan_id: 1,
                    price,
                    effective_from: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                    valid_until: None,
                    active: true,
                })
                .await;
        }

        fn generator(&self) -> PreAuthorizationGenerator {
            let engine = MatchingEngine::new(
                self.catalog.clone(),
                self.agreements.clone(),
                Arc::new(self.embedder.clone()),
            );
            PreAuthorizationGenerator::new(Arc::new(engine), self.store.clone())
        }
    }

    fn practice(description: &str) -> ExtractedPractice {
        ExtractedPractice {
            description: description.to_string(),
            quantity: None,
            executing_provider: None,
            confidence: None,
        }
    }

    fn ordering_by_tax_id() -> ProviderRef {
        ProviderRef {
            name: Some("C.M. Norte".to_string()),
            tax_id: Some(PROVIDER_TAX_ID.to_string()),
            license: None,
        }
    }

    fn request(extraction: ExtractionResult) -> PreAuthorizationRequest {
        PreAuthorizationRequest {
            extraction,
            plan_id: None,
            file_name: Some("orden.pdf".to_string()),
        }
    }

    // ========== Confidence ==========

    #[tokio::test]
    async fn test_empty_extraction_has_zero_confidence() {
        let fx = Fixture::new().await;
        let auth = fx
            .generator()
            .build(None, None, &request(ExtractionResult::default()))
            .await
            .unwrap();

        assert_eq!(auth.overall_confidence, 0.0);
        assert!(auth.requires_review);
        assert!(auth.items.is_empty());
        assert_eq!(auth.status, PreAuthStatus::Pending);
        assert_eq!(
            auth.observations,
            "Order processed: 0 practice(s). Ordering provider not identified."
        );
    }

    #[tokio::test]
    async fn test_full_confidence_with_exact_matches() {
        let fx = Fixture::new().await;
        fx.add_practice(1, "Hemograma completo").await;
        fx.add_agreement(10, 1, 1200.0).await;

        let extraction = ExtractionResult {
            patient: Some(PatientInfo {
                name: Some("Ana Gómez".to_string()),
                ..Default::default()
            }),
            order: Some(OrderInfo {
                issued_on: NaiveDate::from_ymd_opt(2025, 3, 1),
                confidence: None,
            }),
            ordering_provider: Some(ordering_by_tax_id()),
            practices: vec![practice("Hemograma completo")],
            ..Default::default()
        };

        let auth = fx.generator().build(None, None, &request(extraction)).await.unwrap();

        // mean(0.9, 0.9, 1.0, 1.0)
        assert_eq!(auth.overall_confidence, 0.95);
        assert!(!auth.requires_review);
        assert_eq!(auth.ordering_provider.as_ref().unwrap().candidate_id, PROVIDER_ID);
        let item = &auth.items[0];
        assert_eq!(item.sequence, 1);
        assert_eq!(item.quantity, 1);
        assert!(item.has_agreement);
        assert_eq!(item.agreed_price, Some(1200.0));
        assert_eq!(item.note, None);
        assert!(auth
            .observations
            .contains("Ordering provider: Centro Médico Norte."));
    }

    // ========== Lines ==========

    #[tokio::test]
    async fn test_agreement_preferred_over_higher_score() {
        let fx = Fixture::new().await;
        fx.add_practice(1, "Ecografía abdominal").await;
        fx.add_practice(2, "Ecografía abdominal completa").await;
        fx.add_agreement(20, 2, 900.0).await;

        let extraction = ExtractionResult {
            ordering_provider: Some(ordering_by_tax_id()),
            practices: vec![practice("Ecografía abdominal")],
            ..Default::default()
        };
        let auth = fx.generator().build(None, None, &request(extraction)).await.unwrap();

        let item = &auth.items[0];
        let best = item.suggested_match.as_ref().unwrap();
        assert_eq!(best.candidate_id, 2);
        assert!(item.has_agreement);
        assert_eq!(item.agreement_id, Some(20));
        assert!(item
            .alternative_matches
            .iter()
            .any(|alt| alt.candidate_id == 1 && !alt.has_agreement));
    }

    #[tokio::test]
    async fn test_match_without_agreement_is_noted() {
        let fx = Fixture::new().await;
        fx.add_practice(1, "Resonancia magnética de rodilla").await;

        let extraction = ExtractionResult {
            ordering_provider: Some(ordering_by_tax_id()),
            practices: vec![practice("Resonancia magnética de rodilla")],
            ..Default::default()
        };
        let auth = fx.generator().build(None, None, &request(extraction)).await.unwrap();

        assert!(!auth.items[0].has_agreement);
        assert_eq!(auth.items[0].note.as_deref(), Some("no agreement with provider"));
    }

    #[tokio::test]
    async fn test_empty_catalog_leaves_lines_unmatched() {
        let fx = Fixture::new().await;
        let extraction = ExtractionResult {
            patient: Some(PatientInfo {
                document_id: Some("30111222".to_string()),
                confidence: Some(0.8),
                ..Default::default()
            }),
            practices: vec![practice("Hemograma"), practice("Glucemia")],
            ..Default::default()
        };
        let auth = fx.generator().build(None, None, &request(extraction)).await.unwrap();

        assert_eq!(auth.items.len(), 2);
        assert_eq!(auth.items[1].sequence, 2);
        for item in &auth.items {
            assert!(item.suggested_match.is_none());
            assert!(item.alternative_matches.is_empty());
            assert_eq!(item.note.as_deref(), Some("no similar practice found"));
        }
        // mean(0.8, 0, 0, 0)
        assert_eq!(auth.overall_confidence, 0.2);
        assert!(auth.requires_review);
    }

    #[tokio::test]
    async fn test_executing_provider_is_recorded_but_ordering_provider_prices() {
        let fx = Fixture::new().await;
        fx.add_practice(1, "Tomografía de cerebro").await;
        fx.add_agreement(30, 1, 4000.0).await;
        fx.catalog
            .upsert(
                CatalogEntity::new(600, CatalogKind::Provider, "Laboratorio Central")
                    .with_tax_id("30-70000000-2"),
            )
            .await;
        fx.agreements
            .upsert(Agreement {
                id: 31,
                provider_id: 600,
                practice_id: 1,
                plan_id: 1,
                price: 5000.0,
                effective_from: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                valid_until: None,
                active: true,
            })
            .await;

        let extraction = ExtractionResult {
            ordering_provider: Some(ordering_by_tax_id()),
            practices: vec![ExtractedPractice {
                executing_provider: Some(ProviderRef {
                    name: None,
                    tax_id: Some("30-70000000-2".to_string()),
                    license: None,
                }),
                quantity: Some(2),
                ..practice("Tomografía de cerebro")
            }],
            ..Default::default()
        };
        let auth = fx.generator().build(None, None, &request(extraction)).await.unwrap();

        let item = &auth.items[0];
        assert_eq!(item.executing_provider_id, Some(600));
        assert_eq!(item.quantity, 2);
        assert!(item.has_agreement);
        assert_eq!(item.agreement_id, Some(30));
        assert_eq!(item.agreed_price, Some(4000.0));
        assert_eq!(item.note, None);
    }

    #[tokio::test]
    async fn test_unrelated_executing_name_keeps_ordering_agreement() {
        let mut fx = Fixture::new().await;
        // Far apart, but still the nearest embedded provider.
        fx.embedder = MockEmbeddingBackend::new(16)
            .with_vector("Imagenes XYZ", vec![1.0, 0.0])
            .with_vector("Laboratorio Central", vec![0.2, 0.98]);
        fx.add_practice(1, "Radiografía de tórax").await;
        fx.add_agreement(32, 1, 4000.0).await;
        let unrelated = fx.embedder.embed("Laboratorio Central").await.unwrap();
        fx.catalog
            .upsert(
                CatalogEntity::new(600, CatalogKind::Provider, "Laboratorio Central")
                    .with_embedding(unrelated),
            )
            .await;

        let extraction = ExtractionResult {
            ordering_provider: Some(ordering_by_tax_id()),
            practices: vec![ExtractedPractice {
                executing_provider: Some(ProviderRef {
                    name: Some("Imagenes XYZ".to_string()),
                    tax_id: None,
                    license: None,
                }),
                ..practice("Radiografía de tórax")
            }],
            ..Default::default()
        };
        let auth = fx.generator().build(None, None, &request(extraction)).await.unwrap();

        let item = &auth.items[0];
        assert_eq!(item.executing_provider_id, Some(600));
        assert!(item.has_agreement);
        assert_eq!(item.agreed_price, Some(4000.0));
        assert_eq!(item.note, None);
    }

    #[tokio::test]
    async fn test_default_provider_used_without_ordering_provider() {
        let fx = Fixture::new().await;
        fx.add_practice(1, "Electrocardiograma").await;
        fx.add_agreement(40, 1, 300.0).await;

        let extraction = ExtractionResult {
            practices: vec![practice("Electrocardiograma")],
            ..Default::default()
        };
        let generator = fx
            .generator()
            .with_config(GeneratorConfig::default().with_default_provider(PROVIDER_ID));
        let auth = generator.build(None, None, &request(extraction)).await.unwrap();

        assert!(auth.ordering_provider.is_none());
        assert!(auth.items[0].has_agreement);
    }

    // ========== Physician ==========

    #[tokio::test]
    async fn test_unknown_physician_license_warns() {
        let fx = Fixture::new().await;
        let extraction = ExtractionResult {
            physician: Some(PhysicianRef {
                name: Some("Dr. House".to_string()),
                license: Some("MP 0000".to_string()),
            }),
            warnings: vec!["page 2 unreadable".to_string()],
            ..Default::default()
        };
        let auth = fx.generator().build(None, None, &request(extraction)).await.unwrap();

        assert!(auth.physician.is_none());
        assert_eq!(
            auth.warnings,
            vec![
                "page 2 unreadable".to_string(),
                "physician license not found".to_string()
            ]
        );
        assert!(auth
            .observations
            .ends_with("Warning: physician license not found."));
    }

    #[tokio::test]
    async fn test_known_physician_license() {
        let fx = Fixture::new().await;
        fx.catalog
            .upsert(CatalogEntity::new(700, CatalogKind::Provider, "Dra. Ruiz").with_license("MN 555"))
            .await;
        let extraction = ExtractionResult {
            physician: Some(PhysicianRef {
                name: None,
                license: Some("MN 555".to_string()),
            }),
            ..Default::default()
        };
        let auth = fx.generator().build(None, None, &request(extraction)).await.unwrap();

        assert_eq!(auth.physician.map(|p| p.id), Some(700));
        assert!(auth.warnings.is_empty());
    }

    // ========== Persistence ==========

    #[tokio::test]
    async fn test_generate_persists_and_is_idempotent_per_job() {
        let fx = Fixture::new().await;
        fx.add_practice(1, "Hemograma completo").await;
        let job_id = Uuid::new_v4();
        let extraction = ExtractionResult {
            practices: vec![practice("Hemograma completo")],
            ..Default::default()
        };
        let generator = fx.generator();

        let first = generator
            .generate(Some(job_id), None, &request(extraction.clone()))
            .await
            .unwrap();
        let second = generator
            .generate(Some(job_id), None, &request(extraction))
            .await
            .unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.summary(), second.summary());
        assert_eq!(first.summary().item_count, 1);
        assert_eq!(fx.store.count().await, 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_aborts_generation() {
        let fx = Fixture::new().await;
        let engine = MatchingEngine::new(
            fx.catalog.clone(),
            fx.agreements.clone(),
            Arc::new(MockEmbeddingBackend::new(16).failing()),
        );
        let generator = PreAuthorizationGenerator::new(Arc::new(engine), fx.store.clone());
        let extraction = ExtractionResult {
            practices: vec![practice("Hemograma")],
            ..Default::default()
        };

        let result = generator.generate(None, None, &request(extraction)).await;
        assert!(matches!(result, Err(Error::Embedding(_))));
        assert_eq!(fx.store.count().await, 0);
    }
}
