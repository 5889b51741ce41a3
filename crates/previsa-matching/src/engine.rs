//! Hybrid matching of free text against the practice/provider catalog.
//!
//! Candidates come from the catalog's union of vector nearest neighbours and
//! trigram matches. Each hit is scored as
//! `vector_weight * cosine + lexical_weight * trigram` (0.7 / 0.3 by default);
//! entities without an embedding contribute a vector similarity of 0.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use previsa_core::similarity::{clamp_unit, weighted_score};
use previsa_core::{
    normalize_text, Agreement, AgreementRepository, CandidateHit, CatalogEntity,
    CatalogKind, CatalogRepository, EmbeddingBackend, Error, MatchResult, Result,
};

use crate::config::MatchingConfig;

/// Suggested match plus ranked alternatives for one line item.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ranked {
    pub best: Option<MatchResult>,
    pub alternatives: Vec<MatchResult>,
}

/// Descending by combined score, ties broken by ascending id.
fn by_score(a: &MatchResult, b: &MatchResult) -> Ordering {
    b.combined_score
        .partial_cmp(&a.combined_score)
        .unwrap_or(Ordering::Equal)
        .then(a.candidate_id.cmp(&b.candidate_id))
}

/// Matching engine over a catalog, an agreement table and an embedder.
pub struct MatchingEngine {
    catalog: Arc<dyn CatalogRepository>,
    agreements: Arc<dyn AgreementRepository>,
    embedder: Arc<dyn EmbeddingBackend>,
    config: MatchingConfig,
}

impl MatchingEngine {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        agreements: Arc<dyn AgreementRepository>,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        Self {
            catalog,
            agreements,
            embedder,
            config: MatchingConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MatchingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Score a raw catalog hit.
    pub fn score(&self, hit: CandidateHit) -> MatchResult {
        let vector = clamp_unit(hit.vector_similarity.unwrap_or(0.0));
        let lexical = clamp_unit(hit.lexical_similarity);
        MatchResult {
            candidate_id: hit.id,
            canonical_text: hit.canonical_text,
            vector_similarity: vector,
            lexical_similarity: lexical,
            combined_score: weighted_score(
                vector,
                lexical,
                self.config.vector_weight,
                self.config.lexical_weight,
            ),
            has_agreement: false,
            agreement_id: None,
            agreement_price: None,
        }
    }

    async fn hybrid_search(
        &self,
        kind: CatalogKind,
        text: &str,
        k: usize,
        tenant: Option<Uuid>,
    ) -> Result<Vec<MatchResult>> {
        let start = Instant::now();
        let normalized = normalize_text(text);
        let vector = self.embedder.embed(text.trim()).await?;

        let hits = self
            .catalog
            .search(kind, &vector, &normalized, k, tenant)
            .await?;
        let hit_count = hits.len();

        let mut results: Vec<MatchResult> = hits.into_iter().map(|h| self.score(h)).collect();
        results.sort_by(by_score);
        results.dedup_by_key(|r| r.candidate_id);
        results.truncate(k);

        for r in &results {
            trace!(
                id = r.candidate_id,
                vector = r.vector_similarity,
                lexical = r.lexical_similarity,
                score = r.combined_score,
                "Scored candidate"
            );
        }
        debug!(
            catalog_kind = %kind,
            input_count = hit_count,
            result_count = results.len(),
            top_score = results.first().map(|r| r.combined_score),
            duration_ms = start.elapsed().as_millis() as u64,
            "Hybrid search complete"
        );
        Ok(results)
    }

    /// Up to `k` practices for `text`, best first.
    ///
    /// Blank text or `k == 0` is a caller error.
    #[instrument(skip(self, text), fields(subsystem = "matching", component = "engine", op = "find_candidates"))]
    pub async fn find_candidates(
        &self,
        text: &str,
        k: usize,
        tenant: Option<Uuid>,
    ) -> Result<Vec<MatchResult>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput(
                "cannot match an empty practice description".to_string(),
            ));
        }
        if k == 0 {
            return Err(Error::InvalidInput("candidate limit must be at least 1".to_string()));
        }
        self.hybrid_search(CatalogKind::Practice, text, k, tenant).await
    }

    /// Resolve a provider by tax id, falling back to a fuzzy name search.
    ///
    /// An exact tax-id hit returns that single provider with every score at
    /// 1.0 and skips the embedder. A blank name with no tax-id hit yields no
    /// results.
    #[instrument(skip(self, name, tax_id), fields(subsystem = "matching", component = "engine", op = "find_provider"))]
    pub async fn find_provider(
        &self,
        name: &str,
        tax_id: Option<&str>,
        tenant: Option<Uuid>,
    ) -> Result<Vec<MatchResult>> {
        if let Some(tax_id) = tax_id.map(str::trim).filter(|t| !t.is_empty()) {
            if let Some(provider) = self.catalog.find_provider_by_tax_id(tax_id, tenant).await? {
                debug!(provider_id = provider.id, "Provider resolved by tax id");
                return Ok(vec![MatchResult::exact(provider.id, provider.canonical_text)]);
            }
            debug!("Tax id not in catalog, falling back to name search");
        }

        if name.trim().is_empty() {
            return Ok(vec![]);
        }
        self.hybrid_search(
            CatalogKind::Provider,
            name,
            self.config.provider_candidate_limit,
            tenant,
        )
        .await
    }

    /// Exact license lookup; no fuzzy fallback.
    pub async fn find_provider_by_license(
        &self,
        license: &str,
        tenant: Option<Uuid>,
    ) -> Result<Option<CatalogEntity>> {
        let license = license.trim();
        if license.is_empty() {
            return Ok(None);
        }
        self.catalog.find_provider_by_license(license, tenant).await
    }

    /// Agreement in force today for the triple, latest effective date first.
    pub async fn resolve_agreement(
        &self,
        provider_id: i64,
        practice_id: i64,
        plan_id: i32,
    ) -> Result<Option<Agreement>> {
        self.resolve_agreement_on(provider_id, practice_id, plan_id, Utc::now().date_naive())
            .await
    }

    /// Agreement in force on `day` for the triple.
    pub async fn resolve_agreement_on(
        &self,
        provider_id: i64,
        practice_id: i64,
        plan_id: i32,
        day: NaiveDate,
    ) -> Result<Option<Agreement>> {
        self.agreements
            .find_in_force(provider_id, practice_id, plan_id, day)
            .await
    }

    /// Pick the suggested match, preferring candidates under agreement.
    ///
    /// Every candidate is annotated with its agreement for `provider_id`
    /// (none when no provider is known). The best candidate is the
    /// highest-scored one with an agreement, else the highest-scored overall;
    /// the rest follow in score order, capped at `max_alternatives`.
    #[instrument(skip(self, candidates), fields(subsystem = "matching", component = "engine", op = "rank", input_count = candidates.len()))]
    pub async fn rank_with_agreement_preference(
        &self,
        candidates: Vec<MatchResult>,
        provider_id: Option<i64>,
        plan_id: i32,
    ) -> Result<Ranked> {
        if candidates.is_empty() {
            return Ok(Ranked::default());
        }

        let today = Utc::now().date_naive();
        let mut annotated = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let agreement = match provider_id {
                Some(provider) => {
                    self.resolve_agreement_on(provider, candidate.candidate_id, plan_id, today)
                        .await?
                }
                None => None,
            };
            annotated.push(candidate.with_agreement(agreement.as_ref()));
        }
        annotated.sort_by(by_score);

        let best_index = annotated.iter().position(|c| c.has_agreement).unwrap_or(0);
        let best = annotated.remove(best_index);
        annotated.truncate(self.config.max_alternatives);

        debug!(
            best_id = best.candidate_id,
            best_score = best.combined_score,
            has_agreement = best.has_agreement,
            alternatives = annotated.len(),
            "Ranked candidates"
        );
        Ok(Ranked {
            best: Some(best),
            alternatives: annotated,
        })
    }
}
