//! Matching and generation settings.

use previsa_core::defaults::{
    DEFAULT_PLAN_ID, LEXICAL_WEIGHT, MAX_ALTERNATIVES, PRACTICE_CANDIDATE_LIMIT,
    PRESENCE_CONFIDENCE, PROVIDER_CANDIDATE_LIMIT, REVIEW_THRESHOLD, VECTOR_WEIGHT,
};

/// Scoring weights and result limits of the matching engine.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfig {
    /// Weight of cosine similarity in the combined score.
    pub vector_weight: f64,
    /// Weight of trigram similarity in the combined score.
    pub lexical_weight: f64,
    /// Results returned by a fuzzy provider search.
    pub provider_candidate_limit: usize,
    /// Alternatives kept next to the suggested match.
    pub max_alternatives: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            vector_weight: VECTOR_WEIGHT,
            lexical_weight: LEXICAL_WEIGHT,
            provider_candidate_limit: PROVIDER_CANDIDATE_LIMIT,
            max_alternatives: MAX_ALTERNATIVES,
        }
    }
}

impl MatchingConfig {
    pub fn with_weights(vector_weight: f64, lexical_weight: f64) -> Self {
        Self {
            vector_weight,
            lexical_weight,
            ..Default::default()
        }
    }

    pub fn with_max_alternatives(mut self, max_alternatives: usize) -> Self {
        self.max_alternatives = max_alternatives;
        self
    }

    pub fn with_provider_candidate_limit(mut self, limit: usize) -> Self {
        self.provider_candidate_limit = limit.max(1);
        self
    }
}

/// Settings of the pre-authorization generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// Provider whose agreements price lines when the order names none.
    pub default_provider_id: Option<i64>,
    /// Plan used when the request does not name one.
    pub default_plan_id: i32,
    /// Candidates requested per line item.
    pub candidate_limit: usize,
    /// Aggregates below this confidence require human review.
    pub review_threshold: f64,
    /// Signal assumed for a present header section without its own confidence.
    pub presence_confidence: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            default_provider_id: None,
            default_plan_id: DEFAULT_PLAN_ID,
            candidate_limit: PRACTICE_CANDIDATE_LIMIT,
            review_threshold: REVIEW_THRESHOLD,
            presence_confidence: PRESENCE_CONFIDENCE,
        }
    }
}

impl GeneratorConfig {
    /// Read overrides from the environment.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DEFAULT_PROVIDER_ID` | unset | Fallback provider for agreement lookup |
    /// | `DEFAULT_PLAN_ID` | `1` | Plan used when a request names none |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_provider_id: std::env::var("DEFAULT_PROVIDER_ID")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            default_plan_id: std::env::var("DEFAULT_PLAN_ID")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .filter(|plan: &i32| *plan > 0)
                .unwrap_or(defaults.default_plan_id),
            ..defaults
        }
    }

    pub fn with_default_provider(mut self, provider_id: i64) -> Self {
        self.default_provider_id = Some(provider_id);
        self
    }

    pub fn with_default_plan(mut self, plan_id: i32) -> Self {
        self.default_plan_id = plan_id;
        self
    }

    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_defaults() {
        let config = MatchingConfig::default();
        assert_eq!(config.vector_weight, 0.7);
        assert_eq!(config.lexical_weight, 0.3);
        assert_eq!(config.provider_candidate_limit, 5);
        assert_eq!(config.max_alternatives, 5);
    }

    #[test]
    fn test_generator_defaults() {
        let config = GeneratorConfig::default();
        assert_eq!(config.default_provider_id, None);
        assert_eq!(config.default_plan_id, 1);
        assert_eq!(config.candidate_limit, 10);
        assert_eq!(config.review_threshold, 0.85);
    }

    #[test]
    fn test_generator_builders() {
        let config = GeneratorConfig::default()
            .with_default_provider(42)
            .with_default_plan(3)
            .with_candidate_limit(0);
        assert_eq!(config.default_provider_id, Some(42));
        assert_eq!(config.default_plan_id, 3);
        assert_eq!(config.candidate_limit, 1);
    }
}
