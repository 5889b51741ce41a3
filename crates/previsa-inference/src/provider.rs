//! Embedding provider selection.
//!
//! `EMBEDDING_PROVIDER` picks the backend (`openai` by default, `ollama`
//! accepted); the chosen backend reads its own variables. The result is
//! always wrapped in a [`CachedEmbedder`] sized by `EMBEDDING_CACHE_SIZE`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use previsa_core::defaults::EMBED_CACHE_CAPACITY;
use previsa_core::{EmbeddingBackend, Error, Result};

use crate::cache::CachedEmbedder;

/// Supported embedding providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingProvider {
    /// Any OpenAI-compatible `/embeddings` endpoint.
    #[default]
    OpenAI,
    Ollama,
}

impl EmbeddingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Ollama => "ollama",
        }
    }
}

impl fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            other => Err(Error::Config(format!(
                "unknown EMBEDDING_PROVIDER '{}' (expected openai or ollama)",
                other
            ))),
        }
    }
}

/// Provider choice plus cache sizing.
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub cache_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            cache_size: EMBED_CACHE_CAPACITY,
        }
    }
}

impl EmbeddingSettings {
    /// Read `EMBEDDING_PROVIDER` and `EMBEDDING_CACHE_SIZE`.
    pub fn from_env() -> Result<Self> {
        let provider = match std::env::var("EMBEDDING_PROVIDER") {
            Ok(value) => value.parse()?,
            Err(_) => EmbeddingProvider::default(),
        };
        let cache_size = std::env::var("EMBEDDING_CACHE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(EMBED_CACHE_CAPACITY);

        Ok(Self {
            provider,
            cache_size,
        })
    }

    pub fn with_provider(mut self, provider: EmbeddingProvider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }
}

/// Build the uncached backend selected by `settings`, configured from the
/// environment.
pub fn backend_from_env(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbeddingBackend>> {
    match settings.provider {
        #[cfg(feature = "openai")]
        EmbeddingProvider::OpenAI => Ok(Arc::new(crate::openai::OpenAIBackend::from_env()?)),
        #[cfg(feature = "ollama")]
        EmbeddingProvider::Ollama => Ok(Arc::new(crate::ollama::OllamaBackend::from_env()?)),
        #[allow(unreachable_patterns)]
        other => Err(Error::Config(format!(
            "embedding provider '{}' is not compiled in",
            other
        ))),
    }
}

/// Build the cached embedder used by the worker.
pub fn embedder_from_env() -> Result<Arc<CachedEmbedder>> {
    let settings = EmbeddingSettings::from_env()?;
    let backend = backend_from_env(&settings)?;

    info!(
        subsystem = "inference",
        component = "provider",
        provider = %settings.provider,
        model = backend.model_name(),
        dimension = backend.dimension(),
        cache_size = settings.cache_size,
        "Embedding provider selected"
    );

    Ok(Arc::new(CachedEmbedder::with_capacity(
        backend,
        settings.cache_size,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("openai".parse::<EmbeddingProvider>().unwrap(), EmbeddingProvider::OpenAI);
        assert_eq!(" Ollama ".parse::<EmbeddingProvider>().unwrap(), EmbeddingProvider::Ollama);
        assert_eq!("".parse::<EmbeddingProvider>().unwrap(), EmbeddingProvider::OpenAI);
        assert!(matches!(
            "cohere".parse::<EmbeddingProvider>(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_settings_builders() {
        let settings = EmbeddingSettings::default()
            .with_provider(EmbeddingProvider::Ollama)
            .with_cache_size(10);
        assert_eq!(settings.provider, EmbeddingProvider::Ollama);
        assert_eq!(settings.cache_size, 10);
    }

    #[test]
    fn test_default_settings() {
        let settings = EmbeddingSettings::default();
        assert_eq!(settings.provider, EmbeddingProvider::OpenAI);
        assert_eq!(settings.cache_size, 500);
    }
}
