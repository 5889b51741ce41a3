//! In-process LRU cache in front of an embedding backend.
//!
//! Line item descriptions repeat heavily across orders ("hemograma",
//! "rx torax"), so the generator embeds through this wrapper. Keys are the
//! trimmed, lowercased, whitespace-collapsed text; misses are sent to the
//! inner backend in chunks of at most `batch_size` texts.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use previsa_core::defaults::{EMBED_BATCH_SIZE, EMBED_CACHE_CAPACITY};
use previsa_core::{EmbeddingBackend, Error, Result, Vector};

/// Hit/miss counters for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Embedding backend decorator with an LRU cache.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingBackend>,
    cache: Mutex<LruCache<String, Vector>>,
    batch_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

fn cache_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl CachedEmbedder {
    /// Wrap `inner` with the default capacity and batch size.
    pub fn new(inner: Arc<dyn EmbeddingBackend>) -> Self {
        Self::with_capacity(inner, EMBED_CACHE_CAPACITY)
    }

    /// Wrap `inner` keeping at most `capacity` vectors (minimum 1).
    pub fn with_capacity(inner: Arc<dyn EmbeddingBackend>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            batch_size: EMBED_BATCH_SIZE,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cap the number of texts per provider request (minimum 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }
}

#[async_trait]
impl EmbeddingBackend for CachedEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let keys: Vec<String> = texts.iter().map(|t| cache_key(t)).collect();
        let mut found: HashMap<String, Vector> = HashMap::new();
        let mut missing: Vec<(String, String)> = Vec::new();

        {
            let mut cache = self.cache.lock().await;
            for (key, text) in keys.iter().zip(texts) {
                if found.contains_key(key) || missing.iter().any(|(k, _)| k == key) {
                    continue;
                }
                match cache.get(key) {
                    Some(vector) => {
                        found.insert(key.clone(), vector.clone());
                    }
                    None => missing.push((key.clone(), text.clone())),
                }
            }
        }

        let hits = found.len() as u64;
        self.hits.fetch_add(hits, Ordering::Relaxed);
        self.misses.fetch_add(missing.len() as u64, Ordering::Relaxed);
        trace!(hits, misses = missing.len(), "Embedding cache lookup");

        for chunk in missing.chunks(self.batch_size) {
            let batch: Vec<String> = chunk.iter().map(|(_, text)| text.clone()).collect();
            let vectors = self.inner.embed_texts(&batch).await?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "Provider returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                )));
            }

            let mut cache = self.cache.lock().await;
            for ((key, _), vector) in chunk.iter().zip(vectors) {
                cache.put(key.clone(), vector.clone());
                found.insert(key.clone(), vector);
            }
            debug!(input_count = batch.len(), "Embedded cache misses");
        }

        keys.iter()
            .map(|key| {
                found
                    .get(key)
                    .cloned()
                    .ok_or_else(|| Error::Internal(format!("missing embedding for '{}'", key)))
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEmbeddingBackend;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cache_key_normalizes_case_and_spacing() {
        assert_eq!(cache_key("  Rx   TORAX \n"), "rx torax");
    }

    #[tokio::test]
    async fn test_repeated_text_hits_cache() {
        let mock = Arc::new(MockEmbeddingBackend::new(8));
        let cached = CachedEmbedder::new(mock.clone());

        let first = cached.embed_texts(&texts(&["Hemograma"])).await.unwrap();
        let second = cached.embed_texts(&texts(&["  hemograma "])).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(mock.embedded_texts(), 1);
        assert_eq!(cached.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[tokio::test]
    async fn test_output_order_and_duplicates() {
        let mock = Arc::new(MockEmbeddingBackend::new(8));
        let cached = CachedEmbedder::new(mock.clone());

        let out = cached
            .embed_texts(&texts(&["a", "b", "a"]))
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], out[2]);
        assert_ne!(out[0], out[1]);
        assert_eq!(mock.embedded_texts(), 2);
    }

    #[tokio::test]
    async fn test_misses_are_chunked() {
        let mock = Arc::new(MockEmbeddingBackend::new(4));
        let cached = CachedEmbedder::new(mock.clone()).with_batch_size(2);

        cached
            .embed_texts(&texts(&["a", "b", "c", "d", "e"]))
            .await
            .unwrap();
        assert_eq!(mock.batch_sizes(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let mock = Arc::new(MockEmbeddingBackend::new(4));
        let cached = CachedEmbedder::with_capacity(mock.clone(), 1);

        cached.embed_texts(&texts(&["a"])).await.unwrap();
        cached.embed_texts(&texts(&["b"])).await.unwrap();
        cached.embed_texts(&texts(&["a"])).await.unwrap();

        assert_eq!(cached.len().await, 1);
        assert_eq!(mock.embedded_texts(), 3);
    }

    #[tokio::test]
    async fn test_inner_failure_is_not_cached() {
        let mock = Arc::new(MockEmbeddingBackend::new(4).failing());
        let cached = CachedEmbedder::new(mock.clone());

        assert!(cached.embed_texts(&texts(&["a"])).await.is_err());
        assert!(cached.is_empty().await);
    }
}
