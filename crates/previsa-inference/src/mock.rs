//! Deterministic embedding backend for tests.
//!
//! The same text always produces the same unit vector, so identical catalog
//! and query texts have cosine similarity 1.0. Specific texts can be pinned to
//! hand-written vectors to control similarities exactly.
//!
//! ```rust,ignore
//! use previsa_inference::mock::MockEmbeddingBackend;
//!
//! let backend = MockEmbeddingBackend::new(16).with_vector("rx torax", vec![1.0]);
//! let v = backend.embed("hemograma").await?;
//! assert_eq!(v.as_slice().len(), 16);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use previsa_core::{EmbeddingBackend, Error, Result, Vector};

/// Mock embedding backend.
#[derive(Clone)]
pub struct MockEmbeddingBackend {
    dimension: usize,
    fixed: Arc<HashMap<String, Vec<f32>>>,
    latency_ms: u64,
    failure_rate: f64,
    calls: Arc<Mutex<Vec<usize>>>,
}

impl MockEmbeddingBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            fixed: Arc::new(HashMap::new()),
            latency_ms: 0,
            failure_rate: 0.0,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Return `vector` (normalized) whenever exactly `text` is embedded.
    pub fn with_vector(mut self, text: impl Into<String>, mut vector: Vec<f32>) -> Self {
        vector.resize(self.dimension, 0.0);
        MockEmbeddingGenerator::normalize(&mut vector);
        Arc::make_mut(&mut self.fixed).insert(text.into(), vector);
        self
    }

    /// Set simulated latency for every request.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set failure rate (0.0 - 1.0) for testing error handling.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Fail every request.
    pub fn failing(self) -> Self {
        self.with_failure_rate(1.0)
    }

    fn calls(&self) -> MutexGuard<'_, Vec<usize>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of `embed_texts` requests received.
    pub fn request_count(&self) -> usize {
        self.calls().len()
    }

    /// Size of every request received, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls().clone()
    }

    /// Total texts embedded across all requests.
    pub fn embedded_texts(&self) -> usize {
        self.calls().iter().sum()
    }

    fn should_fail(&self) -> bool {
        use rand::Rng;
        self.failure_rate > 0.0 && rand::thread_rng().gen::<f64>() < self.failure_rate
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        self.calls().push(texts.len());

        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }
        if self.should_fail() {
            return Err(Error::Embedding("simulated provider failure".to_string()));
        }

        Ok(texts
            .iter()
            .map(|text| {
                let values = self
                    .fixed
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| MockEmbeddingGenerator::generate(text, self.dimension));
                Vector::from(values)
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

/// Mock embedding generator with deterministic output.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    /// Deterministic unit vector from character codes and positions.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension.max(1)];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % vec.len();
            vec[idx] += 0.1;
        }
        Self::normalize(&mut vec);
        vec
    }

    pub fn normalize(vec: &mut [f32]) {
        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for x in vec.iter_mut() {
                *x /= magnitude;
            }
        }
    }
}
