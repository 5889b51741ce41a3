//! # previsa-inference
//!
//! Embedding provider backends for previsa.
//!
//! This crate provides:
//! - OpenAI-compatible implementation (feature `openai`, default)
//! - Ollama implementation (feature `ollama`, default)
//! - An LRU cache wrapper that batches misses
//! - Environment-driven provider selection
//! - A deterministic mock backend (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use previsa_inference::embedder_from_env;
//! use previsa_core::EmbeddingBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let embedder = embedder_from_env().unwrap();
//!     let vector = embedder.embed("Radiografía de tórax frente").await.unwrap();
//!     println!("{} dimensions", vector.as_slice().len());
//! }
//! ```

pub mod cache;
pub mod provider;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use previsa_core::*;

pub use cache::{CacheStats, CachedEmbedder};
pub use provider::{backend_from_env, embedder_from_env, EmbeddingProvider, EmbeddingSettings};

#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;

#[cfg(feature = "openai")]
pub use openai::{OpenAIBackend, OpenAIConfig};
