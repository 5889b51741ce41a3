//! OpenAI-compatible embedding backend.
//!
//! Works with any endpoint that implements `POST /embeddings`: OpenAI,
//! Azure OpenAI, vLLM, LocalAI, LM Studio, or Ollama in compatibility mode.
//!
//! # Example
//!
//! ```rust,no_run
//! use previsa_inference::openai::{OpenAIBackend, OpenAIConfig};
//! use previsa_core::EmbeddingBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAIBackend::new(OpenAIConfig {
//!         base_url: "http://localhost:11434/v1".to_string(),
//!         embed_model: "nomic-embed-text".to_string(),
//!         embed_dimension: 768,
//!         ..Default::default()
//!     })
//!     .unwrap();
//!
//!     let vectors = backend.embed_texts(&["Radiografía de tórax".to_string()]).await.unwrap();
//!     assert_eq!(vectors.len(), 1);
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{
    OpenAIBackend, OpenAIConfig, DEFAULT_DIMENSION, DEFAULT_EMBED_MODEL, DEFAULT_OPENAI_URL,
    DEFAULT_TIMEOUT_SECS,
};
pub use error::{to_previsa_error, OpenAIErrorCode};
pub use types::{EmbeddingRequest, EmbeddingResponse, ProviderErrorBody, ProviderErrorDetail};
