//! # previsa-core
//!
//! Core types, traits, and scoring primitives for the previsa
//! pre-authorization pipeline.
//!
//! This crate provides the data model (jobs, catalog entities, agreements,
//! pre-authorization aggregates), the repository and backend traits the other
//! crates implement, and the pure similarity functions shared by the
//! database layer and the matching engine.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod similarity;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use similarity::{combined_score, cosine_similarity, normalize_text, trigram_similarity};
pub use traits::*;
pub use uuid_utils::{extract_timestamp, is_v7, new_v7};

/// Dense embedding vector (shared with pgvector).
pub use pgvector::Vector;
