//! # previsa-matching
//!
//! Hybrid practice/provider matching and pre-authorization generation.
//!
//! [`MatchingEngine`] scores catalog candidates by combining vector cosine
//! similarity with trigram similarity and prefers candidates covered by a
//! provider agreement. [`PreAuthorizationGenerator`] runs the engine over an
//! extraction result, scores the overall confidence and persists the
//! aggregate.

pub mod config;
pub mod engine;
pub mod generator;

pub use config::{GeneratorConfig, MatchingConfig};
pub use engine::{MatchingEngine, Ranked};
pub use generator::{Generated, PreAuthorizationGenerator};
