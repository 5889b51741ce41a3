//! # previsa-jobs
//!
//! Durable background job queue for previsa.
//!
//! This crate provides:
//! - A queue persisted through [`JobRepository`] with a fixed global
//!   concurrency cap and per-type priority
//! - Bounded retries with exponential backoff and crash recovery on start
//! - Queue events via a broadcast channel
//! - Handlers for pre-authorization generation and catalog embedding
//! - Webhook notification of job outcomes
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use previsa_jobs::{JobQueue, QueueBuilder, QueueConfig, PreAuthorizationHandler};
//!
//! let queue = QueueBuilder::new(Arc::new(db.jobs.clone()))
//!     .with_config(QueueConfig::from_env())
//!     .with_handler(PreAuthorizationHandler::new(generator, notifier))
//!     .build()?;
//!
//! queue.start().await?;
//! let enqueued = queue.enqueue(payload, EnqueueOptions::new()).await?;
//!
//! // Graceful shutdown
//! queue.shutdown().await;
//! ```

pub mod handler;
pub mod handlers;
pub mod notifier;
pub mod queue;

// Re-export core types
pub use previsa_core::*;

pub use handler::{JobContext, JobHandler, JobResult};
pub use handlers::{CatalogEmbeddingHandler, PreAuthorizationHandler};
pub use notifier::{NoopNotifier, WebhookNotifier};
pub use queue::{backoff_delay, JobQueue, QueueBuilder, QueueConfig, QueueEvent};
