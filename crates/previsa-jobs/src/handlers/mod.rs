//! Handlers for each job type.

mod catalog_embedding;
mod pre_authorization;

pub use catalog_embedding::CatalogEmbeddingHandler;
pub use pre_authorization::{PreAuthorizationHandler, EVENT_FAILED, EVENT_GENERATED};
