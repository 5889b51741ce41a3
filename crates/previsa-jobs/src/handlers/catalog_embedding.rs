//! (Re-)embeds catalog entries listed in a job payload.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, instrument};

use previsa_core::defaults::EMBED_BATCH_SIZE;
use previsa_core::{
    normalize_text, CatalogKind, CatalogRepository, EmbeddingBackend, JobPayload, JobType, Result,
};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Embedding handler for one catalog kind.
///
/// Register one instance for practices and one for providers.
pub struct CatalogEmbeddingHandler {
    kind: CatalogKind,
    catalog: Arc<dyn CatalogRepository>,
    embedder: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Progress {
    processed: usize,
    embedded: usize,
}

impl CatalogEmbeddingHandler {
    pub fn new(
        kind: CatalogKind,
        catalog: Arc<dyn CatalogRepository>,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        Self {
            kind,
            catalog,
            embedder,
            batch_size: EMBED_BATCH_SIZE,
        }
    }

    pub fn practices(catalog: Arc<dyn CatalogRepository>, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        Self::new(CatalogKind::Practice, catalog, embedder)
    }

    pub fn providers(catalog: Arc<dyn CatalogRepository>, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        Self::new(CatalogKind::Provider, catalog, embedder)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn embed_ids(&self, ids: &[i64]) -> Result<Progress> {
        let mut progress = Progress::default();

        for chunk in ids.chunks(self.batch_size) {
            let entities = self.catalog.get_many(self.kind, chunk).await?;
            progress.processed += entities.len();

            let mut pending = Vec::with_capacity(entities.len());
            let mut texts = Vec::with_capacity(entities.len());
            for entity in &entities {
                let text = entity.embedding_text();
                if text.is_empty() {
                    debug!(id = entity.id, "Skipping entity without text");
                    continue;
                }
                pending.push(entity);
                texts.push(text);
            }
            if texts.is_empty() {
                continue;
            }

            let vectors = self.embedder.embed_texts(&texts).await?;
            for (entity, vector) in pending.into_iter().zip(vectors) {
                self.catalog
                    .store_embedding(
                        self.kind,
                        entity.id,
                        vector,
                        &normalize_text(&entity.canonical_text),
                    )
                    .await?;
                progress.embedded += 1;
            }
            debug!(
                catalog_kind = %self.kind,
                processed = progress.processed,
                embedded = progress.embedded,
                "Embedded catalog batch"
            );
        }

        Ok(progress)
    }
}

#[async_trait]
impl JobHandler for CatalogEmbeddingHandler {
    fn job_type(&self) -> JobType {
        match self.kind {
            CatalogKind::Practice => JobType::EmbedPractices,
            CatalogKind::Provider => JobType::EmbedProviders,
        }
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "catalog_embedding_handler", op = "execute", catalog_kind = %self.kind, job_id = %ctx.job_id())
    )]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let request = match (self.kind, ctx.payload()) {
            (CatalogKind::Practice, JobPayload::EmbedPractices(request))
            | (CatalogKind::Provider, JobPayload::EmbedProviders(request)) => request,
            (_, other) => {
                return JobResult::Failed(format!(
                    "{} handler cannot process a {} payload",
                    self.job_type(),
                    other.job_type()
                ))
            }
        };

        match self.embed_ids(&request.ids).await {
            Ok(progress) => {
                info!(
                    processed = progress.processed,
                    embedded = progress.embedded,
                    requested = request.ids.len(),
                    "Catalog embedding finished"
                );
                JobResult::Success(Some(json!({
                    "processed": progress.processed,
                    "embedded": progress.embedded,
                })))
            }
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}
