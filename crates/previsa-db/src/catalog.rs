//! Reference catalog (practices and providers) backed by pgvector and pg_trgm.

use async_trait::async_trait;
use chrono::Utc;
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use previsa_core::{CandidateHit, CatalogEntity, CatalogKind, CatalogRepository, Error, Result};

/// Table and display-text column for each catalog kind.
fn table_of(kind: CatalogKind) -> (&'static str, &'static str) {
    match kind {
        CatalogKind::Practice => ("practice", "description"),
        CatalogKind::Provider => ("provider", "name"),
    }
}

fn entity_columns(kind: CatalogKind) -> &'static str {
    match kind {
        CatalogKind::Practice => {
            "id, tenant_id, description AS canonical_text, normalized_text, active, embedding, \
             code, specialty, synonyms, NULL::TEXT AS legal_name, NULL::TEXT AS tax_id, NULL::TEXT AS license"
        }
        CatalogKind::Provider => {
            "id, tenant_id, name AS canonical_text, normalized_text, active, embedding, \
             NULL::TEXT AS code, NULL::TEXT AS specialty, '{}'::TEXT[] AS synonyms, legal_name, tax_id, license"
        }
    }
}

/// PostgreSQL implementation of CatalogRepository.
#[derive(Clone)]
pub struct PgCatalogRepository {
    pool: Pool<Postgres>,
}

impl PgCatalogRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_entity_row(kind: CatalogKind, row: PgRow) -> Result<CatalogEntity> {
        Ok(CatalogEntity {
            id: row.try_get("id")?,
            kind,
            canonical_text: row.try_get("canonical_text")?,
            normalized_text: row.try_get("normalized_text")?,
            embedding: row.try_get::<Option<Vector>, _>("embedding")?,
            tenant_id: row.try_get("tenant_id")?,
            active: row.try_get("active")?,
            code: row.try_get("code")?,
            specialty: row.try_get("specialty")?,
            synonyms: row.try_get("synonyms")?,
            legal_name: row.try_get("legal_name")?,
            tax_id: row.try_get("tax_id")?,
            license: row.try_get("license")?,
        })
    }

    /// Insert or replace a catalog entry (used by catalog sync and tests).
    pub async fn upsert(&self, entity: &CatalogEntity) -> Result<()> {
        match entity.kind {
            CatalogKind::Practice => {
                sqlx::query(
                    "INSERT INTO practice (id, tenant_id, code, description, normalized_text, specialty,
                                           synonyms, active, embedding, embedded_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, CASE WHEN $9 IS NULL THEN NULL ELSE $10 END)
                     ON CONFLICT (id) DO UPDATE SET
                         tenant_id = EXCLUDED.tenant_id,
                         code = EXCLUDED.code,
                         description = EXCLUDED.description,
                         normalized_text = EXCLUDED.normalized_text,
                         specialty = EXCLUDED.specialty,
                         synonyms = EXCLUDED.synonyms,
                         active = EXCLUDED.active,
                         embedding = EXCLUDED.embedding,
                         embedded_at = EXCLUDED.embedded_at",
                )
                .bind(entity.id)
                .bind(entity.tenant_id)
                .bind(&entity.code)
                .bind(&entity.canonical_text)
                .bind(&entity.normalized_text)
                .bind(&entity.specialty)
                .bind(&entity.synonyms)
                .bind(entity.active)
                .bind(&entity.embedding)
                .bind(Utc::now())
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            }
            CatalogKind::Provider => {
                sqlx::query(
                    "INSERT INTO provider (id, tenant_id, name, legal_name, tax_id, license,
                                           normalized_text, active, embedding, embedded_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, CASE WHEN $9 IS NULL THEN NULL ELSE $10 END)
                     ON CONFLICT (id) DO UPDATE SET
                         tenant_id = EXCLUDED.tenant_id,
                         name = EXCLUDED.name,
                         legal_name = EXCLUDED.legal_name,
                         tax_id = EXCLUDED.tax_id,
                         license = EXCLUDED.license,
                         normalized_text = EXCLUDED.normalized_text,
                         active = EXCLUDED.active,
                         embedding = EXCLUDED.embedding,
                         embedded_at = EXCLUDED.embedded_at",
                )
                .bind(entity.id)
                .bind(entity.tenant_id)
                .bind(&entity.canonical_text)
                .bind(&entity.legal_name)
                .bind(&entity.tax_id)
                .bind(&entity.license)
                .bind(&entity.normalized_text)
                .bind(entity.active)
                .bind(&entity.embedding)
                .bind(Utc::now())
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            }
        }
        Ok(())
    }

    async fn find_provider_by(
        &self,
        column: &'static str,
        value: &str,
        tenant: Option<Uuid>,
    ) -> Result<Option<CatalogEntity>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM provider
             WHERE {column} = $1 AND active AND (tenant_id IS NULL OR tenant_id = $2)
             ORDER BY (tenant_id IS NULL), id
             LIMIT 1",
            entity_columns(CatalogKind::Provider)
        ))
        .bind(value.trim())
        .bind(tenant)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(|r| Self::parse_entity_row(CatalogKind::Provider, r))
            .transpose()
    }
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    #[instrument(skip(self, query_vector, normalized_query), fields(subsystem = "db", component = "catalog", op = "search", catalog_kind = %kind))]
    async fn search(
        &self,
        kind: CatalogKind,
        query_vector: &Vector,
        normalized_query: &str,
        k: usize,
        tenant: Option<Uuid>,
    ) -> Result<Vec<CandidateHit>> {
        let (table, text_column) = table_of(kind);

        // Lexical branch uses the pg_trgm `%` operator so the GIN index applies.
        let rows = sqlx::query(&format!(
            "WITH semantic AS (
                 SELECT id FROM {table}
                 WHERE active AND embedding IS NOT NULL
                   AND (tenant_id IS NULL OR tenant_id = $3)
                 ORDER BY embedding <=> $1::vector
                 LIMIT $4
             ), lexical AS (
                 SELECT id FROM {table}
                 WHERE active AND normalized_text % $2
                   AND (tenant_id IS NULL OR tenant_id = $3)
                 ORDER BY similarity(normalized_text, $2) DESC
                 LIMIT $4
             )
             SELECT t.id,
                    t.{text_column} AS canonical_text,
                    CASE WHEN t.embedding IS NULL THEN NULL
                         ELSE (1.0 - (t.embedding <=> $1::vector))::FLOAT8 END AS vector_similarity,
                    similarity(t.normalized_text, $2)::FLOAT8 AS lexical_similarity
             FROM {table} t
             WHERE t.id IN (SELECT id FROM semantic UNION SELECT id FROM lexical)"
        ))
        .bind(query_vector)
        .bind(normalized_query)
        .bind(tenant)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let hits = rows
            .into_iter()
            .map(|row| {
                Ok(CandidateHit {
                    id: row.try_get("id")?,
                    canonical_text: row.try_get("canonical_text")?,
                    vector_similarity: row.try_get("vector_similarity")?,
                    lexical_similarity: row.try_get("lexical_similarity")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for hit in &hits {
            trace!(id = hit.id, vector = ?hit.vector_similarity, lexical = hit.lexical_similarity, "Catalog hit");
        }
        debug!(result_count = hits.len(), "Catalog search complete");
        Ok(hits)
    }

    async fn find_provider_by_tax_id(
        &self,
        tax_id: &str,
        tenant: Option<Uuid>,
    ) -> Result<Option<CatalogEntity>> {
        self.find_provider_by("tax_id", tax_id, tenant).await
    }

    async fn find_provider_by_license(
        &self,
        license: &str,
        tenant: Option<Uuid>,
    ) -> Result<Option<CatalogEntity>> {
        self.find_provider_by("license", license, tenant).await
    }

    async fn get_many(&self, kind: CatalogKind, ids: &[i64]) -> Result<Vec<CatalogEntity>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let (table, _) = table_of(kind);

        let rows = sqlx::query(&format!(
            "SELECT {} FROM {table} WHERE id = ANY($1) ORDER BY id",
            entity_columns(kind)
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter()
            .map(|r| Self::parse_entity_row(kind, r))
            .collect()
    }

    async fn store_embedding(
        &self,
        kind: CatalogKind,
        id: i64,
        embedding: Vector,
        normalized_text: &str,
    ) -> Result<()> {
        let (table, _) = table_of(kind);

        let rows = sqlx::query(&format!(
            "UPDATE {table} SET embedding = $2, normalized_text = $3, embedded_at = $4 WHERE id = $1"
        ))
        .bind(id)
        .bind(embedding)
        .bind(normalized_text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if rows == 0 {
            return Err(Error::NotFound(format!("{} {}", kind, id)));
        }
        Ok(())
    }
}
