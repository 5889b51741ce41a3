//! Pre-authorization aggregate persistence.
//!
//! The header and its line items are always written in a single
//! transaction; a reader never observes a header without its lines.

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use previsa_core::{
    Error, ItemCorrection, LineItem, PreAuthStatus, PreAuthorization, PreAuthorizationRepository,
    Result,
};

const HEADER_COLUMNS: &str = "id, job_id, tenant_id, file_name, plan_id, patient, order_date, \
                              ordering_provider, physician, diagnosis, overall_confidence, \
                              requires_review, status, observations, warnings, reviewed_by, \
                              reviewed_at, rejection_reason, created_at";

const ITEM_COLUMNS: &str = "sequence, original_text, quantity, suggested_match, alternative_matches, \
                            has_agreement, agreement_id, agreed_price, executing_provider_id, note, \
                            corrected_practice_id, correction_reason, corrected_by, corrected_at";

/// PostgreSQL implementation of PreAuthorizationRepository.
#[derive(Clone)]
pub struct PgPreAuthorizationRepository {
    pool: Pool<Postgres>,
}

fn to_json<T: Serialize>(value: &T) -> Result<JsonValue> {
    Ok(serde_json::to_value(value)?)
}

fn to_json_opt<T: Serialize>(value: &Option<T>) -> Result<Option<JsonValue>> {
    value.as_ref().map(to_json).transpose()
}

fn from_json_opt<T: DeserializeOwned>(value: Option<JsonValue>) -> Result<Option<T>> {
    value
        .filter(|v| !v.is_null())
        .map(|v| serde_json::from_value(v).map_err(Error::from))
        .transpose()
}

impl PgPreAuthorizationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_header(row: &PgRow) -> Result<PreAuthorization> {
        let status: String = row.try_get("status")?;
        let warnings: JsonValue = row.try_get("warnings")?;

        Ok(PreAuthorization {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            tenant_id: row.try_get("tenant_id")?,
            file_name: row.try_get("file_name")?,
            plan_id: row.try_get("plan_id")?,
            patient: from_json_opt(row.try_get("patient")?)?,
            order_date: row.try_get("order_date")?,
            ordering_provider: from_json_opt(row.try_get("ordering_provider")?)?,
            physician: from_json_opt(row.try_get("physician")?)?,
            diagnosis: from_json_opt(row.try_get("diagnosis")?)?,
            overall_confidence: row.try_get("overall_confidence")?,
            requires_review: row.try_get("requires_review")?,
            status: status.parse()?,
            observations: row.try_get("observations")?,
            warnings: serde_json::from_value(warnings)?,
            items: Vec::new(),
            reviewed_by: row.try_get("reviewed_by")?,
            reviewed_at: row.try_get("reviewed_at")?,
            rejection_reason: row.try_get("rejection_reason")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn parse_item(row: &PgRow) -> Result<LineItem> {
        let alternatives: JsonValue = row.try_get("alternative_matches")?;
        let corrected: Option<i64> = row.try_get("corrected_practice_id")?;
        let correction = match corrected {
            Some(practice_id) => Some(ItemCorrection {
                practice_id,
                reviewer: row.try_get::<Option<String>, _>("corrected_by")?.unwrap_or_default(),
                reason: row
                    .try_get::<Option<String>, _>("correction_reason")?
                    .unwrap_or_default(),
                corrected_at: row
                    .try_get::<Option<chrono::DateTime<Utc>>, _>("corrected_at")?
                    .unwrap_or_default(),
            }),
            None => None,
        };

        Ok(LineItem {
            sequence: row.try_get("sequence")?,
            original_text: row.try_get("original_text")?,
            quantity: row.try_get("quantity")?,
            suggested_match: from_json_opt(row.try_get("suggested_match")?)?,
            alternative_matches: serde_json::from_value(alternatives)?,
            has_agreement: row.try_get("has_agreement")?,
            agreement_id: row.try_get("agreement_id")?,
            agreed_price: row.try_get("agreed_price")?,
            executing_provider_id: row.try_get("executing_provider_id")?,
            note: row.try_get("note")?,
            correction,
        })
    }

    async fn load(&self, row: Option<PgRow>) -> Result<Option<PreAuthorization>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let mut auth = Self::parse_header(&row)?;

        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM pre_authorization_item
             WHERE pre_authorization_id = $1
             ORDER BY sequence"
        ))
        .bind(auth.id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        auth.items = rows.iter().map(Self::parse_item).collect::<Result<_>>()?;
        Ok(Some(auth))
    }

    async fn review(
        &self,
        id: Uuid,
        status: PreAuthStatus,
        reviewer: &str,
        reason: Option<&str>,
    ) -> Result<PreAuthorization> {
        let rows = sqlx::query(
            "UPDATE pre_authorization
             SET status = $2, reviewed_by = $3, reviewed_at = $4, rejection_reason = $5
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(reviewer)
        .bind(Utc::now())
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        let current = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pre-authorization {}", id)))?;

        if rows == 0 {
            return Err(Error::Conflict(format!(
                "pre-authorization {} is already {}",
                id,
                current.status.as_str()
            )));
        }

        info!(
            subsystem = "db",
            component = "pre_authorizations",
            op = "review",
            pre_authorization_id = %id,
            status = status.as_str(),
            "Pre-authorization reviewed"
        );
        Ok(current)
    }
}

#[async_trait]
impl PreAuthorizationRepository for PgPreAuthorizationRepository {
    async fn insert(&self, auth: &PreAuthorization) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO pre_authorization (id, job_id, tenant_id, file_name, plan_id, patient, order_date,
                                            ordering_provider, physician, diagnosis, overall_confidence,
                                            requires_review, status, observations, warnings, reviewed_by,
                                            reviewed_at, rejection_reason, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
        )
        .bind(auth.id)
        .bind(auth.job_id)
        .bind(auth.tenant_id)
        .bind(&auth.file_name)
        .bind(auth.plan_id)
        .bind(to_json_opt(&auth.patient)?)
        .bind(auth.order_date)
        .bind(to_json_opt(&auth.ordering_provider)?)
        .bind(to_json_opt(&auth.physician)?)
        .bind(to_json_opt(&auth.diagnosis)?)
        .bind(auth.overall_confidence)
        .bind(auth.requires_review)
        .bind(auth.status.as_str())
        .bind(&auth.observations)
        .bind(to_json(&auth.warnings)?)
        .bind(&auth.reviewed_by)
        .bind(auth.reviewed_at)
        .bind(&auth.rejection_reason)
        .bind(auth.created_at)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        for item in &auth.items {
            sqlx::query(
                "INSERT INTO pre_authorization_item (pre_authorization_id, sequence, original_text, quantity,
                                                     suggested_match, alternative_matches, has_agreement,
                                                     agreement_id, agreed_price, executing_provider_id, note,
                                                     corrected_practice_id, correction_reason, corrected_by,
                                                     corrected_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            )
            .bind(auth.id)
            .bind(item.sequence)
            .bind(&item.original_text)
            .bind(item.quantity)
            .bind(to_json_opt(&item.suggested_match)?)
            .bind(to_json(&item.alternative_matches)?)
            .bind(item.has_agreement)
            .bind(item.agreement_id)
            .bind(item.agreed_price)
            .bind(item.executing_provider_id)
            .bind(&item.note)
            .bind(item.correction.as_ref().map(|c| c.practice_id))
            .bind(item.correction.as_ref().map(|c| c.reason.as_str()))
            .bind(item.correction.as_ref().map(|c| c.reviewer.as_str()))
            .bind(item.correction.as_ref().map(|c| c.corrected_at))
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "pre_authorizations",
            op = "insert",
            pre_authorization_id = %auth.id,
            item_count = auth.items.len(),
            "Pre-authorization stored"
        );
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PreAuthorization>> {
        let row = sqlx::query(&format!(
            "SELECT {HEADER_COLUMNS} FROM pre_authorization WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.load(row).await
    }

    async fn find_by_job(&self, job_id: Uuid) -> Result<Option<PreAuthorization>> {
        let row = sqlx::query(&format!(
            "SELECT {HEADER_COLUMNS} FROM pre_authorization WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.load(row).await
    }

    async fn approve(&self, id: Uuid, reviewer: &str) -> Result<PreAuthorization> {
        self.review(id, PreAuthStatus::Approved, reviewer, None).await
    }

    async fn reject(&self, id: Uuid, reviewer: &str, reason: &str) -> Result<PreAuthorization> {
        self.review(id, PreAuthStatus::Rejected, reviewer, Some(reason))
            .await
    }

    async fn correct_item(
        &self,
        id: Uuid,
        sequence: i32,
        practice_id: i64,
        reviewer: &str,
        reason: &str,
    ) -> Result<PreAuthorization> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Row lock keeps a concurrent approve/reject from interleaving.
        let header = sqlx::query(&format!(
            "SELECT {HEADER_COLUMNS} FROM pre_authorization WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("pre-authorization {}", id)))?;
        let mut auth = Self::parse_header(&header)?;

        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM pre_authorization_item
             WHERE pre_authorization_id = $1 AND sequence = $2"
        ))
        .bind(id)
        .bind(sequence)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;
        auth.items = rows.iter().map(Self::parse_item).collect::<Result<_>>()?;

        let feedback = auth.correct_item(sequence, practice_id, reviewer, reason, Utc::now())?;

        sqlx::query(
            "UPDATE pre_authorization_item
             SET corrected_practice_id = $3, correction_reason = $4, corrected_by = $5,
                 corrected_at = $6
             WHERE pre_authorization_id = $1 AND sequence = $2",
        )
        .bind(id)
        .bind(sequence)
        .bind(feedback.corrected_practice_id)
        .bind(&feedback.reason)
        .bind(&feedback.reviewer)
        .bind(feedback.created_at)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO match_feedback (id, pre_authorization_id, sequence, original_text,
                                         suggested_practice_id, corrected_practice_id, reviewer,
                                         reason, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(previsa_core::new_v7())
        .bind(feedback.pre_authorization_id)
        .bind(feedback.sequence)
        .bind(&feedback.original_text)
        .bind(feedback.suggested_practice_id)
        .bind(feedback.corrected_practice_id)
        .bind(&feedback.reviewer)
        .bind(&feedback.reason)
        .bind(feedback.created_at)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "pre_authorizations",
            op = "correct_item",
            pre_authorization_id = %id,
            sequence,
            practice_id,
            "Line item corrected"
        );

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pre-authorization {}", id)))
    }

    async fn list_pending(
        &self,
        tenant: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<PreAuthorization>> {
        let rows = sqlx::query(&format!(
            "SELECT {HEADER_COLUMNS} FROM pre_authorization
             WHERE status = 'pending' AND ($1::uuid IS NULL OR tenant_id = $1)
             ORDER BY created_at DESC
             LIMIT $2"
        ))
        .bind(tenant)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(auth) = self.load(Some(row)).await? {
                pending.push(auth);
            }
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use previsa_core::{EntityRef, PatientInfo};

    #[test]
    fn test_json_helpers_round_trip_optional() {
        let patient = Some(PatientInfo {
            name: Some("Ana Gómez".to_string()),
            ..Default::default()
        });
        let json = to_json_opt(&patient).unwrap();
        let back: Option<PatientInfo> = from_json_opt(json).unwrap();
        assert_eq!(back, patient);
    }

    #[test]
    fn test_from_json_opt_treats_null_as_none() {
        let back: Option<EntityRef> = from_json_opt(Some(JsonValue::Null)).unwrap();
        assert!(back.is_none());
        let back: Option<EntityRef> = from_json_opt(None).unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn test_from_json_opt_reports_shape_errors() {
        let result: Result<Option<EntityRef>> = from_json_opt(Some(serde_json::json!({"id": "x"})));
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
