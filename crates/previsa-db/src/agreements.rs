//! Provider/practice agreement lookups.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use previsa_core::{Agreement, AgreementRepository, Error, Result};

/// PostgreSQL implementation of AgreementRepository.
#[derive(Clone)]
pub struct PgAgreementRepository {
    pool: Pool<Postgres>,
}

impl PgAgreementRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: PgRow) -> Result<Agreement> {
        Ok(Agreement {
            id: row.try_get("id")?,
            provider_id: row.try_get("provider_id")?,
            practice_id: row.try_get("practice_id")?,
            plan_id: row.try_get("plan_id")?,
            price: row.try_get("price")?,
            effective_from: row.try_get("effective_from")?,
            valid_until: row.try_get("valid_until")?,
            active: row.try_get("active")?,
        })
    }

    /// Insert or replace an agreement (used by catalog sync and tests).
    pub async fn upsert(&self, agreement: &Agreement) -> Result<()> {
        sqlx::query(
            "INSERT INTO agreement (id, provider_id, practice_id, plan_id, price, effective_from, valid_until, active)
             VALUES ($1, $2, $3, $4, $5::FLOAT8::NUMERIC(14, 2), $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                 provider_id = EXCLUDED.provider_id,
                 practice_id = EXCLUDED.practice_id,
                 plan_id = EXCLUDED.plan_id,
                 price = EXCLUDED.price,
                 effective_from = EXCLUDED.effective_from,
                 valid_until = EXCLUDED.valid_until,
                 active = EXCLUDED.active",
        )
        .bind(agreement.id)
        .bind(agreement.provider_id)
        .bind(agreement.practice_id)
        .bind(agreement.plan_id)
        .bind(agreement.price)
        .bind(agreement.effective_from)
        .bind(agreement.valid_until)
        .bind(agreement.active)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

#[async_trait]
impl AgreementRepository for PgAgreementRepository {
    async fn find_in_force(
        &self,
        provider_id: i64,
        practice_id: i64,
        plan_id: i32,
        day: NaiveDate,
    ) -> Result<Option<Agreement>> {
        let row = sqlx::query(
            "SELECT id, provider_id, practice_id, plan_id, price::FLOAT8 AS price,
                    effective_from, valid_until, active
             FROM agreement
             WHERE provider_id = $1 AND practice_id = $2 AND plan_id = $3
               AND active
               AND effective_from <= $4
               AND (valid_until IS NULL OR valid_until >= $4)
             ORDER BY effective_from DESC, id DESC
             LIMIT 1",
        )
        .bind(provider_id)
        .bind(practice_id)
        .bind(plan_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_row).transpose()
    }
}
