//! Delivery ledger on `delivery_records`.
//!
//! The partial unique index on `fingerprint WHERE outcome = 'success'` is the
//! at-most-once backstop: a second success insert for the same fingerprint
//! is a no-op that reports [`RecordResult::DuplicateSuccess`]. Execution
//! itself is serialized per fingerprint through leased rows in
//! `delivery_claims`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Db;
use crate::error::{Error, Result};
use crate::model::{AutomationId, DeliveryOutcome, DeliveryRecord, Event, Fingerprint};
use crate::repo::{DeliveryLedger, RecordResult};

impl Db {
    /// Most recent records for one automation, newest first.
    pub async fn deliveries_for(
        &self,
        automation_id: AutomationId,
        limit: i64,
    ) -> Result<Vec<DeliveryRecord>> {
        let rows: Vec<DeliveryRow> = sqlx::query_as(
            "SELECT id, automation_id, fingerprint, outcome, error, retryable, attempted_at, event
             FROM delivery_records
             WHERE automation_id = $1
             ORDER BY attempted_at DESC
             LIMIT $2",
        )
        .bind(automation_id.0)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(DeliveryRow::try_into_record).collect()
    }
}

#[async_trait]
impl DeliveryLedger for Db {
    async fn has_success(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (
                 SELECT 1 FROM delivery_records
                 WHERE fingerprint = $1 AND outcome = 'success'
             )",
        )
        .bind(fingerprint.as_str())
        .fetch_one(self.pool())
        .await?;
        Ok(exists)
    }

    async fn try_claim(
        &self,
        fingerprint: &Fingerprint,
        owner: Uuid,
        lease: Duration,
    ) -> Result<bool> {
        // An expired claim is taken over in place; a live one wins the conflict.
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            "INSERT INTO delivery_claims (fingerprint, owner, expires_at)
             VALUES ($1, $2, now() + make_interval(secs => $3))
             ON CONFLICT (fingerprint) DO UPDATE
                 SET owner = EXCLUDED.owner,
                     claimed_at = now(),
                     expires_at = EXCLUDED.expires_at
                 WHERE delivery_claims.expires_at <= now()
             RETURNING owner",
        )
        .bind(fingerprint.as_str())
        .bind(owner)
        .bind(lease.as_secs_f64())
        .fetch_optional(self.pool())
        .await?;
        Ok(claimed.is_some())
    }

    async fn release_claim(&self, fingerprint: &Fingerprint, owner: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM delivery_claims WHERE fingerprint = $1 AND owner = $2")
            .bind(fingerprint.as_str())
            .bind(owner)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn record(&self, record: &DeliveryRecord) -> Result<RecordResult> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            "INSERT INTO delivery_records (id, automation_id, fingerprint, outcome, error, retryable, attempted_at, event)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (fingerprint) WHERE outcome = 'success'
             DO NOTHING
             RETURNING id",
        )
        .bind(record.id)
        .bind(record.automation_id.0)
        .bind(record.fingerprint.as_str())
        .bind(record.outcome.as_str())
        .bind(record.error.as_deref())
        .bind(record.retryable)
        .bind(record.attempted_at)
        .bind(serde_json::to_value(&record.event)?)
        .fetch_optional(self.pool())
        .await?;

        Ok(match inserted {
            Some(_) => RecordResult::Inserted,
            None => RecordResult::DuplicateSuccess,
        })
    }

    async fn failures_since(&self, since: DateTime<Utc>) -> Result<Vec<DeliveryRecord>> {
        let rows: Vec<DeliveryRow> = sqlx::query_as(
            "SELECT f.id, f.automation_id, f.fingerprint, f.outcome, f.error, f.retryable, f.attempted_at, f.event
             FROM delivery_records f
             WHERE f.outcome = 'failed'
               AND f.attempted_at >= $1
               AND NOT EXISTS (
                   SELECT 1 FROM delivery_records s
                   WHERE s.fingerprint = f.fingerprint AND s.outcome = 'success'
               )
             ORDER BY f.attempted_at",
        )
        .bind(since)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(DeliveryRow::try_into_record).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct DeliveryRow {
    id: Uuid,
    automation_id: Uuid,
    fingerprint: String,
    outcome: String,
    error: Option<String>,
    retryable: bool,
    attempted_at: DateTime<Utc>,
    event: serde_json::Value,
}

impl DeliveryRow {
    fn try_into_record(self) -> Result<DeliveryRecord> {
        let event: Event = serde_json::from_value(self.event)
            .map_err(|e| Error::Repository(format!("delivery {}: bad event: {e}", self.id)))?;
        Ok(DeliveryRecord {
            id: self.id,
            automation_id: AutomationId(self.automation_id),
            fingerprint: Fingerprint::from(self.fingerprint),
            outcome: self.outcome.parse::<DeliveryOutcome>()?,
            error: self.error,
            retryable: self.retryable,
            attempted_at: self.attempted_at,
            event,
        })
    }
}
