//! Collaborator interfaces the engine depends on.
//!
//! Postgres implementations live in [`crate::db`]; in-memory ones in
//! [`in_memory`] back tests and local runs.

pub mod in_memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    Automation, AutomationId, DeliveryRecord, Event, Fingerprint, ReviewId, ReviewSnapshot,
    TenantId, TriggerType,
};

/// Loads automation definitions and maintains their trigger counters.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Active automations for a tenant. Rows that fail validation are
    /// skipped with a warning, never returned.
    async fn list_active_automations(&self, tenant_id: TenantId) -> Result<Vec<Automation>>;

    /// Atomically bump `trigger_count` and set `last_triggered_at`.
    async fn increment_trigger_counters(&self, id: AutomationId, at: DateTime<Utc>)
    -> Result<()>;

    /// Tenants with at least one active automation of the given trigger type.
    async fn tenants_with_active_trigger(&self, trigger: TriggerType) -> Result<Vec<TenantId>>;
}

/// Result of writing a delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordResult {
    Inserted,
    /// A success record for the fingerprint already existed.
    DuplicateSuccess,
}

/// Durable record of delivery attempts.
///
/// At-most-once execution rests on two rules: an action only runs while its
/// fingerprint is claimed, and a fingerprint has at most one success record.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    async fn has_success(&self, fingerprint: &Fingerprint) -> Result<bool>;

    /// Take the execution claim on a fingerprint for `lease`. Returns `false`
    /// while another owner holds an unexpired claim.
    async fn try_claim(&self, fingerprint: &Fingerprint, owner: Uuid, lease: Duration)
    -> Result<bool>;

    /// Drop a claim taken by `owner`. A claim already taken over after
    /// expiry is left alone.
    async fn release_claim(&self, fingerprint: &Fingerprint, owner: Uuid) -> Result<()>;

    async fn record(&self, record: &DeliveryRecord) -> Result<RecordResult>;

    /// Failed records attempted at or after `since` whose fingerprint has no
    /// success, oldest first.
    async fn failures_since(&self, since: DateTime<Utc>) -> Result<Vec<DeliveryRecord>>;
}

/// The review entity store, owned by the review-sync subsystem.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Append a tag with set-union semantics. Returns whether the tag was
    /// added; `Error::NotFound` if the review is gone.
    async fn append_tag(&self, review_id: ReviewId, tag: &str) -> Result<bool>;

    /// Set the review's assignee. `Error::NotTenantMember` if the user does
    /// not belong to the tenant; `Error::NotFound` if the review is gone.
    async fn set_assignee(&self, tenant_id: TenantId, review_id: ReviewId, user_id: Uuid)
    -> Result<()>;

    /// Reviews needing action, never replied to, created before the cutoff.
    async fn unreplied_reviews(
        &self,
        tenant_id: TenantId,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<(ReviewId, ReviewSnapshot)>>;
}

/// An event taken off the queue, with the receipt needed to settle it.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub receipt: i64,
    pub event: Event,
}

/// At-least-once event queue between producers and the control plane.
#[async_trait]
pub trait EventQueue: Send + Sync {
    async fn publish(&self, event: &Event) -> Result<()>;

    /// Take the next event, if any, without blocking.
    async fn receive(&self) -> Result<Option<QueuedEvent>>;

    /// Settle a processed event.
    async fn ack(&self, receipt: i64) -> Result<()>;

    /// Return an event for redelivery after a processing failure.
    async fn retry_later(&self, receipt: i64) -> Result<()>;
}
