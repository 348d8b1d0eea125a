//! Canonical review events fed into the engine.
//!
//! An event is immutable once constructed. Semantically identical
//! re-deliveries carry the same review id, kind, and version marker, which
//! is what the delivery ledger keys on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{ReviewId, TenantId};

/// What happened to the review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    /// Synthesized by the scheduled trigger scanner.
    NoReplyElapsed,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::NoReplyElapsed => "no_reply_elapsed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The review as it looked when the event occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSnapshot {
    pub rating: Option<i32>,
    /// Upstream-provided classification, e.g. "negative".
    pub sentiment: Option<String>,
    #[serde(default)]
    pub body: String,
    pub platform: String,
    #[serde(default)]
    pub author_name: Option<String>,
    pub needs_action: bool,
    pub replied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A normalized occurrence on a review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: Uuid,
    tenant_id: TenantId,
    review_id: ReviewId,
    kind: EventKind,
    version: String,
    occurred_at: DateTime<Utc>,
    snapshot: ReviewSnapshot,
}

impl Event {
    /// Build an event, deriving the version marker from the snapshot.
    ///
    /// `created` events use the review's creation time; `updated` events use
    /// a digest of the snapshot so a retried notification of the same change
    /// carries the same marker.
    pub fn new(
        tenant_id: TenantId,
        review_id: ReviewId,
        kind: EventKind,
        snapshot: ReviewSnapshot,
    ) -> Self {
        let version = match kind {
            EventKind::Created | EventKind::NoReplyElapsed => snapshot.created_at.to_rfc3339(),
            EventKind::Updated => snapshot_digest(&snapshot),
        };
        Self::with_version(tenant_id, review_id, kind, version, snapshot)
    }

    /// Build an event with an explicit version marker supplied by the publisher.
    pub fn with_version(
        tenant_id: TenantId,
        review_id: ReviewId,
        kind: EventKind,
        version: impl Into<String>,
        snapshot: ReviewSnapshot,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            review_id,
            kind,
            version: version.into(),
            occurred_at: Utc::now(),
            snapshot,
        }
    }

    /// Synthesize a `no_reply_elapsed` event for one scan slot.
    pub fn no_reply_elapsed(
        tenant_id: TenantId,
        review_id: ReviewId,
        snapshot: ReviewSnapshot,
        scan_slot: DateTime<Utc>,
    ) -> Self {
        Self::with_version(
            tenant_id,
            review_id,
            EventKind::NoReplyElapsed,
            scan_slot.to_rfc3339(),
            snapshot,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn review_id(&self) -> ReviewId {
        self.review_id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn snapshot(&self) -> &ReviewSnapshot {
        &self.snapshot
    }
}

fn snapshot_digest(snapshot: &ReviewSnapshot) -> String {
    // Struct field order is fixed, so the JSON encoding is canonical.
    let bytes = serde_json::to_vec(snapshot).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    hex::encode(&digest[..16])
}
