//! Event ingestion: normalize review-sync notifications into canonical events.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::model::{Event, EventKind, ReviewId, ReviewSnapshot, TenantId};
use crate::repo::EventQueue;
use crate::telemetry::metrics::{self, PublishSource};

/// Lifecycle notifications emitted by review sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewLifecycle {
    Created,
    Updated,
    Replied,
    SentimentEnriched,
}

impl ReviewLifecycle {
    /// Every non-creation change is an `updated` event.
    pub fn event_kind(self) -> EventKind {
        match self {
            ReviewLifecycle::Created => EventKind::Created,
            ReviewLifecycle::Updated
            | ReviewLifecycle::Replied
            | ReviewLifecycle::SentimentEnriched => EventKind::Updated,
        }
    }
}

impl std::str::FromStr for ReviewLifecycle {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(ReviewLifecycle::Created),
            "updated" => Ok(ReviewLifecycle::Updated),
            "replied" => Ok(ReviewLifecycle::Replied),
            "sentiment_enriched" => Ok(ReviewLifecycle::SentimentEnriched),
            other => Err(crate::error::Error::Other(format!(
                "unknown review lifecycle event: {other}"
            ))),
        }
    }
}

/// Inbound adapter. Publishing is fire-and-forget from the caller's side:
/// once the event is on the queue, delivery is at-least-once.
#[derive(Clone)]
pub struct Ingest {
    queue: Arc<dyn EventQueue>,
}

impl Ingest {
    pub fn new(queue: Arc<dyn EventQueue>) -> Self {
        Self { queue }
    }

    pub async fn publish_event(
        &self,
        tenant_id: TenantId,
        review_id: ReviewId,
        lifecycle: ReviewLifecycle,
        snapshot: ReviewSnapshot,
    ) -> Result<Event> {
        let event = Event::new(tenant_id, review_id, lifecycle.event_kind(), snapshot);
        self.enqueue(event).await
    }

    /// Publish with a version marker supplied by the sync subsystem.
    pub async fn publish_versioned(
        &self,
        tenant_id: TenantId,
        review_id: ReviewId,
        lifecycle: ReviewLifecycle,
        version: impl Into<String>,
        snapshot: ReviewSnapshot,
    ) -> Result<Event> {
        let event = Event::with_version(
            tenant_id,
            review_id,
            lifecycle.event_kind(),
            version,
            snapshot,
        );
        self.enqueue(event).await
    }

    async fn enqueue(&self, event: Event) -> Result<Event> {
        self.queue.publish(&event).await?;
        debug!(
            event_id = %event.id(),
            tenant_id = %event.tenant_id(),
            review_id = %event.review_id(),
            kind = %event.kind(),
            "event published"
        );
        metrics::record_published(event.kind(), PublishSource::Ingest, 1);
        Ok(event)
    }
}
