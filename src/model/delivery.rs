//! Delivery records and fingerprints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::automation::{AutomationId, TriggerType};
use super::event::{Event, EventKind};
use crate::error::{Error, Result};

/// Deterministic identifier of an (automation, triggering occurrence) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash of automation id, review id, event kind and event version.
    ///
    /// `no_reply_elapsed` events hash the trigger type instead of kind and
    /// version, so only the first qualifying scan cycle for a review fires.
    pub fn compute(automation_id: AutomationId, trigger: TriggerType, event: &Event) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(automation_id.0.as_bytes());
        hasher.update(event.review_id().0.as_bytes());
        if event.kind() == EventKind::NoReplyElapsed {
            hasher.update(trigger.as_str().as_bytes());
        } else {
            hasher.update(event.kind().as_str().as_bytes());
            hasher.update([0x1f]);
            hasher.update(event.version().as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 12 hex chars
        write!(f, "{}", &self.0[..self.0.len().min(12)])
    }
}

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Success,
    Failed,
    Skipped,
}

impl DeliveryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryOutcome::Success => "success",
            DeliveryOutcome::Failed => "failed",
            DeliveryOutcome::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeliveryOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(DeliveryOutcome::Success),
            "failed" => Ok(DeliveryOutcome::Failed),
            "skipped" => Ok(DeliveryOutcome::Skipped),
            other => Err(Error::Other(format!("unknown delivery outcome: {other}"))),
        }
    }
}

/// Durable fact that a fingerprint was attempted. Never mutated; retries
/// produce new records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub automation_id: AutomationId,
    pub fingerprint: Fingerprint,
    pub outcome: DeliveryOutcome,
    pub error: Option<String>,
    /// Whether a failure is worth retrying. Only transient failures are.
    #[serde(default)]
    pub retryable: bool,
    pub attempted_at: DateTime<Utc>,
    /// The triggering event, kept so a retry sweep can re-publish it.
    pub event: Event,
}

impl DeliveryRecord {
    pub fn new(
        automation_id: AutomationId,
        fingerprint: Fingerprint,
        outcome: DeliveryOutcome,
        error: Option<String>,
        event: Event,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            automation_id,
            fingerprint,
            outcome,
            error,
            retryable: false,
            attempted_at: Utc::now(),
            event,
        }
    }

    /// Mark a failed record as eligible for the retry sweep.
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}
