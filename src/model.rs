//! Core data model.
//!
//! An automation pairs one trigger with one action for a tenant. Events are
//! normalized occurrences on a review; delivery records are the durable proof
//! that an automation was attempted for an occurrence.

pub mod automation;
pub mod delivery;
pub mod event;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use automation::{
    ActionConfig, ActionType, Automation, AutomationId, Conditions, NewAutomation, TriggerType,
};
pub use delivery::{DeliveryOutcome, DeliveryRecord, Fingerprint};
pub use event::{Event, EventKind, ReviewSnapshot};

/// Newtype for tenant IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

/// Newtype for review IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl ReviewId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ReviewId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for ReviewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
