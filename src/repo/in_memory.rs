//! In-memory collaborator implementations.
//!
//! Useful for testing and single-process local runs. Not durable: all state
//! is lost on drop.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use super::{DeliveryLedger, EventQueue, QueuedEvent, RecordResult, ReviewStore, RuleRepository};
use crate::error::{Error, Result};
use crate::model::{
    Automation, AutomationId, DeliveryOutcome, DeliveryRecord, Event, Fingerprint, ReviewId,
    ReviewSnapshot, TenantId, TriggerType,
};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryRules {
    automations: RwLock<HashMap<AutomationId, Automation>>,
    fail_loads: AtomicBool,
    failing_loads: AtomicUsize,
    fail_counters: AtomicBool,
}

impl InMemoryRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, automation: Automation) -> AutomationId {
        let id = automation.id;
        self.automations.write().await.insert(id, automation);
        id
    }

    pub async fn get(&self, id: AutomationId) -> Option<Automation> {
        self.automations.read().await.get(&id).cloned()
    }

    pub async fn set_active(&self, id: AutomationId, active: bool) -> Result<()> {
        let mut automations = self.automations.write().await;
        let automation = automations
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("automation {id}")))?;
        automation.active = active;
        automation.updated_at = Utc::now();
        Ok(())
    }

    /// Make `list_active_automations` fail, simulating an unavailable store.
    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Make only the next `count` loads fail.
    pub fn fail_next_loads(&self, count: usize) {
        self.failing_loads.store(count, Ordering::SeqCst);
    }

    /// Make `increment_trigger_counters` fail.
    pub fn fail_counters(&self, fail: bool) {
        self.fail_counters.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuleRepository for InMemoryRules {
    async fn list_active_automations(&self, tenant_id: TenantId) -> Result<Vec<Automation>> {
        let failing_once = self
            .failing_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing_once || self.fail_loads.load(Ordering::SeqCst) {
            return Err(Error::Repository("rule store unavailable".to_string()));
        }
        let mut active: Vec<Automation> = self
            .automations
            .read()
            .await
            .values()
            .filter(|a| a.tenant_id == tenant_id && a.active)
            .cloned()
            .collect();
        active.sort_by_key(|a| a.created_at);
        Ok(active)
    }

    async fn increment_trigger_counters(
        &self,
        id: AutomationId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if self.fail_counters.load(Ordering::SeqCst) {
            return Err(Error::Repository("counter update failed".to_string()));
        }
        let mut automations = self.automations.write().await;
        let automation = automations
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("automation {id}")))?;
        automation.trigger_count += 1;
        automation.last_triggered_at = Some(at);
        Ok(())
    }

    async fn tenants_with_active_trigger(&self, trigger: TriggerType) -> Result<Vec<TenantId>> {
        let tenants: BTreeSet<TenantId> = self
            .automations
            .read()
            .await
            .values()
            .filter(|a| a.active && a.trigger == trigger)
            .map(|a| a.tenant_id)
            .collect();
        Ok(tenants.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryLedger {
    records: Mutex<Vec<DeliveryRecord>>,
    claims: Mutex<HashMap<Fingerprint, (Uuid, Instant)>>,
    fail_writes: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<DeliveryRecord> {
        self.records.lock().await.clone()
    }

    pub async fn count(&self, outcome: DeliveryOutcome) -> usize {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.outcome == outcome)
            .count()
    }

    /// Fingerprints currently claimed, expired or not.
    pub async fn claimed(&self) -> usize {
        self.claims.lock().await.len()
    }

    /// Make `record` fail, simulating an unavailable ledger.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeliveryLedger for InMemoryLedger {
    async fn has_success(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .any(|r| r.outcome == DeliveryOutcome::Success && &r.fingerprint == fingerprint))
    }

    async fn try_claim(
        &self,
        fingerprint: &Fingerprint,
        owner: Uuid,
        lease: Duration,
    ) -> Result<bool> {
        let mut claims = self.claims.lock().await;
        let now = Instant::now();
        if let Some((_, expires_at)) = claims.get(fingerprint) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        claims.insert(fingerprint.clone(), (owner, now + lease));
        Ok(true)
    }

    async fn release_claim(&self, fingerprint: &Fingerprint, owner: Uuid) -> Result<()> {
        let mut claims = self.claims.lock().await;
        if claims.get(fingerprint).is_some_and(|(holder, _)| *holder == owner) {
            claims.remove(fingerprint);
        }
        Ok(())
    }

    async fn record(&self, record: &DeliveryRecord) -> Result<RecordResult> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Repository("ledger unavailable".to_string()));
        }
        let mut records = self.records.lock().await;
        // Same rule as the partial unique index in Postgres.
        if record.outcome == DeliveryOutcome::Success
            && records.iter().any(|r| {
                r.outcome == DeliveryOutcome::Success && r.fingerprint == record.fingerprint
            })
        {
            return Ok(RecordResult::DuplicateSuccess);
        }
        records.push(record.clone());
        Ok(RecordResult::Inserted)
    }

    async fn failures_since(&self, since: DateTime<Utc>) -> Result<Vec<DeliveryRecord>> {
        let records = self.records.lock().await;
        let succeeded: HashSet<&Fingerprint> = records
            .iter()
            .filter(|r| r.outcome == DeliveryOutcome::Success)
            .map(|r| &r.fingerprint)
            .collect();
        let mut failed: Vec<DeliveryRecord> = records
            .iter()
            .filter(|r| {
                r.outcome == DeliveryOutcome::Failed
                    && r.attempted_at >= since
                    && !succeeded.contains(&r.fingerprint)
            })
            .cloned()
            .collect();
        failed.sort_by_key(|r| r.attempted_at);
        Ok(failed)
    }
}

// ---------------------------------------------------------------------------
// Reviews
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoredReview {
    pub tenant_id: TenantId,
    pub snapshot: ReviewSnapshot,
    pub tags: Vec<String>,
    pub assignee: Option<Uuid>,
}

#[derive(Default)]
pub struct InMemoryReviews {
    reviews: RwLock<HashMap<ReviewId, StoredReview>>,
    members: RwLock<HashSet<(TenantId, Uuid)>>,
}

impl InMemoryReviews {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, tenant_id: TenantId, review_id: ReviewId, snapshot: ReviewSnapshot) {
        self.reviews.write().await.insert(
            review_id,
            StoredReview {
                tenant_id,
                snapshot,
                tags: Vec::new(),
                assignee: None,
            },
        );
    }

    pub async fn remove(&self, review_id: ReviewId) {
        self.reviews.write().await.remove(&review_id);
    }

    pub async fn add_member(&self, tenant_id: TenantId, user_id: Uuid) {
        self.members.write().await.insert((tenant_id, user_id));
    }

    pub async fn mark_replied(&self, review_id: ReviewId, at: DateTime<Utc>) {
        if let Some(review) = self.reviews.write().await.get_mut(&review_id) {
            review.snapshot.replied_at = Some(at);
            review.snapshot.needs_action = false;
        }
    }

    pub async fn get(&self, review_id: ReviewId) -> Option<StoredReview> {
        self.reviews.read().await.get(&review_id).cloned()
    }
}

#[async_trait]
impl ReviewStore for InMemoryReviews {
    async fn append_tag(&self, review_id: ReviewId, tag: &str) -> Result<bool> {
        let mut reviews = self.reviews.write().await;
        let review = reviews
            .get_mut(&review_id)
            .ok_or_else(|| Error::NotFound(format!("review {review_id}")))?;
        if review.tags.iter().any(|t| t == tag) {
            return Ok(false);
        }
        review.tags.push(tag.to_string());
        Ok(true)
    }

    async fn set_assignee(
        &self,
        tenant_id: TenantId,
        review_id: ReviewId,
        user_id: Uuid,
    ) -> Result<()> {
        if !self.members.read().await.contains(&(tenant_id, user_id)) {
            return Err(Error::NotTenantMember { tenant_id, user_id });
        }
        let mut reviews = self.reviews.write().await;
        let review = reviews
            .get_mut(&review_id)
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or_else(|| Error::NotFound(format!("review {review_id}")))?;
        review.assignee = Some(user_id);
        Ok(())
    }

    async fn unreplied_reviews(
        &self,
        tenant_id: TenantId,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<(ReviewId, ReviewSnapshot)>> {
        let mut found: Vec<(ReviewId, ReviewSnapshot)> = self
            .reviews
            .read()
            .await
            .iter()
            .filter(|(_, r)| {
                r.tenant_id == tenant_id
                    && r.snapshot.needs_action
                    && r.snapshot.replied_at.is_none()
                    && r.snapshot.created_at < created_before
            })
            .map(|(id, r)| (*id, r.snapshot.clone()))
            .collect();
        found.sort_by_key(|(_, s)| s.created_at);
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryQueue {
    next_receipt: AtomicI64,
    inner: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<(i64, Event)>,
    in_flight: HashMap<i64, Event>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events waiting to be received.
    pub async fn pending(&self) -> Vec<Event> {
        self.inner
            .lock()
            .await
            .ready
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Ready plus in-flight events.
    pub async fn len(&self) -> usize {
        let state = self.inner.lock().await;
        state.ready.len() + state.in_flight.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventQueue for InMemoryQueue {
    async fn publish(&self, event: &Event) -> Result<()> {
        let receipt = self.next_receipt.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .lock()
            .await
            .ready
            .push_back((receipt, event.clone()));
        Ok(())
    }

    async fn receive(&self) -> Result<Option<QueuedEvent>> {
        let mut state = self.inner.lock().await;
        let Some((receipt, event)) = state.ready.pop_front() else {
            return Ok(None);
        };
        state.in_flight.insert(receipt, event.clone());
        Ok(Some(QueuedEvent { receipt, event }))
    }

    async fn ack(&self, receipt: i64) -> Result<()> {
        self.inner.lock().await.in_flight.remove(&receipt);
        Ok(())
    }

    async fn retry_later(&self, receipt: i64) -> Result<()> {
        let mut state = self.inner.lock().await;
        if let Some(event) = state.in_flight.remove(&receipt) {
            state.ready.push_back((receipt, event));
        }
        Ok(())
    }
}
