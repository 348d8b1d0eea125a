//! Dispatch coordinator: fingerprint claim, executor call, ledger write,
//! counter update. Each (automation, event) pair runs in its own task so one
//! slow or failing action never holds up its siblings.
//!
//! An executor only runs while this worker holds the fingerprint's claim in
//! the ledger, and only if no success is recorded for it. Concurrent copies
//! of the same event therefore execute the action at most once, across
//! processes as well as within one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use super::matcher::{Match, MatchSet};
use crate::action::{ActionError, ActionExecutors, ActionOutcome};
use crate::error::{Error, Result};
use crate::model::{Automation, DeliveryOutcome, DeliveryRecord, Event, Fingerprint, TenantId};
use crate::repo::{DeliveryLedger, RecordResult, RuleRepository};
use crate::telemetry::dispatch::{record_outcome, start_delivery_span};
use crate::telemetry::metrics;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Concurrent action executions allowed per tenant.
    pub per_tenant_concurrency: usize,
    /// Upper bound on a single executor call.
    pub action_timeout: Duration,
    /// How long a fingerprint claim survives a worker that never releases it.
    /// Must outlast `action_timeout` plus the ledger writes.
    pub claim_lease: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            per_tenant_concurrency: 8,
            action_timeout: Duration::from_secs(5),
            claim_lease: Duration::from_secs(35),
        }
    }
}

/// Result of trying to take a pair for execution.
enum Admission {
    Acquired,
    Delivered,
    InProgress,
}

#[derive(Clone)]
pub struct DispatchCoordinator {
    rules: Arc<dyn RuleRepository>,
    ledger: Arc<dyn DeliveryLedger>,
    executors: Arc<ActionExecutors>,
    config: DispatchConfig,
    tenant_limits: Arc<Mutex<HashMap<TenantId, Arc<Semaphore>>>>,
}

impl DispatchCoordinator {
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        ledger: Arc<dyn DeliveryLedger>,
        executors: Arc<ActionExecutors>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            rules,
            ledger,
            executors,
            config,
            tenant_limits: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Dispatch every pair in the match set and collect one record per pair.
    ///
    /// Pairs already delivered, or being delivered by another worker, come
    /// back as in-memory `skipped` records; they are not written to the
    /// ledger. If any pair's record could not be written, every pair still
    /// runs to completion and the first such error is returned so the event
    /// is redelivered.
    pub async fn dispatch(&self, match_set: MatchSet) -> Result<Vec<DeliveryRecord>> {
        let mut tasks = JoinSet::new();
        for m in match_set {
            let this = self.clone();
            let span = start_delivery_span(&m);
            tasks.spawn(async move { this.dispatch_one(m).await }.instrument(span));
        }

        let mut records = Vec::with_capacity(tasks.len());
        let mut unrecorded = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(record)) => records.push(record),
                Ok(Err(e)) => {
                    unrecorded.get_or_insert(e);
                }
                Err(e) => error!("dispatch task panicked: {e}"),
            }
        }
        match unrecorded {
            Some(e) => Err(e),
            None => Ok(records),
        }
    }

    /// Tenants with a concurrency limiter currently in use.
    pub async fn tracked_tenants(&self) -> usize {
        self.tenant_limits.lock().await.len()
    }

    async fn dispatch_one(&self, m: Match) -> Result<DeliveryRecord> {
        let tenant_id = m.event.tenant_id();
        let limiter = self.limiter(tenant_id).await;
        let result = match limiter.acquire().await {
            Ok(_permit) => self.deliver(m).await,
            Err(e) => Err(Error::Other(format!("tenant limiter closed: {e}"))),
        };
        drop(limiter);
        self.forget_idle_limiter(tenant_id).await;
        result
    }

    async fn deliver(&self, m: Match) -> Result<DeliveryRecord> {
        let Match { automation, event } = m;
        let fingerprint = Fingerprint::compute(automation.id, automation.trigger, &event);
        let action_type = automation.action_type();
        let owner = Uuid::new_v4();

        match self.admit(&fingerprint, owner).await {
            Ok(Admission::Acquired) => {}
            Ok(Admission::Delivered) => {
                debug!(%fingerprint, "already delivered, skipping");
                record_metric(action_type.as_str(), "duplicate");
                return Ok(skipped(&automation, fingerprint, &event, "already delivered"));
            }
            Ok(Admission::InProgress) => {
                debug!(%fingerprint, "claimed by another worker, skipping");
                record_metric(action_type.as_str(), "duplicate");
                return Ok(skipped(&automation, fingerprint, &event, "delivery in progress"));
            }
            Err(e) => {
                // Without the ledger we cannot prove at-most-once; do not act.
                warn!(%fingerprint, error = %e, "ledger check failed");
                let record = DeliveryRecord::new(
                    automation.id,
                    fingerprint,
                    DeliveryOutcome::Failed,
                    Some(format!("ledger check failed: {e}")),
                    (*event).clone(),
                )
                .retryable(true);
                record_metric(action_type.as_str(), "failed");
                self.ledger.record(&record).await?;
                return Ok(record);
            }
        }

        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.config.action_timeout,
            self.executors.execute(&automation, &event),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ActionError::Transient(format!(
                "timed out after {}ms",
                self.config.action_timeout.as_millis()
            ))),
        };
        metrics::action_duration_ms().record(
            started.elapsed().as_millis() as f64,
            &[KeyValue::new("action_type", action_type.as_str())],
        );

        let (outcome, detail, retryable) = match result {
            Ok(ActionOutcome::Delivered) => (DeliveryOutcome::Success, None, false),
            Ok(ActionOutcome::Skipped(reason)) => (DeliveryOutcome::Skipped, Some(reason), false),
            Err(e) => (DeliveryOutcome::Failed, Some(e.to_string()), e.is_transient()),
        };
        let record = DeliveryRecord::new(
            automation.id,
            fingerprint,
            outcome,
            detail,
            (*event).clone(),
        )
        .retryable(retryable);
        record_metric(action_type.as_str(), outcome.as_str());

        if outcome == DeliveryOutcome::Success {
            self.settle_success(&automation, &event, &record, owner).await;
            return Ok(record);
        }

        match outcome {
            DeliveryOutcome::Failed => warn!(
                automation_id = %automation.id,
                review_id = %event.review_id(),
                action_type = %action_type,
                error = record.error.as_deref().unwrap_or_default(),
                "action failed"
            ),
            _ => debug!(
                automation_id = %automation.id,
                reason = record.error.as_deref().unwrap_or_default(),
                "action skipped"
            ),
        }
        let written = self.ledger.record(&record).await;
        self.release(&record.fingerprint, owner).await;
        if let Err(e) = written {
            error!(
                fingerprint = %record.fingerprint,
                outcome = %record.outcome,
                error = %e,
                "failed to write delivery record"
            );
            return Err(e);
        }
        Ok(record)
    }

    /// Success check, claim, then a second success check: a previous holder
    /// may have recorded its success and released between the first check
    /// and our claim.
    async fn admit(&self, fingerprint: &Fingerprint, owner: Uuid) -> Result<Admission> {
        if self.ledger.has_success(fingerprint).await? {
            return Ok(Admission::Delivered);
        }
        if !self
            .ledger
            .try_claim(fingerprint, owner, self.config.claim_lease)
            .await?
        {
            return Ok(Admission::InProgress);
        }
        match self.ledger.has_success(fingerprint).await {
            Ok(false) => Ok(Admission::Acquired),
            Ok(true) => {
                self.release(fingerprint, owner).await;
                Ok(Admission::Delivered)
            }
            Err(e) => {
                self.release(fingerprint, owner).await;
                Err(e)
            }
        }
    }

    async fn settle_success(
        &self,
        automation: &Automation,
        event: &Event,
        record: &DeliveryRecord,
        owner: Uuid,
    ) {
        match self.ledger.record(record).await {
            Ok(RecordResult::Inserted) => {}
            Ok(RecordResult::DuplicateSuccess) => {
                // Only reachable when a lease expired mid-delivery.
                warn!(
                    fingerprint = %record.fingerprint,
                    "success already recorded after claim lease expired"
                );
            }
            Err(e) => {
                // The action ran. Keep the claim so redelivery inside the
                // lease cannot run it again; the event itself is settled.
                error!(
                    fingerprint = %record.fingerprint,
                    error = %e,
                    "action succeeded but its success record was not written"
                );
                return;
            }
        }
        self.release(&record.fingerprint, owner).await;

        // Counters are informational: a failure here leaves them stale
        // until the next successful dispatch.
        if let Err(e) = self
            .rules
            .increment_trigger_counters(automation.id, record.attempted_at)
            .await
        {
            warn!(automation_id = %automation.id, error = %e, "trigger counter update failed");
        }
        info!(
            automation_id = %automation.id,
            review_id = %event.review_id(),
            action_type = %automation.action_type(),
            "automation fired"
        );
    }

    async fn release(&self, fingerprint: &Fingerprint, owner: Uuid) {
        if let Err(e) = self.ledger.release_claim(fingerprint, owner).await {
            warn!(%fingerprint, error = %e, "claim release failed, lease will expire");
        }
    }

    async fn limiter(&self, tenant_id: TenantId) -> Arc<Semaphore> {
        let mut limits = self.tenant_limits.lock().await;
        let permits = self.config.per_tenant_concurrency.max(1);
        Arc::clone(
            limits
                .entry(tenant_id)
                .or_insert_with(|| Arc::new(Semaphore::new(permits))),
        )
    }

    /// Drop a tenant's limiter once no task holds it. Clones are only made
    /// under the map lock, so a count of one means nobody else can be using it.
    async fn forget_idle_limiter(&self, tenant_id: TenantId) {
        let mut limits = self.tenant_limits.lock().await;
        if limits
            .get(&tenant_id)
            .is_some_and(|limiter| Arc::strong_count(limiter) == 1)
        {
            limits.remove(&tenant_id);
        }
    }
}

fn skipped(
    automation: &Automation,
    fingerprint: Fingerprint,
    event: &Event,
    reason: &str,
) -> DeliveryRecord {
    DeliveryRecord::new(
        automation.id,
        fingerprint,
        DeliveryOutcome::Skipped,
        Some(reason.to_string()),
        event.clone(),
    )
}

fn record_metric(action_type: &'static str, outcome: &'static str) {
    record_outcome(&tracing::Span::current(), outcome);
    metrics::deliveries().add(
        1,
        &[
            KeyValue::new("action_type", action_type),
            KeyValue::new("outcome", outcome),
        ],
    );
}
