//! Scheduled trigger scanner.
//!
//! Each cycle goes `Idle -> Scanning -> Emitting -> Idle`: find tenants with
//! an active `no_reply_24h` automation, find their reviews left unreplied past
//! the cutoff, and publish a `no_reply_elapsed` event for each. The ledger's
//! fingerprint (which ignores the scan slot for this kind) keeps later cycles
//! from firing again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::control::Shutdown;
use crate::error::Result;
use crate::model::{Event, EventKind, TriggerType};
use crate::repo::{EventQueue, ReviewStore, RuleRepository};
use crate::telemetry::metrics::{self, PublishSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    Emitting,
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub interval: Duration,
    /// How long a review may stay unreplied before it qualifies.
    pub no_reply_after: chrono::Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            no_reply_after: chrono::Duration::hours(24),
        }
    }
}

/// Summary of one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub tenants: usize,
    pub emitted: usize,
    pub failed_tenants: usize,
}

pub struct TriggerScanner {
    rules: Arc<dyn RuleRepository>,
    reviews: Arc<dyn ReviewStore>,
    queue: Arc<dyn EventQueue>,
    config: ScannerConfig,
    state: watch::Sender<ScanState>,
    shutdown: Shutdown,
}

impl TriggerScanner {
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        reviews: Arc<dyn ReviewStore>,
        queue: Arc<dyn EventQueue>,
        config: ScannerConfig,
        shutdown: Shutdown,
    ) -> Self {
        let (state, _) = watch::channel(ScanState::Idle);
        Self {
            rules,
            reviews,
            queue,
            config,
            state,
            shutdown,
        }
    }

    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.state.subscribe()
    }

    /// Scan on every interval tick until shutdown.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.config.interval.as_secs(), "trigger scanner started");

        loop {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            if self.shutdown.is_triggered() {
                info!("shutdown in progress, skipping scan");
                break;
            }
            if let Err(e) = self.scan_once(Utc::now()).await {
                error!("scan cycle failed: {e}");
            }
        }
        info!("trigger scanner stopped");
    }

    /// Run one cycle as of `now`.
    pub async fn scan_once(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        self.state.send_replace(ScanState::Scanning);
        let result = self.scan(now).await;
        self.state.send_replace(ScanState::Idle);
        result
    }

    async fn scan(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let tenants = self
            .rules
            .tenants_with_active_trigger(TriggerType::NoReply24h)
            .await?;
        let cutoff = now - self.config.no_reply_after;
        let slot = scan_slot(now, self.config.interval);

        let mut candidates = Vec::new();
        let mut report = ScanReport {
            tenants: tenants.len(),
            ..ScanReport::default()
        };
        for tenant_id in tenants {
            match self.reviews.unreplied_reviews(tenant_id, cutoff).await {
                Ok(reviews) => {
                    debug!(tenant_id = %tenant_id, count = reviews.len(), "unreplied reviews");
                    candidates.extend(reviews.into_iter().map(|(review_id, snapshot)| {
                        Event::no_reply_elapsed(tenant_id, review_id, snapshot, slot)
                    }));
                }
                Err(e) => {
                    warn!(tenant_id = %tenant_id, "unreplied review query failed: {e}");
                    report.failed_tenants += 1;
                }
            }
        }

        self.state.send_replace(ScanState::Emitting);
        for event in &candidates {
            match self.queue.publish(event).await {
                Ok(()) => report.emitted += 1,
                Err(e) => warn!(review_id = %event.review_id(), "failed to publish: {e}"),
            }
        }

        metrics::record_published(
            EventKind::NoReplyElapsed,
            PublishSource::Scanner,
            report.emitted as u64,
        );
        info!(
            tenants = report.tenants,
            emitted = report.emitted,
            failed_tenants = report.failed_tenants,
            "scan cycle complete"
        );
        Ok(report)
    }
}

/// `now` truncated to a multiple of the scan interval.
pub fn scan_slot(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let secs = interval.as_secs().max(1) as i64;
    let ts = now.timestamp();
    DateTime::from_timestamp(ts - ts.rem_euclid(secs), 0).unwrap_or(now)
}
