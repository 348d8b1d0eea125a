//! Retry sweep: re-publish events whose dispatch failed recently.
//!
//! Re-publishing is safe because automations that already succeeded for an
//! event are skipped by their fingerprint. Only transient failures are
//! retried: a fingerprint whose latest failure was permanent is left alone.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::control::Shutdown;
use crate::error::Result;
use crate::repo::{DeliveryLedger, EventQueue};
use crate::telemetry::metrics::{self, PublishSource};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Failures older than this are left alone.
    pub window: chrono::Duration,
    pub interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            window: chrono::Duration::hours(24),
            interval: Duration::from_secs(10 * 60),
        }
    }
}

pub struct RetrySweep {
    ledger: Arc<dyn DeliveryLedger>,
    queue: Arc<dyn EventQueue>,
    config: RetryConfig,
    shutdown: Shutdown,
}

impl RetrySweep {
    pub fn new(
        ledger: Arc<dyn DeliveryLedger>,
        queue: Arc<dyn EventQueue>,
        config: RetryConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            ledger,
            queue,
            config,
            shutdown,
        }
    }

    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; give fresh failures a chance to age.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            if self.shutdown.is_triggered() {
                break;
            }
            if let Err(e) = self.sweep_once(Utc::now()).await {
                error!("retry sweep failed: {e}");
            }
        }
        info!("retry sweep stopped");
    }

    /// Re-publish each distinct event with a retryable failure in the window.
    /// Returns how many were published.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let failures = self.ledger.failures_since(now - self.config.window).await?;

        // Oldest first, so the last record seen per fingerprint is the latest.
        let mut latest = HashMap::new();
        for record in failures {
            latest.insert(record.fingerprint.clone(), record);
        }
        let mut retryable: Vec<_> = latest.into_values().filter(|r| r.retryable).collect();
        retryable.sort_by_key(|r| r.attempted_at);

        let mut seen = HashSet::new();
        let mut published = 0;
        for record in retryable {
            if !seen.insert(record.event.id()) {
                continue;
            }
            match self.queue.publish(&record.event).await {
                Ok(()) => {
                    published += 1;
                    metrics::record_published(record.event.kind(), PublishSource::Retry, 1);
                }
                Err(e) => warn!(event_id = %record.event.id(), "retry publish failed: {e}"),
            }
        }
        if published > 0 {
            info!(published, "re-published failed events");
        }
        Ok(published)
    }
}
