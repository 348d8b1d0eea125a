//! Control plane: pulls events off the queue, routes them to per-review
//! lanes, and settles each one after matching and dispatch.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, warn};

use super::dispatch::DispatchCoordinator;
use super::matcher::RuleMatcher;
use crate::error::Result;
use crate::model::{DeliveryRecord, Event, ReviewId};
use crate::repo::{EventQueue, QueuedEvent};
use crate::telemetry::{dispatch::start_event_span, metrics};

/// Configuration for the control plane.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Number of sequential lanes. Events for one review always share a lane.
    pub workers: usize,
    /// Buffered events per lane before the reader waits.
    pub lane_capacity: usize,
    /// Sleep between queue reads when the queue is empty.
    pub poll_interval: Duration,
    /// Processing attempts per event inside its lane before it is handed
    /// back to the queue. Later events for the same review wait meanwhile.
    pub event_attempts: u32,
    /// Delay before the second attempt; doubles for each one after.
    pub retry_backoff: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            lane_capacity: 64,
            poll_interval: Duration::from_millis(500),
            event_attempts: 3,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

/// Cooperative shutdown flag shared by the control plane, scanner and sweep.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once shutdown has been triggered (immediately if it already was).
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stopping| *stopping).await;
    }
}

/// The control plane loop: read events, route to lanes, match, dispatch.
#[derive(Clone)]
pub struct ControlPlane {
    queue: Arc<dyn EventQueue>,
    matcher: Arc<RuleMatcher>,
    dispatcher: DispatchCoordinator,
    config: ControlConfig,
    shutdown: Shutdown,
}

impl ControlPlane {
    pub fn new(
        queue: Arc<dyn EventQueue>,
        matcher: Arc<RuleMatcher>,
        dispatcher: DispatchCoordinator,
        config: ControlConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            queue,
            matcher,
            dispatcher,
            config,
            shutdown,
        }
    }

    /// Signal the control plane to shut down.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Run until shutdown. In-flight events are finished before returning;
    /// events still buffered in lanes are returned to the queue.
    pub async fn run(&self) -> Result<()> {
        let workers = self.config.workers.max(1);
        let mut lanes = Vec::with_capacity(workers);
        let mut lane_tasks = JoinSet::new();
        for lane in 0..workers {
            let (tx, rx) = mpsc::channel(self.config.lane_capacity.max(1));
            lanes.push(tx);
            let this = self.clone();
            lane_tasks.spawn(async move { this.drain_lane(lane, rx).await });
        }

        info!(workers, "control plane started");

        loop {
            if self.shutdown.is_triggered() {
                break;
            }
            let received = tokio::select! {
                _ = self.shutdown.wait() => break,
                received = self.queue.receive() => received,
            };

            match received {
                Ok(Some(queued)) => {
                    let lane = lane_for(queued.event.review_id(), workers);
                    if lanes[lane].send(queued).await.is_err() {
                        error!(lane, "lane closed unexpectedly");
                        break;
                    }
                }
                Ok(None) => {
                    self.matcher.purge_cache().await;
                    tokio::select! {
                        _ = self.shutdown.wait() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    warn!("queue read error: {e}, backing off");
                    tokio::select! {
                        _ = self.shutdown.wait() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        info!("control plane shutting down, draining lanes");
        drop(lanes);
        while let Some(joined) = lane_tasks.join_next().await {
            if let Err(e) = joined {
                error!("lane task panicked: {e}");
            }
        }
        info!("control plane stopped");
        Ok(())
    }

    /// Match and dispatch one event.
    ///
    /// Fails when the tenant's automations cannot be loaded, or when a
    /// delivery's outcome could not be written to the ledger. Either way the
    /// event should be redelivered; pairs that already succeeded are skipped
    /// by their fingerprint.
    pub async fn process_event(&self, event: Event) -> Result<Vec<DeliveryRecord>> {
        let event = Arc::new(event);
        let match_set = self.matcher.match_event(Arc::clone(&event)).await?;
        if match_set.is_empty() {
            return Ok(Vec::new());
        }
        self.dispatcher.dispatch(match_set).await
    }

    async fn drain_lane(&self, lane: usize, mut rx: mpsc::Receiver<QueuedEvent>) {
        while let Some(queued) = rx.recv().await {
            if self.shutdown.is_triggered() {
                // Not started yet: hand it back rather than process it late.
                if let Err(e) = self.queue.retry_later(queued.receipt).await {
                    warn!(lane, receipt = queued.receipt, "failed to return event: {e}");
                }
                continue;
            }
            let span = start_event_span(&queued.event);
            self.settle(lane, queued).instrument(span).await;
        }
        debug!(lane, "lane drained");
    }

    /// Process an event, retrying in place so the review's later events
    /// stay behind it. Only after the last attempt, or on shutdown, is it
    /// handed back to the queue.
    async fn settle(&self, lane: usize, queued: QueuedEvent) {
        let kind = queued.event.kind().as_str();
        let receipt = queued.receipt;
        let attempts = self.config.event_attempts.max(1);

        let mut attempt = 1;
        let processed = loop {
            let err = match self.process_event(queued.event.clone()).await {
                Ok(records) => break Ok(records),
                Err(e) => e,
            };
            if attempt >= attempts || self.shutdown.is_triggered() {
                break Err(err);
            }
            let delay = self
                .config
                .retry_backoff
                .saturating_mul(2u32.saturating_pow(attempt - 1));
            warn!(lane, receipt, attempt, "event processing failed, retrying: {err}");
            tokio::select! {
                _ = self.shutdown.wait() => break Err(err),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        };

        match processed {
            Ok(records) => {
                debug!(lane, attempt, deliveries = records.len(), "event processed");
                metrics::events_processed().add(
                    1,
                    &[
                        KeyValue::new("event_kind", kind),
                        KeyValue::new("result", "ok"),
                    ],
                );
                if let Err(e) = self.queue.ack(receipt).await {
                    warn!(receipt, "ack failed, event may be redelivered: {e}");
                }
            }
            Err(e) => {
                error!(lane, receipt, attempt, "event processing failed: {e}");
                metrics::events_processed().add(
                    1,
                    &[
                        KeyValue::new("event_kind", kind),
                        KeyValue::new("result", "error"),
                    ],
                );
                if let Err(e) = self.queue.retry_later(receipt).await {
                    warn!(receipt, "failed to return event for retry: {e}");
                }
            }
        }
    }
}

/// Stable lane assignment so a review's events are processed in order.
pub fn lane_for(review_id: ReviewId, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    review_id.hash(&mut hasher);
    (hasher.finish() % lanes.max(1) as u64) as usize
}
