//! The automation engine: ingestion, matching, dispatch, scanning.
//!
//! [`Engine`] wires the components over a set of collaborators and runs the
//! control plane, trigger scanner and retry sweep until shutdown.

pub mod cache;
pub mod control;
pub mod dispatch;
pub mod evaluator;
pub mod ingest;
pub mod matcher;
pub mod retry;
pub mod scanner;

use std::sync::Arc;

use tracing::info;

pub use control::{ControlConfig, ControlPlane, Shutdown};
pub use dispatch::{DispatchConfig, DispatchCoordinator};
pub use ingest::{Ingest, ReviewLifecycle};
pub use matcher::{Match, MatchSet, RuleMatcher};
pub use retry::{RetryConfig, RetrySweep};
pub use scanner::{ScanReport, ScanState, ScannerConfig, TriggerScanner};

use crate::action::{ActionExecutors, Mailer};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::repo::{DeliveryLedger, EventQueue, ReviewStore, RuleRepository};

/// The collaborators the engine runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub rules: Arc<dyn RuleRepository>,
    pub ledger: Arc<dyn DeliveryLedger>,
    pub reviews: Arc<dyn ReviewStore>,
    pub queue: Arc<dyn EventQueue>,
    pub mailer: Arc<dyn Mailer>,
}

/// A fully wired engine.
pub struct Engine {
    pub control: ControlPlane,
    pub scanner: Arc<TriggerScanner>,
    pub retry: Arc<RetrySweep>,
    pub ingest: Ingest,
    pub matcher: Arc<RuleMatcher>,
    pub dispatcher: DispatchCoordinator,
    shutdown: Shutdown,
}

impl Engine {
    pub fn new(parts: Collaborators, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let shutdown = Shutdown::new();
        let executors = Arc::new(ActionExecutors::new(
            Arc::clone(&parts.mailer),
            Arc::clone(&parts.reviews),
            config.action_timeout(),
        )?);
        let matcher = Arc::new(RuleMatcher::new(
            Arc::clone(&parts.rules),
            config.cache_ttl(),
        ));
        let dispatcher = DispatchCoordinator::new(
            Arc::clone(&parts.rules),
            Arc::clone(&parts.ledger),
            executors,
            config.dispatch(),
        );
        let control = ControlPlane::new(
            Arc::clone(&parts.queue),
            Arc::clone(&matcher),
            dispatcher.clone(),
            config.control(),
            shutdown.clone(),
        );
        let scanner = Arc::new(TriggerScanner::new(
            Arc::clone(&parts.rules),
            Arc::clone(&parts.reviews),
            Arc::clone(&parts.queue),
            config.scanner(),
            shutdown.clone(),
        ));
        let retry = Arc::new(RetrySweep::new(
            Arc::clone(&parts.ledger),
            Arc::clone(&parts.queue),
            config.retry(),
            shutdown.clone(),
        ));

        Ok(Self {
            control,
            scanner,
            retry,
            ingest: Ingest::new(parts.queue),
            matcher,
            dispatcher,
            shutdown,
        })
    }

    /// A handle that stops every component when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run the control plane, scanner and retry sweep until shutdown.
    pub async fn run(&self) -> Result<()> {
        let scanner = Arc::clone(&self.scanner);
        let retry = Arc::clone(&self.retry);
        let scanner_task = tokio::spawn(async move { scanner.run().await });
        let retry_task = tokio::spawn(async move { retry.run().await });

        let result = self.control.run().await;

        // The control plane only returns on shutdown or fatal error; make sure
        // the background loops stop either way.
        self.shutdown.trigger();
        let _ = scanner_task.await;
        let _ = retry_task.await;
        info!("engine stopped");
        result
    }
}
