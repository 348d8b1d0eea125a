//! Shared fixtures: in-memory collaborators wired into an engine.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use review_automation::action::{MailMessage, MailReceipt, Mailer};
use review_automation::config::EngineConfig;
use review_automation::engine::{Collaborators, Engine};
use review_automation::error::Result;
use review_automation::model::*;
use review_automation::repo::in_memory::{
    InMemoryLedger, InMemoryQueue, InMemoryReviews, InMemoryRules,
};
use tokio::sync::Mutex;

/// Mailer that keeps every message it is asked to send.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<MailMessage>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &MailMessage) -> Result<MailReceipt> {
        self.sent.lock().await.push(message.clone());
        Ok(MailReceipt {
            accepted: message.to.clone(),
            rejected: Vec::new(),
        })
    }
}

pub struct Harness {
    pub tenant: TenantId,
    pub rules: Arc<InMemoryRules>,
    pub ledger: Arc<InMemoryLedger>,
    pub reviews: Arc<InMemoryReviews>,
    pub queue: Arc<InMemoryQueue>,
    pub mailer: Arc<RecordingMailer>,
    pub engine: Engine,
}

/// Engine over fresh in-memory collaborators. The rule cache is disabled
/// so rule edits are visible to the next event.
pub fn harness() -> Harness {
    harness_with(test_config())
}

/// Fast-polling config with the rule cache disabled.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        cache_ttl_secs: 0,
        action_timeout_secs: 2,
        workers: 4,
        poll_interval_ms: 10,
        event_retry_backoff_ms: 20,
        ..EngineConfig::default()
    }
}

/// Run the engine in the background until `done` holds, then shut it down
/// and wait for it to stop.
pub async fn run_until(engine: Engine, done: impl AsyncFn() -> bool) {
    let engine = Arc::new(engine);
    let shutdown = engine.shutdown_handle();
    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run().await })
    };

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while !done().await {
        assert!(tokio::time::Instant::now() < deadline, "engine did not reach the expected state");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    shutdown.trigger();
    tokio::time::timeout(std::time::Duration::from_secs(5), runner)
        .await
        .expect("engine should stop")
        .expect("engine task should not panic")
        .expect("engine should stop cleanly");
}

pub fn harness_with(config: EngineConfig) -> Harness {
    let mailer = Arc::new(RecordingMailer::default());
    build(config, mailer.clone(), mailer)
}

/// Engine whose email alerts go through `sender`. The harness's recording
/// mailer stays empty.
pub fn harness_sending_via(config: EngineConfig, sender: Arc<dyn Mailer>) -> Harness {
    build(config, sender, Arc::new(RecordingMailer::default()))
}

fn build(config: EngineConfig, sender: Arc<dyn Mailer>, mailer: Arc<RecordingMailer>) -> Harness {
    let rules = Arc::new(InMemoryRules::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let reviews = Arc::new(InMemoryReviews::new());
    let queue = Arc::new(InMemoryQueue::new());

    let engine = Engine::new(
        Collaborators {
            rules: rules.clone(),
            ledger: ledger.clone(),
            reviews: reviews.clone(),
            queue: queue.clone(),
            mailer: sender,
        },
        &config,
    )
    .expect("engine should build");

    Harness {
        tenant: TenantId::new(),
        rules,
        ledger,
        reviews,
        queue,
        mailer,
        engine,
    }
}

pub fn snapshot(rating: Option<i32>, body: &str) -> ReviewSnapshot {
    snapshot_at(rating, body, Utc::now())
}

pub fn snapshot_at(rating: Option<i32>, body: &str, created_at: DateTime<Utc>) -> ReviewSnapshot {
    ReviewSnapshot {
        rating,
        sentiment: None,
        body: body.to_string(),
        platform: "google".to_string(),
        author_name: Some("Dana".to_string()),
        needs_action: true,
        replied_at: None,
        created_at,
    }
}

pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}

pub fn tag_action(tag: &str) -> ActionConfig {
    ActionConfig::from_parts("tag_review", &serde_json::json!({ "tag": tag }))
        .expect("valid tag config")
}

pub fn webhook_action(url: &str, secret: Option<&str>) -> ActionConfig {
    let config = match secret {
        Some(secret) => serde_json::json!({ "url": url, "secret": secret }),
        None => serde_json::json!({ "url": url }),
    };
    ActionConfig::from_parts("webhook", &config).expect("valid webhook config")
}

pub fn email_action(recipients: &[&str]) -> ActionConfig {
    ActionConfig::from_parts("email_alert", &serde_json::json!({ "recipients": recipients }))
        .expect("valid email config")
}

impl Harness {
    pub async fn add_rule(
        &self,
        name: &str,
        trigger: TriggerType,
        conditions: Conditions,
        action: ActionConfig,
    ) -> AutomationId {
        let automation = NewAutomation::new(self.tenant, name, trigger, action)
            .conditions(conditions)
            .build();
        self.rules.insert(automation).await
    }

    /// Store a review and return a `created` event for it.
    pub async fn new_review(&self, snapshot: ReviewSnapshot) -> Event {
        let review_id = ReviewId::new();
        self.reviews
            .insert(self.tenant, review_id, snapshot.clone())
            .await;
        Event::new(self.tenant, review_id, EventKind::Created, snapshot)
    }
}
