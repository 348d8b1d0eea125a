//! Action executors, one per action type.
//!
//! The set of action types is closed, so dispatch is a match on
//! [`ActionConfig`] rather than a trait-object registry. Each executor makes
//! at most one outbound call, bounded by the client's request timeout.

pub mod chat;
pub mod email;
pub mod review;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::error::Result;
use crate::model::{ActionConfig, Automation, Event};
use crate::repo::ReviewStore;

pub use email::{HttpMailer, MailMessage, MailReceipt, Mailer, TracingMailer};

/// What an executor did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Delivered,
    /// Nothing to do, e.g. the target review no longer exists.
    Skipped(String),
}

/// Why an executor failed. Neither kind is retried inline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// Timeout, connection failure, 5xx.
    #[error("transient: {0}")]
    Transient(String),
    /// 4xx, invalid recipient, invalid assignee.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl ActionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ActionError::Transient(_))
    }
}

pub type ActionResult = std::result::Result<ActionOutcome, ActionError>;

/// Executes automations' actions against their external collaborators.
pub struct ActionExecutors {
    http: reqwest::Client,
    mailer: Arc<dyn Mailer>,
    reviews: Arc<dyn ReviewStore>,
}

impl ActionExecutors {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        reviews: Arc<dyn ReviewStore>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("review-automation/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            mailer,
            reviews,
        })
    }

    pub async fn execute(&self, automation: &Automation, event: &Event) -> ActionResult {
        match &automation.action {
            ActionConfig::EmailAlert(config) => {
                email::send_alert(self.mailer.as_ref(), config, automation, event).await
            }
            ActionConfig::SlackNotification(config) => {
                chat::notify(&self.http, chat::Channel::Slack, config, automation, event).await
            }
            ActionConfig::TeamsNotification(config) => {
                chat::notify(&self.http, chat::Channel::Teams, config, automation, event).await
            }
            ActionConfig::Webhook(config) => {
                webhook::deliver(&self.http, config, automation, event).await
            }
            ActionConfig::TagReview(config) => {
                review::tag(self.reviews.as_ref(), config, event).await
            }
            ActionConfig::AssignReview(config) => {
                review::assign(self.reviews.as_ref(), config, event).await
            }
        }
    }
}

/// Outbound notification body: `{event, automation: {id, name}}`.
pub fn notification_payload(automation: &Automation, event: &Event) -> serde_json::Value {
    json!({
        "event": event,
        "automation": {
            "id": automation.id,
            "name": automation.name,
        },
    })
}

/// POST a body and classify the response: 2xx ok, 5xx transient, else permanent.
pub(crate) async fn post(request: reqwest::RequestBuilder) -> ActionResult {
    let response = request.send().await.map_err(classify_send_error)?;
    let status = response.status();
    if status.is_success() {
        Ok(ActionOutcome::Delivered)
    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(ActionError::Transient(format!("HTTP {status}")))
    } else {
        Err(ActionError::Permanent(format!("HTTP {status}")))
    }
}

fn classify_send_error(e: reqwest::Error) -> ActionError {
    if e.is_builder() {
        ActionError::Permanent(format!("bad request: {e}"))
    } else {
        ActionError::Transient(e.to_string())
    }
}
