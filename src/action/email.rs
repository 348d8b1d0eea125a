//! Email alerts through an external mail-sending collaborator.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ActionError, ActionOutcome, ActionResult};
use crate::error::{Error, Result};
use crate::model::automation::EmailConfig;
use crate::model::{Automation, Event};

/// A rendered message ready to hand to a mailer.
#[derive(Debug, Clone, Serialize)]
pub struct MailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
}

/// Per-recipient result of a send.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailReceipt {
    #[serde(default)]
    pub accepted: Vec<String>,
    #[serde(default)]
    pub rejected: Vec<String>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<MailReceipt>;
}

/// Mailer that posts JSON to a transactional-mail HTTP API.
///
/// Request: `{from, to, subject, text}` with an optional bearer key.
/// Response (optional): `{accepted: [...], rejected: [...]}`; an empty body
/// means every recipient was accepted.
pub struct HttpMailer {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    from: String,
}

impl HttpMailer {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: Option<SecretString>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key,
            from: from.into(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &MailMessage) -> Result<MailReceipt> {
        let body = serde_json::json!({
            "from": self.from,
            "to": message.to,
            "subject": message.subject,
            "text": message.text,
        });
        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await?.error_for_status()?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(MailReceipt {
                accepted: message.to.clone(),
                rejected: Vec::new(),
            });
        }
        let mut receipt: MailReceipt = serde_json::from_str(&text)?;
        if receipt.accepted.is_empty() && receipt.rejected.is_empty() {
            receipt.accepted = message.to.clone();
        }
        Ok(receipt)
    }
}

/// Mailer that only logs. Used when no mail API is configured.
pub struct TracingMailer;

#[async_trait]
impl Mailer for TracingMailer {
    async fn send(&self, message: &MailMessage) -> Result<MailReceipt> {
        info!(to = ?message.to, subject = %message.subject, "mail not sent: no mail API configured");
        Ok(MailReceipt {
            accepted: message.to.clone(),
            rejected: Vec::new(),
        })
    }
}

pub async fn send_alert(
    mailer: &dyn Mailer,
    config: &EmailConfig,
    automation: &Automation,
    event: &Event,
) -> ActionResult {
    let message = render(config, automation, event);
    if message.to.is_empty() {
        return Err(ActionError::Permanent("no recipients".to_string()));
    }

    let receipt = mailer.send(&message).await.map_err(|e| match e {
        Error::Http(ref http) if http.status().is_some_and(|s| s.is_client_error()) => {
            ActionError::Permanent(e.to_string())
        }
        other => ActionError::Transient(other.to_string()),
    })?;

    let all_rejected = !message.to.is_empty()
        && message
            .to
            .iter()
            .all(|r| receipt.rejected.iter().any(|x| x.eq_ignore_ascii_case(r)));
    if all_rejected {
        return Err(ActionError::Permanent(format!(
            "all recipients rejected: {}",
            receipt.rejected.join(", ")
        )));
    }
    Ok(ActionOutcome::Delivered)
}

/// Short templated alert for one event.
pub fn render(config: &EmailConfig, automation: &Automation, event: &Event) -> MailMessage {
    let snapshot = event.snapshot();
    let rating = snapshot
        .rating
        .map(|r| format!("{r}-star"))
        .unwrap_or_else(|| "Unrated".to_string());
    let author = snapshot.author_name.as_deref().unwrap_or("A customer");

    let subject = format!(
        "[{}] {} review on {}",
        automation.name, rating, snapshot.platform
    );
    let mut text = format!(
        "{author} left a {} review on {}.\n\n\"{}\"\n",
        rating.to_lowercase(),
        snapshot.platform,
        snapshot.body.trim()
    );
    if let Some(sentiment) = &snapshot.sentiment {
        text.push_str(&format!("\nSentiment: {sentiment}"));
    }
    text.push_str(&format!(
        "\nReceived: {}\nReview ID: {}\n\nSent by automation \"{}\".\n",
        snapshot.created_at.format("%Y-%m-%d %H:%M UTC"),
        event.review_id(),
        automation.name
    ));

    MailMessage {
        to: config
            .recipients
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect(),
        subject,
        text,
    }
}
