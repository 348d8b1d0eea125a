//! Automation definitions: trigger types, condition sets, and action configs.
//!
//! Rule rows arrive from the repository as loosely-typed JSON. They are parsed
//! into the tagged unions here once, at load time, so evaluation and dispatch
//! only ever see well-formed configurations.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::TenantId;
use super::event::EventKind;
use crate::error::{Error, Result};

/// Newtype for automation IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AutomationId(pub Uuid);

impl AutomationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AutomationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AutomationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// The category of condition an automation evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    NewReview,
    RatingBelow,
    RatingAbove,
    SentimentNegative,
    KeywordMatch,
    #[serde(rename = "no_reply_24h")]
    NoReply24h,
}

impl TriggerType {
    pub const ALL: [TriggerType; 6] = [
        TriggerType::NewReview,
        TriggerType::RatingBelow,
        TriggerType::RatingAbove,
        TriggerType::SentimentNegative,
        TriggerType::KeywordMatch,
        TriggerType::NoReply24h,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::NewReview => "new_review",
            TriggerType::RatingBelow => "rating_below",
            TriggerType::RatingAbove => "rating_above",
            TriggerType::SentimentNegative => "sentiment_negative",
            TriggerType::KeywordMatch => "keyword_match",
            TriggerType::NoReply24h => "no_reply_24h",
        }
    }

    /// Cheap pre-filter: can an event of this kind ever satisfy the trigger?
    ///
    /// Synthesized `no_reply_elapsed` events only feed `no_reply_24h`, and
    /// `no_reply_24h` only listens to them.
    pub fn accepts(self, kind: EventKind) -> bool {
        match self {
            TriggerType::NewReview => kind == EventKind::Created,
            TriggerType::NoReply24h => kind == EventKind::NoReplyElapsed,
            _ => kind != EventKind::NoReplyElapsed,
        }
    }

    /// Whether the trigger needs `conditions.threshold`.
    pub fn uses_threshold(self) -> bool {
        matches!(self, TriggerType::RatingBelow | TriggerType::RatingAbove)
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TriggerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TriggerType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Other(format!("unknown trigger type: {s}")))
    }
}

/// Condition payload. Which fields matter depends on the trigger type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    /// Rating threshold (1-5) for `rating_below` / `rating_above`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<i32>,
    /// Case-insensitive substrings for `keyword_match`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl Conditions {
    pub fn threshold(threshold: i32) -> Self {
        Self {
            threshold: Some(threshold),
            keywords: Vec::new(),
        }
    }

    pub fn keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            threshold: None,
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }
}

/// Malformed rule configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("{0} requires conditions.threshold")]
    MissingThreshold(TriggerType),

    #[error("threshold {0} is outside 1..=5")]
    ThresholdOutOfRange(i32),

    #[error("malformed conditions payload: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// The category of outbound effect an automation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    EmailAlert,
    SlackNotification,
    TeamsNotification,
    Webhook,
    TagReview,
    AssignReview,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::EmailAlert => "email_alert",
            ActionType::SlackNotification => "slack_notification",
            ActionType::TeamsNotification => "teams_notification",
            ActionType::Webhook => "webhook",
            ActionType::TagReview => "tag_review",
            ActionType::AssignReview => "assign_review",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub recipients: Vec<String>,
}

/// Slack and Teams incoming-webhook target.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    pub webhook_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Signing secret. When present, deliveries carry `X-Signature`.
    #[serde(default)]
    pub secret: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagConfig {
    pub tag: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignConfig {
    pub user_id: Uuid,
}

/// Action configuration, one concrete shape per action type.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action_type", content = "action_config", rename_all = "snake_case")]
pub enum ActionConfig {
    EmailAlert(EmailConfig),
    SlackNotification(ChatConfig),
    TeamsNotification(ChatConfig),
    Webhook(WebhookConfig),
    TagReview(TagConfig),
    AssignReview(AssignConfig),
}

impl ActionConfig {
    /// Parse a stored `(action_type, action_config)` pair and validate it.
    pub fn from_parts(action_type: &str, config: &serde_json::Value) -> Result<Self> {
        let tagged = serde_json::json!({
            "action_type": action_type,
            "action_config": config,
        });
        let action: ActionConfig = serde_json::from_value(tagged)
            .map_err(|e| Error::InvalidAction(format!("{action_type}: {e}")))?;
        action.validate()?;
        Ok(action)
    }

    /// Split into the stored `(action_type, action_config)` representation.
    pub fn to_parts(&self) -> (ActionType, serde_json::Value) {
        let config = match self {
            ActionConfig::EmailAlert(c) => serde_json::json!({ "recipients": c.recipients }),
            ActionConfig::SlackNotification(c) | ActionConfig::TeamsNotification(c) => {
                serde_json::json!({ "webhook_url": c.webhook_url })
            }
            ActionConfig::Webhook(c) => match &c.secret {
                Some(secret) => {
                    serde_json::json!({ "url": c.url, "secret": secret.expose_secret() })
                }
                None => serde_json::json!({ "url": c.url }),
            },
            ActionConfig::TagReview(c) => serde_json::json!({ "tag": c.tag }),
            ActionConfig::AssignReview(c) => serde_json::json!({ "user_id": c.user_id }),
        };
        (self.action_type(), config)
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            ActionConfig::EmailAlert(_) => ActionType::EmailAlert,
            ActionConfig::SlackNotification(_) => ActionType::SlackNotification,
            ActionConfig::TeamsNotification(_) => ActionType::TeamsNotification,
            ActionConfig::Webhook(_) => ActionType::Webhook,
            ActionConfig::TagReview(_) => ActionType::TagReview,
            ActionConfig::AssignReview(_) => ActionType::AssignReview,
        }
    }

    /// Check the fields serde cannot: non-empty lists, parseable URLs.
    pub fn validate(&self) -> Result<()> {
        match self {
            ActionConfig::EmailAlert(c) => {
                if c.recipients.iter().all(|r| r.trim().is_empty()) {
                    return Err(Error::InvalidAction(
                        "email_alert requires at least one recipient".to_string(),
                    ));
                }
            }
            ActionConfig::SlackNotification(c) | ActionConfig::TeamsNotification(c) => {
                validate_url(&c.webhook_url)?;
            }
            ActionConfig::Webhook(c) => validate_url(&c.url)?,
            ActionConfig::TagReview(c) => {
                if c.tag.trim().is_empty() {
                    return Err(Error::InvalidAction(
                        "tag_review requires a non-empty tag".to_string(),
                    ));
                }
            }
            ActionConfig::AssignReview(_) => {}
        }
        Ok(())
    }
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| Error::InvalidAction(format!("bad url {url:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::InvalidAction(format!(
            "unsupported url scheme {other:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Automation
// ---------------------------------------------------------------------------

/// A tenant-scoped rule pairing one trigger with one action.
#[derive(Debug, Clone)]
pub struct Automation {
    pub id: AutomationId,
    pub tenant_id: TenantId,
    pub name: String,
    pub active: bool,
    pub trigger: TriggerType,
    pub conditions: Conditions,
    pub action: ActionConfig,
    /// Set together with `trigger_count` after each successful dispatch.
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub trigger_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Automation {
    pub fn action_type(&self) -> ActionType {
        self.action.action_type()
    }
}

/// Builder for new automations. The CRUD surface's way of creating rules.
#[derive(Debug, Clone)]
pub struct NewAutomation {
    pub(crate) tenant_id: TenantId,
    pub(crate) name: String,
    pub(crate) active: bool,
    pub(crate) trigger: TriggerType,
    pub(crate) conditions: Conditions,
    pub(crate) action: ActionConfig,
}

impl NewAutomation {
    pub fn new(
        tenant_id: TenantId,
        name: impl Into<String>,
        trigger: TriggerType,
        action: ActionConfig,
    ) -> Self {
        Self {
            tenant_id,
            name: name.into(),
            active: true,
            trigger,
            conditions: Conditions::default(),
            action,
        }
    }

    pub fn conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Materialize with a fresh ID and zeroed counters.
    pub fn build(self) -> Automation {
        let now = Utc::now();
        Automation {
            id: AutomationId::new(),
            tenant_id: self.tenant_id,
            name: self.name,
            active: self.active,
            trigger: self.trigger,
            conditions: self.conditions,
            action: self.action,
            last_triggered_at: None,
            trigger_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
