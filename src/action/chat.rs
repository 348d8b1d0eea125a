//! Slack- and Teams-style incoming-webhook notifications.

use serde_json::json;

use super::{ActionResult, notification_payload, post};
use crate::model::automation::ChatConfig;
use crate::model::{Automation, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Slack,
    Teams,
}

pub async fn notify(
    http: &reqwest::Client,
    channel: Channel,
    config: &ChatConfig,
    automation: &Automation,
    event: &Event,
) -> ActionResult {
    let body = payload(channel, automation, event);
    post(http.post(&config.webhook_url).json(&body)).await
}

/// Structured payload plus the display field each channel renders.
pub fn payload(channel: Channel, automation: &Automation, event: &Event) -> serde_json::Value {
    let mut body = notification_payload(automation, event);
    let summary = summary_line(automation, event);
    if let Some(obj) = body.as_object_mut() {
        match channel {
            Channel::Slack => {
                obj.insert("text".to_string(), json!(summary));
            }
            Channel::Teams => {
                obj.insert("@type".to_string(), json!("MessageCard"));
                obj.insert("@context".to_string(), json!("https://schema.org/extensions"));
                obj.insert("summary".to_string(), json!(summary));
                obj.insert("title".to_string(), json!(automation.name));
                obj.insert("text".to_string(), json!(excerpt(&event.snapshot().body)));
            }
        }
    }
    body
}

fn summary_line(automation: &Automation, event: &Event) -> String {
    let snapshot = event.snapshot();
    let rating = snapshot
        .rating
        .map(|r| format!("{r}/5"))
        .unwrap_or_else(|| "unrated".to_string());
    format!(
        "[{}] {} review on {}: \"{}\"",
        automation.name,
        rating,
        snapshot.platform,
        excerpt(&snapshot.body)
    )
}

fn excerpt(body: &str) -> String {
    const MAX_CHARS: usize = 200;
    if body.chars().count() <= MAX_CHARS {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_CHARS).collect();
        format!("{cut}...")
    }
}
