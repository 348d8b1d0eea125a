//! Outbound action executors against mock HTTP servers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use review_automation::action::webhook::{SIGNATURE_HEADER, sign, verify};
use review_automation::action::{
    ActionError, ActionExecutors, ActionOutcome, HttpMailer, MailMessage, Mailer,
};
use review_automation::model::*;
use review_automation::repo::in_memory::InMemoryReviews;
use secrecy::SecretString;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn executors(timeout: Duration) -> ActionExecutors {
    ActionExecutors::new(
        Arc::new(RecordingMailer::default()),
        Arc::new(InMemoryReviews::new()),
        timeout,
    )
    .unwrap()
}

fn automation(action: ActionConfig) -> Automation {
    NewAutomation::new(TenantId::new(), "Escalate", TriggerType::NewReview, action).build()
}

fn event() -> Event {
    Event::new(
        TenantId::new(),
        ReviewId::new(),
        EventKind::Created,
        snapshot(Some(1), "The soup was cold and the waiter was rude"),
    )
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn webhook_body_is_signed_with_secret() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header_exists(SIGNATURE_HEADER))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let automation = automation(webhook_action(
        &format!("{}/hook", server.uri()),
        Some("s3cret"),
    ));
    let event = event();
    let outcome = executors(Duration::from_secs(2))
        .execute(&automation, &event)
        .await
        .unwrap();
    assert_eq!(outcome, ActionOutcome::Delivered);

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let signature = request
        .headers
        .get(SIGNATURE_HEADER)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(verify(b"s3cret", &request.body, signature));
    assert!(!verify(b"wrong", &request.body, signature));

    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["automation"]["name"], "Escalate");
    assert_eq!(body["event"]["kind"], "created");
    assert_eq!(body["event"]["snapshot"]["rating"], 1);
}

#[tokio::test]
async fn webhook_without_secret_is_unsigned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let automation = automation(webhook_action(&server.uri(), None));
    executors(Duration::from_secs(2))
        .execute(&automation, &event())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get(SIGNATURE_HEADER).is_none());
}

#[tokio::test]
async fn client_errors_are_permanent_and_server_errors_transient() {
    for (status, permanent) in [(400, true), (404, true), (429, false), (500, false), (503, false)] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let automation = automation(webhook_action(&server.uri(), None));
        let err = executors(Duration::from_secs(2))
            .execute(&automation, &event())
            .await
            .unwrap_err();
        assert_eq!(
            matches!(err, ActionError::Permanent(_)),
            permanent,
            "status {status}: {err}"
        );
    }
}

#[tokio::test]
async fn slow_endpoint_times_out_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let automation = automation(webhook_action(&server.uri(), None));
    let err = executors(Duration::from_millis(200))
        .execute(&automation, &event())
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::Transient(_)), "{err}");
}

#[test]
fn signature_is_hex_hmac_sha256() {
    // RFC 4231 test case 2.
    let signature = sign(b"Jefe", b"what do ya want for nothing?").unwrap();
    assert_eq!(
        signature,
        "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
    );
    assert!(verify(b"Jefe", b"what do ya want for nothing?", &signature));
    assert!(!verify(b"Jefe", b"tampered", &signature));
    assert!(!verify(b"Jefe", b"what do ya want for nothing?", "not-hex"));
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slack_payload_carries_text_and_structured_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let action = ActionConfig::from_parts(
        "slack_notification",
        &serde_json::json!({ "webhook_url": server.uri() }),
    )
    .unwrap();
    executors(Duration::from_secs(2))
        .execute(&automation(action), &event())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let text = body["text"].as_str().unwrap();
    assert!(text.contains("[Escalate]"));
    assert!(text.contains("1/5"));
    assert!(body["event"]["review_id"].is_string());
}

#[tokio::test]
async fn teams_payload_is_a_message_card() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let action = ActionConfig::from_parts(
        "teams_notification",
        &serde_json::json!({ "webhook_url": server.uri() }),
    )
    .unwrap();
    executors(Duration::from_secs(2))
        .execute(&automation(action), &event())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["@type"], "MessageCard");
    assert_eq!(body["title"], "Escalate");
    assert_eq!(body["automation"]["name"], "Escalate");
}

// ---------------------------------------------------------------------------
// Config validation
// ---------------------------------------------------------------------------

#[test]
fn malformed_action_configs_are_rejected() {
    let bad = [
        ("email_alert", serde_json::json!({ "recipients": [] })),
        ("email_alert", serde_json::json!({})),
        ("slack_notification", serde_json::json!({ "webhook_url": "not a url" })),
        ("webhook", serde_json::json!({ "url": "ftp://example.com/hook" })),
        ("tag_review", serde_json::json!({ "tag": "  " })),
        ("assign_review", serde_json::json!({ "user_id": "nope" })),
        ("carrier_pigeon", serde_json::json!({})),
    ];
    for (action_type, config) in bad {
        assert!(
            ActionConfig::from_parts(action_type, &config).is_err(),
            "{action_type} {config}"
        );
    }
}

#[test]
fn action_config_round_trips_through_parts() {
    let action = webhook_action("https://example.com/hook", Some("k"));
    let (action_type, config) = action.to_parts();
    assert_eq!(action_type, ActionType::Webhook);
    let parsed = ActionConfig::from_parts(action_type.as_str(), &config).unwrap();
    assert_eq!(parsed.action_type(), ActionType::Webhook);
}

// ---------------------------------------------------------------------------
// Mail API
// ---------------------------------------------------------------------------

#[tokio::test]
async fn http_mailer_posts_with_bearer_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/send"))
        .and(header("authorization", "Bearer mail-key"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mailer = HttpMailer::new(
        reqwest::Client::new(),
        format!("{}/send", server.uri()),
        Some(SecretString::from("mail-key".to_string())),
        "alerts@example.com",
    );
    let receipt = mailer
        .send(&MailMessage {
            to: vec!["ops@example.com".to_string()],
            subject: "s".to_string(),
            text: "t".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(receipt.accepted, vec!["ops@example.com".to_string()]);
}

#[tokio::test]
async fn email_with_every_recipient_rejected_fails_permanently() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accepted": [],
            "rejected": ["ops@example.com"],
        })))
        .mount(&server)
        .await;

    let mailer = Arc::new(HttpMailer::new(
        reqwest::Client::new(),
        server.uri(),
        None,
        "alerts@example.com",
    ));
    let executors =
        ActionExecutors::new(mailer, Arc::new(InMemoryReviews::new()), Duration::from_secs(2))
            .unwrap();

    let err = executors
        .execute(&automation(email_action(&["ops@example.com"])), &event())
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::Permanent(_)), "{err}");
}

#[tokio::test]
async fn mail_api_outage_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let mailer = Arc::new(HttpMailer::new(
        reqwest::Client::new(),
        server.uri(),
        None,
        "alerts@example.com",
    ));
    let executors =
        ActionExecutors::new(mailer, Arc::new(InMemoryReviews::new()), Duration::from_secs(2))
            .unwrap();

    let err = executors
        .execute(&automation(email_action(&["ops@example.com"])), &event())
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::Transient(_)), "{err}");
}
