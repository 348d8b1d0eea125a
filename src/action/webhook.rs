//! Generic signed webhooks.
//!
//! The body is the raw notification JSON. When a secret is configured the
//! request carries `X-Signature: hex(HMAC-SHA256(secret, body))`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{ActionError, ActionResult, notification_payload, post};
use crate::config::secrets::ExposeSecret;
use crate::model::automation::WebhookConfig;
use crate::model::{Automation, Event};

pub const SIGNATURE_HEADER: &str = "X-Signature";

type HmacSha256 = Hmac<Sha256>;

pub async fn deliver(
    http: &reqwest::Client,
    config: &WebhookConfig,
    automation: &Automation,
    event: &Event,
) -> ActionResult {
    let body = serde_json::to_vec(&notification_payload(automation, event))
        .map_err(|e| ActionError::Permanent(format!("serialize payload: {e}")))?;

    let mut request = http
        .post(&config.url)
        .header(reqwest::header::CONTENT_TYPE, "application/json");
    if let Some(secret) = &config.secret {
        let signature = sign(secret.expose_secret().as_bytes(), &body)
            .map_err(|e| ActionError::Permanent(format!("signing key: {e}")))?;
        request = request.header(SIGNATURE_HEADER, signature);
    }
    post(request.body(body)).await
}

/// Hex-encoded HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Receiver-side check of an `X-Signature` value, in constant time.
pub fn verify(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
