//! Request body construction and signing (spec §4.5 "Signing and body").
//!
//! The body is the canonical JSON of `{event_id, event_type,
//! organization_id, created_at, data}` (spec §6). `auth_type=hmac` signs
//! `timestamp + "." + body` with `HMAC-SHA256`; `auth_type=header` attaches
//! a single decrypted header. Both read their secret material from the
//! delivery row's encrypted snapshot, never from the live org config (I5,
//! §4.5 "snapshot so rotation... doesn't disturb in-flight deliveries").

use chrono::Utc;
use docflow_types::{canonical_json, AuthType, WebhookDelivery};
use serde::Serialize;

use crate::DeliveryError;

/// A short, identifiable user agent for outbound deliveries.
const USER_AGENT: &str = concat!("docflow-webhook/", env!("CARGO_PKG_VERSION"));

/// The exact bytes and headers this engine sends for one delivery attempt.
pub struct SignedRequest {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Serialize)]
struct EventBody<'a> {
    event_id: &'a str,
    event_type: &'a str,
    organization_id: &'a str,
    created_at: chrono::DateTime<Utc>,
    data: &'a docflow_types::EventPayload,
}

/// Build the signed request for `delivery`, decrypting whatever auth
/// material its `auth_type` requires from the delivery's own encrypted
/// snapshot.
pub fn sign(delivery: &WebhookDelivery, master_secret: &str) -> Result<SignedRequest, DeliveryError> {
    let event_body = EventBody {
        event_id: &delivery.event_id,
        event_type: delivery.event_type.as_str(),
        organization_id: &delivery.organization_id,
        created_at: delivery.created_at,
        data: &delivery.payload,
    };
    let body = canonical_json(&event_body)?;

    let mut headers = vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("X-Event-Id".to_string(), delivery.event_id.clone()),
        ("X-Event-Type".to_string(), delivery.event_type.as_str().to_string()),
        ("User-Agent".to_string(), USER_AGENT.to_string()),
    ];

    match delivery.auth_type {
        AuthType::None => {}
        AuthType::Header => {
            let name = delivery
                .auth_header_name
                .as_deref()
                .ok_or_else(|| DeliveryError::MissingAuthMaterial("auth_header_name"))?;
            let encrypted = delivery
                .auth_header_value_encrypted
                .as_deref()
                .ok_or_else(|| DeliveryError::MissingAuthMaterial("auth_header_value"))?;
            let value = docflow_crypto::decrypt(master_secret, encrypted)?;
            headers.push((name.to_string(), value));
        }
        AuthType::Hmac => {
            let encrypted = delivery
                .secret_encrypted
                .as_deref()
                .ok_or_else(|| DeliveryError::MissingAuthMaterial("secret"))?;
            let secret = docflow_crypto::decrypt(master_secret, encrypted)?;
            let timestamp = Utc::now().timestamp().to_string();
            let message = format!("{timestamp}.{}", String::from_utf8_lossy(&body));
            let mac = docflow_crypto::hmac_sha256_hex(secret.as_bytes(), message.as_bytes());
            headers.push(("X-Signature-256".to_string(), format!("sha256={mac}")));
            headers.push(("X-Webhook-Timestamp".to_string(), timestamp));
        }
    }

    Ok(SignedRequest { headers, body })
}
