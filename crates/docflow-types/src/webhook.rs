//! Webhook configuration and delivery records (spec §3, §4.5, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a delivery authenticates itself to the target endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    None,
    Header,
    Hmac,
}

/// Lifecycle event types this system emits (spec §6 events table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DocumentUploaded,
    DocumentError,
    LlmCompleted,
    LlmError,
    WebhookTest,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::DocumentUploaded => "document.uploaded",
            EventType::DocumentError => "document.error",
            EventType::LlmCompleted => "llm.completed",
            EventType::LlmError => "llm.error",
            EventType::WebhookTest => "webhook.test",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The event-specific `data` object of an outbound webhook body (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    DocumentUploaded {
        document_id: String,
        user_file_name: String,
    },
    DocumentError {
        document_id: String,
        stage: String,
        message: String,
    },
    LlmCompleted {
        document_id: String,
        prompt_ids: Vec<String>,
    },
    LlmError {
        document_id: String,
        message: String,
    },
    WebhookTest {
        note: String,
    },
}

/// Per-organization webhook configuration (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub organization_id: String,
    pub enabled: bool,
    pub url: String,
    /// `None` means "all events".
    #[serde(default)]
    pub events: Option<Vec<EventType>>,
    pub auth_type: AuthType,
    #[serde(default)]
    pub auth_header_name: Option<String>,
    /// Encrypted at rest (docflow-crypto); plaintext only in memory for
    /// the duration of a send.
    #[serde(default)]
    pub auth_header_value_encrypted: Option<String>,
    /// Encrypted at rest.
    #[serde(default)]
    pub secret_encrypted: Option<String>,
    #[serde(default)]
    pub signature_enabled: bool,
}

impl WebhookConfig {
    /// Whether this config should receive a delivery for `event_type`.
    ///
    /// `webhook.test` always bypasses the allowlist: an admin-triggered
    /// probe must reach the endpoint regardless of which events the org
    /// has subscribed to, as long as the config is enabled at all.
    pub fn accepts(&self, event_type: EventType) -> bool {
        if !self.enabled {
            return false;
        }
        if event_type == EventType::WebhookTest {
            return true;
        }
        match &self.events {
            None => true,
            Some(allowlist) => allowlist.contains(&event_type),
        }
    }
}

/// Delivery lifecycle (spec §4.5 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
    GivingUp,
}

impl DeliveryStatus {
    /// `succeeded`/`giving_up` are absorbing (P4): once there, no further
    /// attempt is ever made.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Succeeded | DeliveryStatus::GivingUp)
    }
}

/// A single outbound webhook delivery obligation — one logical event, one
/// or more physical HTTP attempts, sharing this one record (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub delivery_id: String,
    pub organization_id: String,
    pub event_type: EventType,
    /// Unique per `(organization_id, event_type, logical-source)` so
    /// receivers can dedupe (I4); retries reuse the same id.
    pub event_id: String,
    pub document_id: Option<String>,
    pub payload: EventPayload,
    pub target_url: String,
    pub auth_type: AuthType,
    pub auth_header_name: Option<String>,
    /// Snapshotted (re-encrypted) at enqueue time so org secret rotation
    /// doesn't disturb an in-flight delivery.
    pub auth_header_value_encrypted: Option<String>,
    pub secret_encrypted: Option<String>,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub last_status_code: Option<u16>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_events_allowlist_accepts_everything() {
        let config = WebhookConfig {
            organization_id: "org-1".into(),
            enabled: true,
            url: "https://example.com/hook".into(),
            events: None,
            auth_type: AuthType::None,
            auth_header_name: None,
            auth_header_value_encrypted: None,
            secret_encrypted: None,
            signature_enabled: false,
        };
        assert!(config.accepts(EventType::DocumentUploaded));
        assert!(config.accepts(EventType::LlmError));
    }

    #[test]
    fn allowlist_filters_events() {
        let config = WebhookConfig {
            organization_id: "org-1".into(),
            enabled: true,
            url: "https://example.com/hook".into(),
            events: Some(vec![EventType::LlmCompleted]),
            auth_type: AuthType::None,
            auth_header_name: None,
            auth_header_value_encrypted: None,
            secret_encrypted: None,
            signature_enabled: false,
        };
        assert!(config.accepts(EventType::LlmCompleted));
        assert!(!config.accepts(EventType::DocumentUploaded));
    }

    #[test]
    fn webhook_test_bypasses_a_restrictive_allowlist() {
        let config = WebhookConfig {
            organization_id: "org-1".into(),
            enabled: true,
            url: "https://example.com/hook".into(),
            events: Some(vec![EventType::DocumentUploaded]),
            auth_type: AuthType::None,
            auth_header_name: None,
            auth_header_value_encrypted: None,
            secret_encrypted: None,
            signature_enabled: false,
        };
        assert!(config.accepts(EventType::WebhookTest));
        assert!(!config.accepts(EventType::LlmCompleted));
    }

    #[test]
    fn disabled_config_accepts_nothing() {
        let config = WebhookConfig {
            organization_id: "org-1".into(),
            enabled: false,
            url: "https://example.com/hook".into(),
            events: None,
            auth_type: AuthType::None,
            auth_header_name: None,
            auth_header_value_encrypted: None,
            secret_encrypted: None,
            signature_enabled: false,
        };
        assert!(!config.accepts(EventType::LlmCompleted));
    }

    #[test]
    fn terminal_statuses() {
        assert!(DeliveryStatus::Succeeded.is_terminal());
        assert!(DeliveryStatus::GivingUp.is_terminal());
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::InFlight.is_terminal());
    }

    #[test]
    fn event_type_strings_match_wire_contract() {
        assert_eq!(EventType::DocumentUploaded.as_str(), "document.uploaded");
        assert_eq!(EventType::DocumentError.as_str(), "document.error");
        assert_eq!(EventType::LlmCompleted.as_str(), "llm.completed");
        assert_eq!(EventType::LlmError.as_str(), "llm.error");
        assert_eq!(EventType::WebhookTest.as_str(), "webhook.test");
    }
}
