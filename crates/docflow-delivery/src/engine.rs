//! The Webhook Delivery Engine (spec §4.5): enqueue → claim → sign/send →
//! classify → reschedule, driven by the `webhook` queue.
//!
//! Builds a client, POSTs a signed JSON body, and inspects the response
//! status to decide the next state — but as a persisted, claim-gated,
//! retried state machine rather than a single fire-and-forget attempt.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use docflow_core::Reporter;
use docflow_queue::QueueStore;
use docflow_retry::webhook_backoff;
use docflow_types::{DeliveryStatus, EventPayload, EventType, WebhookDelivery, WebhookMsg};

use crate::classify::{self, Disposition};
use crate::sign::sign;
use crate::store::{DeliveryStore, WebhookConfigStore};
use crate::DeliveryError;

/// Base delay for the first retry (spec §4.5 "Backoff").
pub const BACKOFF_BASE: Duration = Duration::from_secs(30);
/// Cap on any single retry delay.
pub const BACKOFF_CAP: Duration = Duration::from_secs(3600);
/// Give up after this many attempts, default per spec §4.5.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;
/// HTTP connect + read timeout (spec §5 "Timeouts").
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

const WEBHOOK_QUEUE: &str = "webhook";

/// Persists, signs, sends, and retries webhook deliveries.
pub struct DeliveryEngine {
    config_store: Arc<dyn WebhookConfigStore>,
    delivery_store: Arc<dyn DeliveryStore>,
    queue_store: Arc<dyn QueueStore>,
    http: reqwest::Client,
    master_secret: String,
    max_attempts: u32,
}

impl DeliveryEngine {
    pub fn new(
        config_store: Arc<dyn WebhookConfigStore>,
        delivery_store: Arc<dyn DeliveryStore>,
        queue_store: Arc<dyn QueueStore>,
        master_secret: impl Into<String>,
    ) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_TIMEOUT)
            .build()
            .map_err(DeliveryError::Http)?;
        Ok(Self {
            config_store,
            delivery_store,
            queue_store,
            http,
            master_secret: master_secret.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// The enqueue path (spec §4.5 "Enqueue path"). Reads the org's live
    /// config (never cached, §5), aborts if disabled or the event type
    /// isn't in the allowlist, otherwise snapshots auth material into a
    /// new delivery row and pushes `{delivery_id}` onto the `webhook`
    /// queue. Returns `None` when no delivery was created.
    pub async fn enqueue_event(
        &self,
        event_type: EventType,
        organization_id: &str,
        document_id: Option<String>,
        payload: EventPayload,
    ) -> Result<Option<String>, DeliveryError> {
        let Some(config) = self.config_store.get(organization_id).await? else {
            return Ok(None);
        };
        if !config.accepts(event_type) {
            return Ok(None);
        }

        let now = Utc::now();
        let delivery_id = docflow_queue::new_id();
        // event_id is unique per (org, event_type, logical-source) and
        // reused across this delivery's retries (I4) — one per enqueue
        // call, not per HTTP attempt.
        let event_id = docflow_queue::new_id();

        // Snapshot the org's current auth material into the delivery row
        // re-encrypted under the same master secret, so later rotation of
        // the org config doesn't disturb this in-flight delivery
        // (spec §4.5 step 2).
        let auth_header_value_encrypted = config.auth_header_value_encrypted.clone();
        let secret_encrypted = config.secret_encrypted.clone();

        let delivery = WebhookDelivery {
            delivery_id: delivery_id.clone(),
            organization_id: organization_id.to_string(),
            event_type,
            event_id,
            document_id,
            payload,
            target_url: config.url.clone(),
            auth_type: config.auth_type,
            auth_header_name: config.auth_header_name.clone(),
            auth_header_value_encrypted,
            secret_encrypted,
            attempts: 0,
            next_attempt_at: now,
            status: DeliveryStatus::Pending,
            last_status_code: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        self.delivery_store.create(delivery).await?;
        self.queue_store
            .send(
                WEBHOOK_QUEUE,
                serde_json::to_value(WebhookMsg::new(delivery_id.clone()))?,
            )
            .await?;

        Ok(Some(delivery_id))
    }

    /// Atomically claim a delivery that is due, per §4.5 "Claim and
    /// send". `None` means not-yet-due or already claimed — the caller
    /// (the webhook queue handler) completes the queue message either
    /// way (spec §4.4.3, §11.4).
    pub async fn claim_by_id(&self, delivery_id: &str) -> Result<Option<WebhookDelivery>, DeliveryError> {
        self.delivery_store.claim_by_id(delivery_id, Utc::now()).await
    }

    /// Sign and POST a claimed delivery, classify the response, and
    /// update the delivery record accordingly. Reschedules a retry onto
    /// the `webhook` queue immediately (the queue handler for a not-yet-due
    /// message is a harmless no-op, per §4.5's "messages arriving before
    /// due time are expected") in addition to `sweep_due` catching it once
    /// it becomes due.
    pub async fn send(
        &self,
        delivery: WebhookDelivery,
        reporter: &mut dyn Reporter,
    ) -> Result<DeliveryStatus, DeliveryError> {
        let signed = sign(&delivery, &self.master_secret)?;

        let mut request = self.http.post(&delivery.target_url).body(signed.body);
        for (name, value) in &signed.headers {
            request = request.header(name, value);
        }

        let outcome = request.send().await;
        let attempts_made = delivery.attempts + 1;

        let (disposition, status_code, error_message, retry_after) = match outcome {
            Ok(response) => {
                let status = response.status();
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(classify::parse_retry_after);
                (
                    classify::classify_status(status.as_u16()),
                    Some(status.as_u16()),
                    if status.is_success() {
                        None
                    } else {
                        Some(format!("http status {status}"))
                    },
                    retry_after,
                )
            }
            Err(e) => (classify::classify_transport_error(), None, Some(e.to_string()), None),
        };

        let result = match disposition {
            Disposition::Succeeded => {
                self.delivery_store
                    .mark_succeeded(&delivery.delivery_id, status_code.unwrap_or(200))
                    .await?;
                reporter.info(&format!(
                    "webhook delivery `{}` succeeded after {attempts_made} attempt(s)",
                    delivery.delivery_id
                ));
                DeliveryStatus::Succeeded
            }
            Disposition::GivingUp => {
                self.delivery_store
                    .mark_giving_up(&delivery.delivery_id, status_code, error_message.clone())
                    .await?;
                reporter.warn(&format!(
                    "webhook delivery `{}` given up after {attempts_made} attempt(s): {}",
                    delivery.delivery_id,
                    error_message.unwrap_or_default()
                ));
                DeliveryStatus::GivingUp
            }
            Disposition::Retryable if attempts_made >= self.max_attempts => {
                self.delivery_store
                    .mark_giving_up(&delivery.delivery_id, status_code, error_message.clone())
                    .await?;
                reporter.warn(&format!(
                    "webhook delivery `{}` exhausted {attempts_made} attempt(s), giving up: {}",
                    delivery.delivery_id,
                    error_message.unwrap_or_default()
                ));
                DeliveryStatus::GivingUp
            }
            Disposition::Retryable => {
                let backoff = webhook_backoff(attempts_made, BACKOFF_BASE, BACKOFF_CAP);
                let delay = match retry_after {
                    Some(floor) => backoff.max(floor),
                    None => backoff,
                };
                let next_attempt_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                self.delivery_store
                    .mark_retry(&delivery.delivery_id, next_attempt_at, status_code, error_message.clone())
                    .await?;
                reporter.info(&format!(
                    "webhook delivery `{}` retrying (attempt {attempts_made}), next at {next_attempt_at}: {}",
                    delivery.delivery_id,
                    error_message.unwrap_or_default()
                ));
                // Immediate re-enqueue; claim_by_id will return None until
                // due (handled as a no-op completion) and `sweep_due`
                // catches it once it is (spec §4.5 "Retry enqueue").
                self.queue_store
                    .send(
                        WEBHOOK_QUEUE,
                        serde_json::to_value(WebhookMsg::new(delivery.delivery_id.clone()))?,
                    )
                    .await?;
                DeliveryStatus::Pending
            }
        };

        Ok(result)
    }

    /// The `webhook` queue handler's entire body (spec §4.4.3): claim,
    /// send if claimed. Never propagates an error past this call — any
    /// failure here is logged and swallowed, because the caller always
    /// completes the queue message regardless (spec §11.4).
    pub async fn process(&self, delivery_id: &str, reporter: &mut dyn Reporter) {
        match self.claim_by_id(delivery_id).await {
            Ok(Some(delivery)) => {
                if let Err(e) = self.send(delivery, reporter).await {
                    reporter.error(&format!("webhook delivery `{delivery_id}` send failed: {e}"));
                }
            }
            Ok(None) => {
                // Not yet due, already claimed, or unknown — a no-op.
            }
            Err(e) => {
                reporter.error(&format!("webhook delivery `{delivery_id}` claim failed: {e}"));
            }
        }
    }

    /// Re-enqueue `webhook` messages for deliveries whose scheduled retry
    /// has come due. A worker host runs this on an interval alongside the
    /// queue recovery sweep (spec §4.5 "Retry enqueue", §10.5).
    pub async fn sweep_due(&self, limit: u64, reporter: &mut dyn Reporter) -> Result<u64, DeliveryError> {
        let due = self.delivery_store.due_pending(Utc::now(), limit).await?;
        for delivery_id in &due {
            self.queue_store
                .send(WEBHOOK_QUEUE, serde_json::to_value(WebhookMsg::new(delivery_id.clone()))?)
                .await?;
        }
        if !due.is_empty() {
            reporter.info(&format!("webhook sweep: re-enqueued {} due delivery(ies)", due.len()));
        }
        Ok(due.len() as u64)
    }
}
