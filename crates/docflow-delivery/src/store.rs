//! Persistence for per-organization webhook configuration and for
//! delivery records (spec §3, §4.5). Config reads are deliberately never
//! cached across deliveries (§5 "Shared-resource policy") — every
//! `enqueue_event` call re-reads the organization's live config so a
//! secret rotation or a `PUT /orgs/{id}/webhook` takes effect immediately.

use async_trait::async_trait;
use bson::doc;
use chrono::{DateTime, Utc};
use docflow_types::{DeliveryStatus, WebhookConfig, WebhookDelivery};
use mongodb::Database;
use std::collections::BTreeMap;
use std::sync::Mutex as StdMutex;

use crate::DeliveryError;

fn to_transport_err(e: mongodb::error::Error) -> DeliveryError {
    DeliveryError::Transport(e.to_string())
}

/// Per-organization webhook configuration, mutated by the (out-of-scope,
/// §1) admin API and read by the engine on every enqueue.
#[async_trait]
pub trait WebhookConfigStore: Send + Sync {
    async fn get(&self, organization_id: &str) -> Result<Option<WebhookConfig>, DeliveryError>;
    async fn put(&self, config: WebhookConfig) -> Result<(), DeliveryError>;
}

/// Delivery records: created on enqueue, mutated by the engine's claim /
/// send / reschedule cycle (spec §4.5 state machine).
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn create(&self, delivery: WebhookDelivery) -> Result<(), DeliveryError>;

    async fn get(&self, delivery_id: &str) -> Result<Option<WebhookDelivery>, DeliveryError>;

    /// Atomically transition `pending -> in_flight` only if
    /// `next_attempt_at <= now`; otherwise `None` (not yet due — the
    /// caller lets the queue message complete, per §4.5 "Claim and
    /// send").
    async fn claim_by_id(
        &self,
        delivery_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookDelivery>, DeliveryError>;

    /// Terminal success.
    async fn mark_succeeded(&self, delivery_id: &str, status_code: u16) -> Result<(), DeliveryError>;

    /// `in_flight -> pending`, `attempts += 1`, rescheduled to
    /// `next_attempt_at`.
    async fn mark_retry(
        &self,
        delivery_id: &str,
        next_attempt_at: DateTime<Utc>,
        status_code: Option<u16>,
        error: Option<String>,
    ) -> Result<(), DeliveryError>;

    /// Terminal failure: no further attempts will ever be made.
    async fn mark_giving_up(
        &self,
        delivery_id: &str,
        status_code: Option<u16>,
        error: Option<String>,
    ) -> Result<(), DeliveryError>;

    /// Ids of `pending` deliveries whose `next_attempt_at <= now`, up to
    /// `limit` — feeds the due-delivery sweep (spec §4.5 "Retry enqueue":
    /// "Implementations MAY defer the enqueue... via a scheduler sweep").
    async fn due_pending(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<String>, DeliveryError>;
}

// --- In-memory reference implementations -------------------------------

#[derive(Default)]
pub struct InMemoryWebhookConfigStore {
    configs: StdMutex<BTreeMap<String, WebhookConfig>>,
}

impl InMemoryWebhookConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookConfigStore for InMemoryWebhookConfigStore {
    async fn get(&self, organization_id: &str) -> Result<Option<WebhookConfig>, DeliveryError> {
        Ok(self.configs.lock().unwrap().get(organization_id).cloned())
    }

    async fn put(&self, config: WebhookConfig) -> Result<(), DeliveryError> {
        self.configs
            .lock()
            .unwrap()
            .insert(config.organization_id.clone(), config);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDeliveryStore {
    deliveries: StdMutex<BTreeMap<String, WebhookDelivery>>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn create(&self, delivery: WebhookDelivery) -> Result<(), DeliveryError> {
        self.deliveries
            .lock()
            .unwrap()
            .insert(delivery.delivery_id.clone(), delivery);
        Ok(())
    }

    async fn get(&self, delivery_id: &str) -> Result<Option<WebhookDelivery>, DeliveryError> {
        Ok(self.deliveries.lock().unwrap().get(delivery_id).cloned())
    }

    async fn claim_by_id(
        &self,
        delivery_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookDelivery>, DeliveryError> {
        let mut deliveries = self.deliveries.lock().unwrap();
        let Some(delivery) = deliveries.get_mut(delivery_id) else {
            return Ok(None);
        };
        if delivery.status != DeliveryStatus::Pending || delivery.next_attempt_at > now {
            return Ok(None);
        }
        delivery.status = DeliveryStatus::InFlight;
        delivery.updated_at = now;
        Ok(Some(delivery.clone()))
    }

    async fn mark_succeeded(&self, delivery_id: &str, status_code: u16) -> Result<(), DeliveryError> {
        let mut deliveries = self.deliveries.lock().unwrap();
        if let Some(d) = deliveries.get_mut(delivery_id) {
            d.status = DeliveryStatus::Succeeded;
            d.attempts += 1;
            d.last_status_code = Some(status_code);
            d.last_error = None;
            d.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_retry(
        &self,
        delivery_id: &str,
        next_attempt_at: DateTime<Utc>,
        status_code: Option<u16>,
        error: Option<String>,
    ) -> Result<(), DeliveryError> {
        let mut deliveries = self.deliveries.lock().unwrap();
        if let Some(d) = deliveries.get_mut(delivery_id) {
            d.status = DeliveryStatus::Pending;
            d.attempts += 1;
            d.next_attempt_at = next_attempt_at;
            d.last_status_code = status_code;
            d.last_error = error;
            d.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_giving_up(
        &self,
        delivery_id: &str,
        status_code: Option<u16>,
        error: Option<String>,
    ) -> Result<(), DeliveryError> {
        let mut deliveries = self.deliveries.lock().unwrap();
        if let Some(d) = deliveries.get_mut(delivery_id) {
            d.status = DeliveryStatus::GivingUp;
            d.attempts += 1;
            d.last_status_code = status_code;
            d.last_error = error;
            d.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn due_pending(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<String>, DeliveryError> {
        let deliveries = self.deliveries.lock().unwrap();
        let mut due: Vec<_> = deliveries
            .values()
            .filter(|d| d.status == DeliveryStatus::Pending && d.next_attempt_at <= now)
            .map(|d| (d.next_attempt_at, d.delivery_id.clone()))
            .collect();
        due.sort_by_key(|(at, _)| *at);
        Ok(due.into_iter().take(limit as usize).map(|(_, id)| id).collect())
    }
}

// --- MongoDB-backed production implementations -------------------------

pub struct MongoWebhookConfigStore {
    collection: mongodb::Collection<WebhookConfig>,
}

impl MongoWebhookConfigStore {
    pub fn new(db: Database) -> Self {
        Self {
            collection: db.collection("webhook_configs"),
        }
    }
}

#[async_trait]
impl WebhookConfigStore for MongoWebhookConfigStore {
    async fn get(&self, organization_id: &str) -> Result<Option<WebhookConfig>, DeliveryError> {
        self.collection
            .find_one(doc! { "organization_id": organization_id })
            .await
            .map_err(to_transport_err)
    }

    async fn put(&self, config: WebhookConfig) -> Result<(), DeliveryError> {
        self.collection
            .replace_one(
                doc! { "organization_id": &config.organization_id },
                &config,
            )
            .upsert(true)
            .await
            .map_err(to_transport_err)?;
        Ok(())
    }
}

pub struct MongoDeliveryStore {
    collection: mongodb::Collection<WebhookDelivery>,
}

impl MongoDeliveryStore {
    pub fn new(db: Database) -> Self {
        Self {
            collection: db.collection("webhook_deliveries"),
        }
    }
}

#[async_trait]
impl DeliveryStore for MongoDeliveryStore {
    async fn create(&self, delivery: WebhookDelivery) -> Result<(), DeliveryError> {
        self.collection
            .replace_one(doc! { "delivery_id": &delivery.delivery_id }, &delivery)
            .upsert(true)
            .await
            .map_err(to_transport_err)?;
        Ok(())
    }

    async fn get(&self, delivery_id: &str) -> Result<Option<WebhookDelivery>, DeliveryError> {
        self.collection
            .find_one(doc! { "delivery_id": delivery_id })
            .await
            .map_err(to_transport_err)
    }

    async fn claim_by_id(
        &self,
        delivery_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookDelivery>, DeliveryError> {
        let filter = doc! {
            "delivery_id": delivery_id,
            "status": "pending",
            "next_attempt_at": { "$lte": bson::DateTime::from_chrono(now) },
        };
        let update = doc! {
            "$set": { "status": "in_flight", "updated_at": bson::DateTime::from_chrono(now) },
        };
        self.collection
            .find_one_and_update(filter, update)
            .await
            .map_err(to_transport_err)
    }

    async fn mark_succeeded(&self, delivery_id: &str, status_code: u16) -> Result<(), DeliveryError> {
        self.collection
            .update_one(
                doc! { "delivery_id": delivery_id },
                doc! {
                    "$set": {
                        "status": "succeeded",
                        "last_status_code": status_code as i32,
                        "updated_at": bson::DateTime::now(),
                    },
                    "$unset": { "last_error": "" },
                    "$inc": { "attempts": 1 },
                },
            )
            .await
            .map_err(to_transport_err)?;
        Ok(())
    }

    async fn mark_retry(
        &self,
        delivery_id: &str,
        next_attempt_at: DateTime<Utc>,
        status_code: Option<u16>,
        error: Option<String>,
    ) -> Result<(), DeliveryError> {
        self.collection
            .update_one(
                doc! { "delivery_id": delivery_id },
                doc! {
                    "$set": {
                        "status": "pending",
                        "next_attempt_at": bson::DateTime::from_chrono(next_attempt_at),
                        "last_status_code": status_code.map(|c| c as i32),
                        "last_error": error,
                        "updated_at": bson::DateTime::now(),
                    },
                    "$inc": { "attempts": 1 },
                },
            )
            .await
            .map_err(to_transport_err)?;
        Ok(())
    }

    async fn mark_giving_up(
        &self,
        delivery_id: &str,
        status_code: Option<u16>,
        error: Option<String>,
    ) -> Result<(), DeliveryError> {
        self.collection
            .update_one(
                doc! { "delivery_id": delivery_id },
                doc! {
                    "$set": {
                        "status": "giving_up",
                        "last_status_code": status_code.map(|c| c as i32),
                        "last_error": error,
                        "updated_at": bson::DateTime::now(),
                    },
                    "$inc": { "attempts": 1 },
                },
            )
            .await
            .map_err(to_transport_err)?;
        Ok(())
    }

    async fn due_pending(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<String>, DeliveryError> {
        use futures::stream::TryStreamExt;

        let filter = doc! {
            "status": "pending",
            "next_attempt_at": { "$lte": bson::DateTime::from_chrono(now) },
        };
        let mut cursor = self
            .collection
            .find(filter)
            .sort(doc! { "next_attempt_at": 1 })
            .limit(limit as i64)
            .await
            .map_err(to_transport_err)?;

        let mut ids = Vec::new();
        while let Some(d) = cursor.try_next().await.map_err(to_transport_err)? {
            ids.push(d.delivery_id);
        }
        Ok(ids)
    }
}
