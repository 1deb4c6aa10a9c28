//! The Webhook Delivery Engine (spec §4.5): persists outbound deliveries
//! with scheduled due-times, signs and posts them, classifies response
//! status, and reschedules retries with exponential backoff up to a cap.

pub mod classify;
pub mod engine;
pub mod sign;
pub mod store;

pub use classify::Disposition;
pub use engine::DeliveryEngine;
pub use store::{
    DeliveryStore, InMemoryDeliveryStore, InMemoryWebhookConfigStore, MongoDeliveryStore,
    MongoWebhookConfigStore, WebhookConfigStore,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery store transport error: {0}")]
    Transport(String),
    #[error("failed to encrypt/decrypt delivery secret: {0}")]
    Crypto(#[from] docflow_crypto::CryptoError),
    #[error("failed to serialize webhook payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("webhook queue error: {0}")]
    Queue(#[from] docflow_queue::QueueError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("delivery is configured for an auth type but is missing its `{0}` field")]
    MissingAuthMaterial(&'static str),
}
