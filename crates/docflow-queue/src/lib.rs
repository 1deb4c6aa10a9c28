//! The Queue Service (spec §4.2): multiple named durable queues sharing
//! one database, with atomic claim-under-contention and a two-tier
//! blocking receive (change-stream subscription, falling back to
//! polling).
//!
//! [`QueueStore`] is the seam: [`memory::InMemoryQueueStore`] is a
//! same-process reference implementation good enough to drive the
//! pipeline handlers in tests without a live database, and
//! [`mongo::MongoQueueStore`] is the real adapter a worker host wires up.
//! Both honor the same claim-exclusivity (I2) and ordering (created_at
//! ascending, tie-broken by id) contracts.

pub mod memory;
pub mod mongo;
pub mod sweep;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status of a queue message (spec §3). The queue itself only ever writes
/// `Pending` (on send) and `Processing` (on claim) — `Completed`/`Failed`
/// are a policy choice the handler makes via [`QueueStore::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A claimed (or sent) message: its id, bookkeeping fields, and payload.
/// The payload is kept as `serde_json::Value` at this layer — handlers
/// deserialize it into the stable per-queue shape from `docflow-types`
/// (spec §9 design note on dynamic dispatch over payload shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub msg: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(String),
    #[error("message payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Multiple independent named FIFO-by-timestamp queues sharing one
/// database (spec §4.2).
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert `{status: pending, created_at: now, msg: payload}` and
    /// return the new message's id.
    async fn send(&self, queue: &str, payload: serde_json::Value) -> Result<String, QueueError>;

    /// Atomically find the oldest `pending` message (ties broken by id)
    /// and set it `processing`, returning the pre-image. Never blocks.
    async fn recv(&self, queue: &str) -> Result<Option<QueueMessage>, QueueError>;

    /// As [`QueueStore::recv`], but if nothing is immediately available,
    /// wait up to `timeout` for a message to arrive (§4.2 "Blocking
    /// receive"). Returns within `timeout + ε` either way; never leaves a
    /// partial claim on timeout.
    async fn recv_with_timeout(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<QueueMessage>, QueueError>;

    /// Set the claimed message's terminal status. Idempotent.
    async fn complete(
        &self,
        queue: &str,
        msg_id: &str,
        status: MessageStatus,
    ) -> Result<(), QueueError>;

    /// Recovery sweep (spec §4.2 "At-least-once"): reset any message that
    /// has been `processing` for longer than `visibility_timeout` back to
    /// `pending`, so a crashed handler's claim is eventually retried.
    /// Returns the number of messages reset. Not part of the hot path —
    /// a worker host runs this on a fixed interval, not per-receive.
    async fn recover_stuck(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<u64, QueueError>;
}

/// Generate a fresh message id — a 24-char hex Mongo-style ObjectId
/// string, matching the shape used for `doc_id` (§3).
pub fn new_id() -> String {
    bson::oid::ObjectId::new().to_hex()
}
