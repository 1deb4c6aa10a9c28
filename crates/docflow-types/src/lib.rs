//! Core domain types shared across the docflow pipeline: documents, queue
//! message payloads, and webhook configuration/delivery records.
//!
//! Nothing here talks to a database or the network — these are plain data
//! types plus the small amount of logic (state DAG validation, canonical
//! JSON) that has no business living in an I/O-bound crate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod canonical;
pub mod document;
pub mod queue_msg;
pub mod webhook;

pub use canonical::canonical_json;
pub use document::{Document, DocumentState};
pub use queue_msg::{KbIndexMsg, LlmMsg, OcrErrMsg, OcrMsg, WebhookMsg};
pub use webhook::{AuthType, DeliveryStatus, EventPayload, EventType, WebhookConfig, WebhookDelivery};

/// Opaque blob metadata — a JSON-ish string map, matching the original's
/// untyped `metadata{}` dict.
pub type BlobMetadata = BTreeMap<String, serde_json::Value>;

/// A blob read from the blob store: the bytes plus its sidecar metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub metadata: BlobMetadata,
}
