//! Payload shapes for each pipeline queue (spec §4.4, design note on
//! dynamic dispatch in §9): each queue carries a single stable schema
//! rather than an ad-hoc dict, with a `kind` discriminator so a future
//! payload shape on the same queue can be introduced without breaking
//! readers of the old one — unrecognized `kind` values are a handler-level
//! no-op, not a deserialization error.

use serde::{Deserialize, Serialize};

/// Payload for the `ocr` queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrMsg {
    #[serde(default = "ocr_kind")]
    pub kind: String,
    pub document_id: String,
    /// Bypass the "already has an OCR artifact" skip and re-run OCR.
    #[serde(default)]
    pub force: bool,
}

fn ocr_kind() -> String {
    "ocr.v1".to_string()
}

impl OcrMsg {
    pub const KIND: &'static str = "ocr.v1";

    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            document_id: document_id.into(),
            force: false,
        }
    }

    pub fn forced(document_id: impl Into<String>) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            document_id: document_id.into(),
            force: true,
        }
    }

    /// Whether this message is a recognized `ocr` payload shape. Unknown
    /// kinds are not an error — handlers skip them, per the design note on
    /// dynamic dispatch over payload shape.
    pub fn is_recognized(&self) -> bool {
        self.kind == Self::KIND
    }
}

/// Payload for the `llm` queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMsg {
    #[serde(default = "llm_kind")]
    pub kind: String,
    pub document_id: String,
    #[serde(default)]
    pub force: bool,
}

fn llm_kind() -> String {
    "llm.v1".to_string()
}

impl LlmMsg {
    pub const KIND: &'static str = "llm.v1";

    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            document_id: document_id.into(),
            force: false,
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.kind == Self::KIND
    }
}

/// Payload for the `kb_index` queue. OCR-gated: only enqueued once OCR
/// has produced flat text (or passed through for an unsupported format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbIndexMsg {
    #[serde(default = "kb_index_kind")]
    pub kind: String,
    pub document_id: String,
}

fn kb_index_kind() -> String {
    "kb_index.v1".to_string()
}

impl KbIndexMsg {
    pub const KIND: &'static str = "kb_index.v1";

    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            document_id: document_id.into(),
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.kind == Self::KIND
    }
}

/// Payload for the `webhook` queue — always just a pointer to the delivery
/// record; retries are driven by `next_attempt_at` on that record, not by
/// re-enqueuing richer payloads here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookMsg {
    #[serde(default = "webhook_kind")]
    pub kind: String,
    pub delivery_id: String,
}

fn webhook_kind() -> String {
    "webhook.v1".to_string()
}

impl WebhookMsg {
    pub const KIND: &'static str = "webhook.v1";

    pub fn new(delivery_id: impl Into<String>) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            delivery_id: delivery_id.into(),
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.kind == Self::KIND
    }
}

/// Payload for the `ocr_err` queue: a dead-letter record of an OCR failure,
/// kept for operator inspection. The queue is not consumed by an automatic
/// handler in this crate (spec treats it as an audit sink); a future
/// handler could re-derive `OcrMsg::forced` from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrErrMsg {
    pub document_id: Option<String>,
    pub reason: String,
    pub original: serde_json::Value,
}
