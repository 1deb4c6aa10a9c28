//! The Pipeline Orchestrator (spec §4.4): the `ocr`, `llm`, `kb_index`,
//! and `webhook` queue handlers, plus the `Context` they're invoked with.
//!
//! One function per stage, driven by an injected `Reporter`, over a
//! shared `Context` rather than module-level singletons.

pub mod artifacts;
pub mod context;
pub mod kb_index;
pub mod llm;
pub mod ocr;
pub mod prompts;
pub mod providers;
pub mod webhook;

pub use artifacts::{ArtifactError, LlmResultStore, OcrArtifactStore};
pub use context::Context;
pub use kb_index::handle_kb_index_message;
pub use llm::handle_llm_message;
pub use ocr::handle_ocr_message;
pub use prompts::PromptResolver;
pub use providers::{LlmProvider, OcrOutput, OcrProvider};
pub use webhook::handle_webhook_message;

/// The complete set of queues a worker host must wire a consumer for
/// (spec §4.4.4: "this keeps the handler registry total"). `ocr_err` is
/// listed for completeness even though it has no automatic handler — it's
/// an audit sink, not a consumer queue (spec §11 supplement).
pub const HANDLED_QUEUES: &[&str] = &["ocr", "llm", "kb_index", "webhook"];
