//! The OCR and LLM provider seams (spec §1 Non-goals, §9 design note on
//! `Context`). Both the OCR engine and the LLM backend are explicitly out
//! of scope for this crate — handlers only need a trait object to call
//! through, the same way `AccountingPort` stands in for out-of-scope
//! billing hooks. A production binary wires a real provider in; tests wire
//! a fake.

use async_trait::async_trait;

/// What the OCR handler persists as an artifact (spec §4.4.1 step 4):
/// the provider's raw block structure plus flat text derived per page.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OcrOutput {
    /// Provider-specific block/layout structure, opaque to this crate.
    pub blocks: serde_json::Value,
    /// Flat text, one entry per page, in page order.
    pub pages: Vec<String>,
}

/// Out-of-scope OCR engine integration (spec §1). Implementations turn raw
/// PDF bytes into blocks + flat text; this crate never implements one.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    async fn run(&self, pdf_bytes: &[u8]) -> anyhow::Result<OcrOutput>;
}

/// Out-of-scope LLM backend integration (spec §1). Implementations run a
/// composed prompt against the document text and return parsed JSON.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str, document_text: &str) -> anyhow::Result<serde_json::Value>;
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A fake OCR provider that always succeeds with one page of text.
    pub struct FixedOcrProvider {
        pub pages: Vec<String>,
        pub calls: AtomicUsize,
    }

    impl FixedOcrProvider {
        pub fn new(pages: Vec<String>) -> Self {
            Self { pages, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl OcrProvider for FixedOcrProvider {
        async fn run(&self, _pdf_bytes: &[u8]) -> anyhow::Result<OcrOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(OcrOutput {
                blocks: serde_json::json!({ "blocks": [] }),
                pages: self.pages.clone(),
            })
        }
    }

    /// A fake OCR provider that always fails.
    pub struct FailingOcrProvider;

    #[async_trait]
    impl OcrProvider for FailingOcrProvider {
        async fn run(&self, _pdf_bytes: &[u8]) -> anyhow::Result<OcrOutput> {
            Err(anyhow::anyhow!("ocr engine exploded"))
        }
    }

    /// A fake LLM provider that echoes the prompt id back as the result.
    pub struct EchoLlmProvider {
        pub calls: AtomicUsize,
    }

    impl EchoLlmProvider {
        pub fn new() -> Self {
            Self { calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl LlmProvider for EchoLlmProvider {
        async fn complete(&self, prompt: &str, _document_text: &str) -> anyhow::Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "prompt": prompt }))
        }
    }

    pub struct FailingLlmProvider;

    #[async_trait]
    impl LlmProvider for FailingLlmProvider {
        async fn complete(&self, _prompt: &str, _document_text: &str) -> anyhow::Result<serde_json::Value> {
            Err(anyhow::anyhow!("llm backend exploded"))
        }
    }
}
