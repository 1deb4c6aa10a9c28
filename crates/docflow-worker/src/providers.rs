//! Placeholder OCR/LLM provider adapters (spec §1 Non-goals: "OCR provider
//! integration", "LLM provider integration" are out of scope for this
//! crate). A real deployment swaps these two types for adapters that call
//! an actual OCR engine and LLM backend — nothing else in the worker
//! binary needs to change to do so.

use async_trait::async_trait;
use docflow_pipeline::{LlmProvider, OcrOutput, OcrProvider};

/// Errors loudly on the first `ocr` message rather than silently
/// succeeding, so a deployment missing a real OCR adapter fails fast.
pub struct UnimplementedOcrProvider;

#[async_trait]
impl OcrProvider for UnimplementedOcrProvider {
    async fn run(&self, _pdf_bytes: &[u8]) -> anyhow::Result<OcrOutput> {
        Err(anyhow::anyhow!(
            "no OCR provider is wired into this worker host; replace `UnimplementedOcrProvider` with a real adapter"
        ))
    }
}

/// As [`UnimplementedOcrProvider`], for the LLM backend.
pub struct UnimplementedLlmProvider;

#[async_trait]
impl LlmProvider for UnimplementedLlmProvider {
    async fn complete(&self, _prompt: &str, _document_text: &str) -> anyhow::Result<serde_json::Value> {
        Err(anyhow::anyhow!(
            "no LLM provider is wired into this worker host; replace `UnimplementedLlmProvider` with a real adapter"
        ))
    }
}
