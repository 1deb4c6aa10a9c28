//! The `Context` dependency-injection seam (spec §9 "Cyclic / implicit
//! references"): one value carrying every handle a handler needs, passed
//! explicitly rather than reached for through module-level globals.

use std::sync::Arc;

use docflow_core::{AccountingPort, Clock, NoopAccounting, SystemClock};
use docflow_delivery::DeliveryEngine;
use docflow_queue::QueueStore;
use docflow_store::{BlobStore, DocumentStore};

use crate::artifacts::{LlmResultStore, OcrArtifactStore};
use crate::prompts::PromptResolver;
use crate::providers::{LlmProvider, OcrProvider};

/// Everything a pipeline handler needs to do its work (spec §9): the
/// queue, the document and blob stores, the OCR/LLM provider seams, the
/// prompt resolver, and the webhook delivery engine handlers publish
/// events through. Cheap to clone — every field is an `Arc`.
#[derive(Clone)]
pub struct Context {
    pub queue: Arc<dyn QueueStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub ocr_artifacts: Arc<dyn OcrArtifactStore>,
    pub llm_results: Arc<dyn LlmResultStore>,
    pub ocr_provider: Arc<dyn OcrProvider>,
    pub llm_provider: Arc<dyn LlmProvider>,
    pub prompts: Arc<dyn PromptResolver>,
    pub delivery: Arc<DeliveryEngine>,
    pub accounting: Arc<dyn AccountingPort>,
    pub clock: Arc<dyn Clock>,
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn QueueStore>,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        ocr_artifacts: Arc<dyn OcrArtifactStore>,
        llm_results: Arc<dyn LlmResultStore>,
        ocr_provider: Arc<dyn OcrProvider>,
        llm_provider: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptResolver>,
        delivery: Arc<DeliveryEngine>,
    ) -> Self {
        Self {
            queue,
            documents,
            blobs,
            ocr_artifacts,
            llm_results,
            ocr_provider,
            llm_provider,
            prompts,
            delivery,
            accounting: Arc::new(NoopAccounting),
            clock: Arc::new(SystemClock),
        }
    }

    /// Override the default no-op `AccountingPort` (spec §9 "Global
    /// mutable state" — payments/pricing as an injected interface).
    pub fn with_accounting(mut self, accounting: Arc<dyn AccountingPort>) -> Self {
        self.accounting = accounting;
        self
    }

    /// Override the default system clock — handlers don't read it
    /// directly today, but the delivery engine's scheduling and the queue
    /// recovery sweep both take an injectable `Clock` for the same reason.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
