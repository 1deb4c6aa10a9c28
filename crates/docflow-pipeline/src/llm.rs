//! The `llm` queue handler (spec §4.4.2, §11.3).

use std::collections::HashSet;

use docflow_core::{HandlerOutcome, Reporter};
use docflow_types::{Document, DocumentState, EventPayload, EventType, LlmMsg};

use crate::context::Context;

/// Run the `llm` handler for one message (spec §4.4.2 steps 1-4).
pub async fn handle_llm_message(ctx: &Context, msg: &LlmMsg, reporter: &mut dyn Reporter) -> HandlerOutcome {
    let doc = match ctx.documents.get(&msg.document_id).await {
        Ok(Some(doc)) => doc,
        Ok(None) => return HandlerOutcome::DocumentGone,
        Err(e) => {
            reporter.error(&format!("llm: failed to load document `{}`: {e}", msg.document_id));
            return HandlerOutcome::failed("llm", e.to_string());
        }
    };

    if let Err(e) = ctx
        .documents
        .update_state(&doc.doc_id, DocumentState::LlmProcessing)
        .await
    {
        reporter.error(&format!("llm: failed to mark `{}` processing: {e}", doc.doc_id));
        return HandlerOutcome::failed("llm", e.to_string());
    }

    match run_llm(ctx, &doc, msg.force, reporter).await {
        Ok(prompt_ids) => {
            if let Err(e) = ctx
                .documents
                .update_state(&doc.doc_id, DocumentState::LlmCompleted)
                .await
            {
                reporter.error(&format!("llm: failed to mark `{}` completed: {e}", doc.doc_id));
                return HandlerOutcome::failed("llm", e.to_string());
            }
            let _ = ctx
                .delivery
                .enqueue_event(
                    EventType::LlmCompleted,
                    &doc.organization_id,
                    Some(doc.doc_id.clone()),
                    EventPayload::LlmCompleted {
                        document_id: doc.doc_id.clone(),
                        prompt_ids,
                    },
                )
                .await;
            HandlerOutcome::Advanced
        }
        Err(reason) => {
            reporter.error(&format!("llm: document `{}` failed: {reason}", doc.doc_id));
            let _ = ctx.documents.update_state(&doc.doc_id, DocumentState::LlmFailed).await;
            let _ = ctx
                .delivery
                .enqueue_event(
                    EventType::LlmError,
                    &doc.organization_id,
                    Some(doc.doc_id.clone()),
                    EventPayload::LlmError {
                        document_id: doc.doc_id.clone(),
                        message: reason.clone(),
                    },
                )
                .await;
            HandlerOutcome::failed("llm", reason)
        }
    }
}

/// Resolve the prompt ids to run, then run (or skip) each one against the
/// document's OCR text, returning the ids actually considered.
async fn run_llm(ctx: &Context, doc: &Document, force: bool, reporter: &mut dyn Reporter) -> Result<Vec<String>, String> {
    let tag_bound = ctx
        .prompts
        .prompt_ids_for_tags(&doc.tag_ids)
        .await
        .map_err(|e| e.to_string())?;

    // "default" always runs first; tag-bound prompts follow in the order
    // the resolver returned them, deduplicated first-seen-wins (spec §11.3).
    let mut prompt_ids = Vec::with_capacity(tag_bound.len() + 1);
    let mut seen = HashSet::new();
    for id in std::iter::once("default".to_string()).chain(tag_bound) {
        if seen.insert(id.clone()) {
            prompt_ids.push(id);
        }
    }

    let document_text = ctx
        .ocr_artifacts
        .load(&doc.doc_id)
        .await
        .map_err(|e| e.to_string())?
        .map(|artifact| artifact.pages.join("\n"))
        .unwrap_or_default();

    for prompt_id in &prompt_ids {
        let cached = ctx
            .llm_results
            .get(&doc.doc_id, prompt_id)
            .await
            .map_err(|e| e.to_string())?;
        if cached.is_some() && !force {
            continue;
        }

        let prompt_text = ctx
            .prompts
            .compose(prompt_id, &document_text)
            .await
            .map_err(|e| e.to_string())?;
        let result = ctx
            .llm_provider
            .complete(&prompt_text, &document_text)
            .await
            .map_err(|e| e.to_string())?;
        ctx.llm_results
            .put(&doc.doc_id, prompt_id, result)
            .await
            .map_err(|e| e.to_string())?;
    }

    reporter.info(&format!(
        "llm: document `{}` processed {} prompt(s)",
        doc.doc_id,
        prompt_ids.len()
    ));
    Ok(prompt_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{InMemoryLlmResultStore, InMemoryOcrArtifactStore, OcrArtifactStore};
    use crate::prompts::InMemoryPromptResolver;
    use crate::providers::fakes::{EchoLlmProvider, FailingLlmProvider, FixedOcrProvider};
    use crate::providers::OcrOutput;
    use chrono::Utc;
    use docflow_core::reporter::EprintlnReporter;
    use docflow_delivery::{DeliveryEngine, InMemoryDeliveryStore, InMemoryWebhookConfigStore};
    use docflow_queue::memory::InMemoryQueueStore;
    use docflow_store::{blob::FileBlobStore, document::InMemoryDocumentStore};
    use docflow_types::DocumentState;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn sample_doc(doc_id: &str, tag_ids: Vec<String>) -> Document {
        Document {
            doc_id: doc_id.to_string(),
            organization_id: "org-1".to_string(),
            user_file_name: "scan.pdf".to_string(),
            mongo_file_name: Some("mongo-doc".to_string()),
            pdf_file_name: Some("doc-A.pdf".to_string()),
            tag_ids,
            state: DocumentState::OcrCompleted,
            state_updated_at: Utc::now(),
            upload_date: Utc::now(),
        }
    }

    async fn test_context(
        llm_provider: Arc<dyn crate::providers::LlmProvider>,
        prompts: Arc<InMemoryPromptResolver>,
    ) -> (Context, Arc<InMemoryQueueStore>) {
        let queue = Arc::new(InMemoryQueueStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let dir = std::env::temp_dir().join(format!("docflow-llm-test-{}-{:?}", std::process::id(), std::thread::current().id()));
        let blobs = Arc::new(FileBlobStore::new(dir));
        let ocr_artifacts = Arc::new(InMemoryOcrArtifactStore::new());
        let llm_results = Arc::new(InMemoryLlmResultStore::new());
        let ocr_provider = Arc::new(FixedOcrProvider::new(vec![]));
        let configs = Arc::new(InMemoryWebhookConfigStore::new());
        let deliveries = Arc::new(InMemoryDeliveryStore::new());
        let delivery = Arc::new(DeliveryEngine::new(configs, deliveries, queue.clone(), "master").unwrap());

        ocr_artifacts
            .save(
                "doc-1",
                &OcrOutput {
                    blocks: serde_json::json!({}),
                    pages: vec!["document body".to_string()],
                },
            )
            .await
            .unwrap();

        let ctx = Context::new(
            queue.clone(),
            documents.clone(),
            blobs,
            ocr_artifacts,
            llm_results,
            ocr_provider,
            llm_provider,
            prompts,
            delivery,
        );
        documents.put(sample_doc("doc-1", vec![])).await.unwrap();
        (ctx, queue)
    }

    #[tokio::test]
    async fn missing_document_is_a_no_op() {
        let (ctx, _queue) = test_context(Arc::new(EchoLlmProvider::new()), Arc::new(InMemoryPromptResolver::new())).await;
        let mut reporter = EprintlnReporter::new();
        let outcome = handle_llm_message(&ctx, &LlmMsg::new("does-not-exist"), &mut reporter).await;
        assert_eq!(outcome, HandlerOutcome::DocumentGone);
    }

    #[tokio::test]
    async fn default_prompt_runs_first_and_is_deduped_against_tag_bound() {
        let provider = Arc::new(EchoLlmProvider::new());
        let prompts = Arc::new(
            InMemoryPromptResolver::new().with_tag("invoice", vec!["default".to_string(), "invoice-extract".to_string()]),
        );
        let (ctx, _queue) = test_context(provider.clone(), prompts).await;
        let mut doc = ctx.documents.get("doc-1").await.unwrap().unwrap();
        doc.tag_ids = vec!["invoice".to_string()];
        ctx.documents.put(doc).await.unwrap();
        let mut reporter = EprintlnReporter::new();

        let outcome = handle_llm_message(&ctx, &LlmMsg::new("doc-1"), &mut reporter).await;
        assert_eq!(outcome, HandlerOutcome::Advanced);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        let doc = ctx.documents.get("doc-1").await.unwrap().unwrap();
        assert_eq!(doc.state, DocumentState::LlmCompleted);
        assert!(ctx.llm_results.get("doc-1", "default").await.unwrap().is_some());
        assert!(ctx.llm_results.get("doc-1", "invoice-extract").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cached_result_is_skipped_unless_forced() {
        let provider = Arc::new(EchoLlmProvider::new());
        let (ctx, _queue) = test_context(provider.clone(), Arc::new(InMemoryPromptResolver::new())).await;
        let mut reporter = EprintlnReporter::new();

        handle_llm_message(&ctx, &LlmMsg::new("doc-1"), &mut reporter).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let mut doc = ctx.documents.get("doc-1").await.unwrap().unwrap();
        doc.state = DocumentState::OcrCompleted;
        ctx.documents.put(doc).await.unwrap();
        handle_llm_message(&ctx, &LlmMsg::new("doc-1"), &mut reporter).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let mut forced = LlmMsg::new("doc-1");
        forced.force = true;
        handle_llm_message(&ctx, &forced, &mut reporter).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn provider_failure_marks_llm_failed() {
        let (ctx, _queue) = test_context(Arc::new(FailingLlmProvider), Arc::new(InMemoryPromptResolver::new())).await;
        let mut reporter = EprintlnReporter::new();

        let outcome = handle_llm_message(&ctx, &LlmMsg::new("doc-1"), &mut reporter).await;
        assert!(matches!(outcome, HandlerOutcome::Failed { stage: "llm", .. }));

        let doc = ctx.documents.get("doc-1").await.unwrap().unwrap();
        assert_eq!(doc.state, DocumentState::LlmFailed);
    }
}
