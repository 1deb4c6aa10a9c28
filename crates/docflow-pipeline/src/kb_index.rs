//! The `kb_index` queue handler (spec §4.4.4): a template instance of the
//! idempotent-handler pattern OCR/LLM follow, with the actual vector/
//! embedding work out of scope (§1). It exists so the handler registry a
//! worker host wires up is honest about the five consumers this pipeline
//! has, not because there is real indexing logic here.

use docflow_core::{HandlerOutcome, Reporter};
use docflow_types::{DocumentState, KbIndexMsg};

use crate::context::Context;

pub async fn handle_kb_index_message(ctx: &Context, msg: &KbIndexMsg, reporter: &mut dyn Reporter) -> HandlerOutcome {
    let doc = match ctx.documents.get(&msg.document_id).await {
        Ok(Some(doc)) => doc,
        Ok(None) => return HandlerOutcome::DocumentGone,
        Err(e) => {
            reporter.error(&format!("kb_index: failed to load document `{}`: {e}", msg.document_id));
            return HandlerOutcome::failed("kb_index", e.to_string());
        }
    };

    match ctx
        .documents
        .update_state(&doc.doc_id, DocumentState::KbIndexCompleted)
        .await
    {
        Ok(()) => {
            reporter.info(&format!("kb_index: document `{}` indexed", doc.doc_id));
            HandlerOutcome::Advanced
        }
        Err(e) => {
            reporter.error(&format!("kb_index: failed to mark `{}` indexed: {e}", doc.doc_id));
            let _ = ctx
                .documents
                .update_state(&doc.doc_id, DocumentState::KbIndexFailed)
                .await;
            HandlerOutcome::failed("kb_index", e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{InMemoryLlmResultStore, InMemoryOcrArtifactStore};
    use crate::prompts::InMemoryPromptResolver;
    use crate::providers::fakes::{EchoLlmProvider, FixedOcrProvider};
    use chrono::Utc;
    use docflow_core::reporter::EprintlnReporter;
    use docflow_delivery::{DeliveryEngine, InMemoryDeliveryStore, InMemoryWebhookConfigStore};
    use docflow_queue::memory::InMemoryQueueStore;
    use docflow_store::{blob::FileBlobStore, document::InMemoryDocumentStore};
    use docflow_types::{Document, DocumentState};
    use std::sync::Arc;

    async fn test_context() -> Context {
        let queue = Arc::new(InMemoryQueueStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let dir = std::env::temp_dir().join(format!("docflow-kb-test-{}-{:?}", std::process::id(), std::thread::current().id()));
        let blobs = Arc::new(FileBlobStore::new(dir));
        let configs = Arc::new(InMemoryWebhookConfigStore::new());
        let deliveries = Arc::new(InMemoryDeliveryStore::new());
        let delivery = Arc::new(DeliveryEngine::new(configs, deliveries, queue.clone(), "master").unwrap());

        documents
            .put(Document {
                doc_id: "doc-1".to_string(),
                organization_id: "org-1".to_string(),
                user_file_name: "scan.pdf".to_string(),
                mongo_file_name: None,
                pdf_file_name: None,
                tag_ids: vec![],
                state: DocumentState::OcrCompleted,
                state_updated_at: Utc::now(),
                upload_date: Utc::now(),
            })
            .await
            .unwrap();

        Context::new(
            queue,
            documents,
            blobs,
            Arc::new(InMemoryOcrArtifactStore::new()),
            Arc::new(InMemoryLlmResultStore::new()),
            Arc::new(FixedOcrProvider::new(vec![])),
            Arc::new(EchoLlmProvider::new()),
            Arc::new(InMemoryPromptResolver::new()),
            delivery,
        )
    }

    #[tokio::test]
    async fn missing_document_is_a_no_op() {
        let ctx = test_context().await;
        let mut reporter = EprintlnReporter::new();
        let outcome = handle_kb_index_message(&ctx, &KbIndexMsg::new("does-not-exist"), &mut reporter).await;
        assert_eq!(outcome, HandlerOutcome::DocumentGone);
    }

    #[tokio::test]
    async fn marks_document_kb_index_completed_without_gating_llm() {
        let ctx = test_context().await;
        let mut reporter = EprintlnReporter::new();

        let outcome = handle_kb_index_message(&ctx, &KbIndexMsg::new("doc-1"), &mut reporter).await;
        assert_eq!(outcome, HandlerOutcome::Advanced);

        let doc = ctx.documents.get("doc-1").await.unwrap().unwrap();
        assert_eq!(doc.state, DocumentState::KbIndexCompleted);
    }
}
