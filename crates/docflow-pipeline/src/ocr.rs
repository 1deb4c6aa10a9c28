//! The `ocr` queue handler (spec §4.4.1).

use docflow_core::{HandlerOutcome, Reporter};
use docflow_retry::{RetryExecutor, RetryPolicy};
use docflow_types::{Document, DocumentState, EventPayload, EventType, KbIndexMsg, LlmMsg, OcrErrMsg, OcrMsg};
use thiserror::Error;

use crate::context::Context;

/// The bucket `doc.pdf_file_name` is keyed under (spec §4.4.1 step 4).
const PDF_BUCKET: &str = "pdf";

#[derive(Debug, Error)]
enum OcrFailure {
    /// Missing `pdf_file_name` on the document record — a distinct
    /// failure branch from "file not found" (spec §11.2).
    #[error("document is missing its pdf_file_name")]
    MissingMetadata,
    #[error("pdf blob `{0}` not found after retries")]
    BlobNotFound(String),
    #[error("{0}")]
    Provider(String),
    #[error("{0}")]
    Artifact(String),
}

enum BlobFetchError {
    NotFound,
    Store(String),
}

/// Run the `ocr` handler for one message (spec §4.4.1 steps 1-5).
pub async fn handle_ocr_message(ctx: &Context, msg: &OcrMsg, reporter: &mut dyn Reporter) -> HandlerOutcome {
    let doc = match ctx.documents.get(&msg.document_id).await {
        Ok(Some(doc)) => doc,
        Ok(None) => return HandlerOutcome::DocumentGone,
        Err(e) => {
            reporter.error(&format!("ocr: failed to load document `{}`: {e}", msg.document_id));
            return HandlerOutcome::failed("ocr", e.to_string());
        }
    };

    if !Document::ocr_supported(&doc.user_file_name) {
        return pass_through(ctx, &doc, reporter).await;
    }

    if let Err(e) = ctx
        .documents
        .update_state(&doc.doc_id, DocumentState::OcrProcessing)
        .await
    {
        reporter.error(&format!("ocr: failed to mark `{}` processing: {e}", doc.doc_id));
        return HandlerOutcome::failed("ocr", e.to_string());
    }

    let already_has_artifact = ctx.ocr_artifacts.exists(&doc.doc_id).await.unwrap_or(false);
    if !already_has_artifact || msg.force {
        if let Err(failure) = run_ocr(ctx, &doc, reporter).await {
            return fail_ocr(ctx, &doc, failure, reporter).await;
        }
    }

    complete_ocr(ctx, &doc, reporter).await
}

/// Fetch the PDF blob (retrying on not-found, spec §4.4.1's "race with
/// upload-commit"), invoke the OCR provider, and save the artifact.
async fn run_ocr(ctx: &Context, doc: &Document, reporter: &mut dyn Reporter) -> Result<(), OcrFailure> {
    let pdf_key = doc.pdf_file_name.as_deref().ok_or(OcrFailure::MissingMetadata)?;

    let executor = RetryExecutor::from_policy(RetryPolicy::BlobFetch);
    let blob = executor
        .run_if(
            |e: &BlobFetchError| matches!(e, BlobFetchError::NotFound),
            |_attempt| async move {
                match ctx.blobs.get(PDF_BUCKET, pdf_key).await {
                    Ok(Some(blob)) => Ok(blob),
                    Ok(None) => Err(BlobFetchError::NotFound),
                    Err(e) => Err(BlobFetchError::Store(e.to_string())),
                }
            },
        )
        .await
        .map_err(|e| match e {
            BlobFetchError::NotFound => OcrFailure::BlobNotFound(pdf_key.to_string()),
            BlobFetchError::Store(msg) => OcrFailure::Provider(msg),
        })?;

    let output = ctx
        .ocr_provider
        .run(&blob.bytes)
        .await
        .map_err(|e| OcrFailure::Provider(e.to_string()))?;

    ctx.ocr_artifacts
        .save(&doc.doc_id, &output)
        .await
        .map_err(|e| OcrFailure::Artifact(e.to_string()))?;

    reporter.info(&format!(
        "ocr: document `{}` processed ({} page(s))",
        doc.doc_id,
        output.pages.len()
    ));
    Ok(())
}

async fn fail_ocr(ctx: &Context, doc: &Document, failure: OcrFailure, reporter: &mut dyn Reporter) -> HandlerOutcome {
    let reason = failure.to_string();
    reporter.error(&format!("ocr: document `{}` failed: {reason}", doc.doc_id));

    let _ = ctx.documents.update_state(&doc.doc_id, DocumentState::OcrFailed).await;

    let _ = ctx
        .delivery
        .enqueue_event(
            EventType::DocumentError,
            &doc.organization_id,
            Some(doc.doc_id.clone()),
            EventPayload::DocumentError {
                document_id: doc.doc_id.clone(),
                stage: "ocr".to_string(),
                message: reason.clone(),
            },
        )
        .await;

    let err_msg = OcrErrMsg {
        document_id: Some(doc.doc_id.clone()),
        reason: reason.clone(),
        original: serde_json::to_value(OcrMsg::new(doc.doc_id.clone())).unwrap_or_default(),
    };
    if let Ok(payload) = serde_json::to_value(&err_msg) {
        let _ = ctx.queue.send("ocr_err", payload).await;
    }

    HandlerOutcome::failed("ocr", reason)
}

async fn complete_ocr(ctx: &Context, doc: &Document, reporter: &mut dyn Reporter) -> HandlerOutcome {
    if let Err(e) = ctx
        .documents
        .update_state(&doc.doc_id, DocumentState::OcrCompleted)
        .await
    {
        reporter.error(&format!("ocr: failed to mark `{}` completed: {e}", doc.doc_id));
        return HandlerOutcome::failed("ocr", e.to_string());
    }
    enqueue_downstream(ctx, &doc.doc_id, reporter).await;
    HandlerOutcome::Advanced
}

/// Unsupported-extension pass-through (spec §4.4.1 step 2): skip straight
/// to `ocr_completed` without ever entering `ocr_processing`.
async fn pass_through(ctx: &Context, doc: &Document, reporter: &mut dyn Reporter) -> HandlerOutcome {
    if let Err(e) = ctx
        .documents
        .update_state(&doc.doc_id, DocumentState::OcrCompleted)
        .await
    {
        reporter.error(&format!("ocr: failed to mark `{}` completed: {e}", doc.doc_id));
        return HandlerOutcome::failed("ocr", e.to_string());
    }
    enqueue_downstream(ctx, &doc.doc_id, reporter).await;
    HandlerOutcome::Advanced
}

async fn enqueue_downstream(ctx: &Context, doc_id: &str, reporter: &mut dyn Reporter) {
    if let Ok(payload) = serde_json::to_value(LlmMsg::new(doc_id)) {
        if let Err(e) = ctx.queue.send("llm", payload).await {
            reporter.error(&format!("ocr: failed to enqueue llm for `{doc_id}`: {e}"));
        }
    }
    if let Ok(payload) = serde_json::to_value(KbIndexMsg::new(doc_id)) {
        if let Err(e) = ctx.queue.send("kb_index", payload).await {
            reporter.error(&format!("ocr: failed to enqueue kb_index for `{doc_id}`: {e}"));
        }
    }
}
