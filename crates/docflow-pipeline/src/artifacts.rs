//! OCR artifact and LLM result caches — the "already processed, skip
//! unless `force`" state each handler checks before doing real work
//! (spec §4.4.1 step 3, §4.4.2 step 3).
//!
//! A blob-backed implementation reuses the Blob Store (spec §4.1) rather
//! than inventing a third storage seam; an in-memory one drives handler
//! tests without a database.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use docflow_store::BlobStore;
use thiserror::Error;

use crate::providers::OcrOutput;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact store transport error: {0}")]
    Transport(String),
    #[error("failed to (de)serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

const OCR_ARTIFACT_BUCKET: &str = "ocr_artifacts";
const LLM_RESULT_BUCKET: &str = "llm_results";

/// Cache of per-document OCR output, keyed by `document_id` (spec
/// §4.4.1 step 3's "already exists" check).
#[async_trait]
pub trait OcrArtifactStore: Send + Sync {
    async fn exists(&self, document_id: &str) -> Result<bool, ArtifactError>;
    async fn save(&self, document_id: &str, output: &OcrOutput) -> Result<(), ArtifactError>;
    async fn load(&self, document_id: &str) -> Result<Option<OcrOutput>, ArtifactError>;
}

/// Cache of per-`(document_id, prompt_id)` LLM results (spec §4.4.2 step 3).
#[async_trait]
pub trait LlmResultStore: Send + Sync {
    async fn get(&self, document_id: &str, prompt_id: &str) -> Result<Option<serde_json::Value>, ArtifactError>;
    async fn put(&self, document_id: &str, prompt_id: &str, result: serde_json::Value) -> Result<(), ArtifactError>;
}

// --- In-memory reference implementations -------------------------------

#[derive(Default)]
pub struct InMemoryOcrArtifactStore {
    artifacts: StdMutex<BTreeMap<String, OcrOutput>>,
}

impl InMemoryOcrArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OcrArtifactStore for InMemoryOcrArtifactStore {
    async fn exists(&self, document_id: &str) -> Result<bool, ArtifactError> {
        Ok(self.artifacts.lock().unwrap().contains_key(document_id))
    }

    async fn save(&self, document_id: &str, output: &OcrOutput) -> Result<(), ArtifactError> {
        self.artifacts
            .lock()
            .unwrap()
            .insert(document_id.to_string(), output.clone());
        Ok(())
    }

    async fn load(&self, document_id: &str) -> Result<Option<OcrOutput>, ArtifactError> {
        Ok(self.artifacts.lock().unwrap().get(document_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryLlmResultStore {
    results: StdMutex<BTreeMap<(String, String), serde_json::Value>>,
}

impl InMemoryLlmResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LlmResultStore for InMemoryLlmResultStore {
    async fn get(&self, document_id: &str, prompt_id: &str) -> Result<Option<serde_json::Value>, ArtifactError> {
        Ok(self
            .results
            .lock()
            .unwrap()
            .get(&(document_id.to_string(), prompt_id.to_string()))
            .cloned())
    }

    async fn put(&self, document_id: &str, prompt_id: &str, result: serde_json::Value) -> Result<(), ArtifactError> {
        self.results
            .lock()
            .unwrap()
            .insert((document_id.to_string(), prompt_id.to_string()), result);
        Ok(())
    }
}

// --- Blob-store-backed implementations ----------------------------------

/// Stores each document's OCR output as a single JSON-encoded blob, keyed
/// by `document_id` in a dedicated bucket — reuses the Blob Store rather
/// than adding a fourth backend for what is really just another object.
pub struct BlobOcrArtifactStore {
    blobs: Arc<dyn BlobStore>,
}

impl BlobOcrArtifactStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }
}

#[async_trait]
impl OcrArtifactStore for BlobOcrArtifactStore {
    async fn exists(&self, document_id: &str) -> Result<bool, ArtifactError> {
        Ok(self
            .blobs
            .get(OCR_ARTIFACT_BUCKET, document_id)
            .await
            .map_err(|e| ArtifactError::Transport(e.to_string()))?
            .is_some())
    }

    async fn save(&self, document_id: &str, output: &OcrOutput) -> Result<(), ArtifactError> {
        let bytes = serde_json::to_vec(output)?;
        self.blobs
            .put(OCR_ARTIFACT_BUCKET, document_id, bytes, Default::default())
            .await
            .map_err(|e| ArtifactError::Transport(e.to_string()))
    }

    async fn load(&self, document_id: &str) -> Result<Option<OcrOutput>, ArtifactError> {
        let Some(blob) = self
            .blobs
            .get(OCR_ARTIFACT_BUCKET, document_id)
            .await
            .map_err(|e| ArtifactError::Transport(e.to_string()))?
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&blob.bytes)?))
    }
}

/// Stores each `(document_id, prompt_id)` LLM result as a blob keyed by
/// `{document_id}/{prompt_id}` in a dedicated bucket.
pub struct BlobLlmResultStore {
    blobs: Arc<dyn BlobStore>,
}

impl BlobLlmResultStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    fn key(document_id: &str, prompt_id: &str) -> String {
        format!("{document_id}/{prompt_id}")
    }
}

#[async_trait]
impl LlmResultStore for BlobLlmResultStore {
    async fn get(&self, document_id: &str, prompt_id: &str) -> Result<Option<serde_json::Value>, ArtifactError> {
        let key = Self::key(document_id, prompt_id);
        let Some(blob) = self
            .blobs
            .get(LLM_RESULT_BUCKET, &key)
            .await
            .map_err(|e| ArtifactError::Transport(e.to_string()))?
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&blob.bytes)?))
    }

    async fn put(&self, document_id: &str, prompt_id: &str, result: serde_json::Value) -> Result<(), ArtifactError> {
        let key = Self::key(document_id, prompt_id);
        let bytes = serde_json::to_vec(&result)?;
        self.blobs
            .put(LLM_RESULT_BUCKET, &key, bytes, Default::default())
            .await
            .map_err(|e| ArtifactError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_ocr_artifacts_round_trip() {
        let store = InMemoryOcrArtifactStore::new();
        assert!(!store.exists("doc-1").await.unwrap());

        let output = OcrOutput {
            blocks: serde_json::json!({ "blocks": [] }),
            pages: vec!["page one".to_string()],
        };
        store.save("doc-1", &output).await.unwrap();

        assert!(store.exists("doc-1").await.unwrap());
        let loaded = store.load("doc-1").await.unwrap().unwrap();
        assert_eq!(loaded.pages, vec!["page one".to_string()]);
    }

    #[tokio::test]
    async fn in_memory_llm_results_are_scoped_by_prompt_id() {
        let store = InMemoryLlmResultStore::new();
        store.put("doc-1", "default", serde_json::json!({"a": 1})).await.unwrap();
        store.put("doc-1", "custom", serde_json::json!({"a": 2})).await.unwrap();

        assert_eq!(store.get("doc-1", "default").await.unwrap(), Some(serde_json::json!({"a": 1})));
        assert_eq!(store.get("doc-1", "custom").await.unwrap(), Some(serde_json::json!({"a": 2})));
        assert_eq!(store.get("doc-1", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn blob_backed_ocr_artifacts_round_trip() {
        let blobs: Arc<dyn BlobStore> = Arc::new(docflow_store::blob::FileBlobStore::new(
            tempfile_dir(),
        ));
        let store = BlobOcrArtifactStore::new(blobs);
        assert!(!store.exists("doc-1").await.unwrap());

        let output = OcrOutput {
            blocks: serde_json::json!({}),
            pages: vec!["hello".to_string()],
        };
        store.save("doc-1", &output).await.unwrap();
        let loaded = store.load("doc-1").await.unwrap().unwrap();
        assert_eq!(loaded.pages, output.pages);
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("docflow-pipeline-test-{}", std::process::id()));
        dir
    }
}
