//! The Document State Store (spec §4.3): the persistent record of each
//! document and its current pipeline position.

use std::collections::BTreeMap;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use bson::doc;
use chrono::Utc;
use docflow_types::{Document, DocumentState};
use mongodb::Database;

use crate::StoreError;

/// Persistent record of each document and its current pipeline position
/// (spec §4.3).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// `None` on an unknown document — unknown is not an error.
    async fn get(&self, doc_id: &str) -> Result<Option<Document>, StoreError>;

    /// Insert or fully replace a document record.
    async fn put(&self, document: Document) -> Result<(), StoreError>;

    /// No-op if the document doesn't exist. Cascading deletes of blobs,
    /// OCR artifacts, LLM results, KB vectors and webhook events
    /// referencing the document (spec §3) are the caller's
    /// responsibility — this store only owns the document record.
    async fn delete(&self, doc_id: &str) -> Result<(), StoreError>;

    /// Page through documents ordered by `upload_date` ascending,
    /// returning the page and the total count.
    async fn list(&self, skip: u64, limit: u64) -> Result<(Vec<Document>, u64), StoreError>;

    /// Set `state` and stamp `state_updated_at` with the current UTC
    /// instant. A no-op if `doc_id` is unknown (spec §4.3).
    async fn update_state(&self, doc_id: &str, state: DocumentState) -> Result<(), StoreError>;
}

// --- In-memory reference implementation --------------------------------

/// An in-memory [`DocumentStore`] — the reference implementation used by
/// pipeline-handler tests that don't need a live database.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: StdMutex<BTreeMap<String, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, doc_id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.lock().unwrap().get(doc_id).cloned())
    }

    async fn put(&self, document: Document) -> Result<(), StoreError> {
        self.documents
            .lock()
            .unwrap()
            .insert(document.doc_id.clone(), document);
        Ok(())
    }

    async fn delete(&self, doc_id: &str) -> Result<(), StoreError> {
        self.documents.lock().unwrap().remove(doc_id);
        Ok(())
    }

    async fn list(&self, skip: u64, limit: u64) -> Result<(Vec<Document>, u64), StoreError> {
        let docs = self.documents.lock().unwrap();
        let mut all: Vec<Document> = docs.values().cloned().collect();
        all.sort_by_key(|d| d.upload_date);
        let total = all.len() as u64;
        let page = all
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn update_state(&self, doc_id: &str, state: DocumentState) -> Result<(), StoreError> {
        let mut docs = self.documents.lock().unwrap();
        if let Some(document) = docs.get_mut(doc_id) {
            document.state = state;
            document.state_updated_at = Utc::now();
        }
        Ok(())
    }
}

// --- MongoDB-backed production implementation --------------------------

/// The MongoDB-backed [`DocumentStore`]: one `documents` collection,
/// `_id` holding the 24-char `doc_id`.
pub struct MongoDocumentStore {
    collection: mongodb::Collection<MongoDocument>,
}

/// Wire shape for a document record — identical to [`Document`] except
/// `doc_id` is renamed `_id` so Mongo treats it as the primary key.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct MongoDocument {
    #[serde(rename = "_id")]
    doc_id: String,
    organization_id: String,
    user_file_name: String,
    mongo_file_name: Option<String>,
    pdf_file_name: Option<String>,
    #[serde(default)]
    tag_ids: Vec<String>,
    state: DocumentState,
    state_updated_at: chrono::DateTime<Utc>,
    upload_date: chrono::DateTime<Utc>,
}

impl From<Document> for MongoDocument {
    fn from(d: Document) -> Self {
        MongoDocument {
            doc_id: d.doc_id,
            organization_id: d.organization_id,
            user_file_name: d.user_file_name,
            mongo_file_name: d.mongo_file_name,
            pdf_file_name: d.pdf_file_name,
            tag_ids: d.tag_ids,
            state: d.state,
            state_updated_at: d.state_updated_at,
            upload_date: d.upload_date,
        }
    }
}

impl From<MongoDocument> for Document {
    fn from(d: MongoDocument) -> Self {
        Document {
            doc_id: d.doc_id,
            organization_id: d.organization_id,
            user_file_name: d.user_file_name,
            mongo_file_name: d.mongo_file_name,
            pdf_file_name: d.pdf_file_name,
            tag_ids: d.tag_ids,
            state: d.state,
            state_updated_at: d.state_updated_at,
            upload_date: d.upload_date,
        }
    }
}

impl MongoDocumentStore {
    pub fn new(db: Database) -> Self {
        Self {
            collection: db.collection("documents"),
        }
    }

    fn to_transport_err(e: mongodb::error::Error) -> StoreError {
        StoreError::Transport(e.to_string())
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn get(&self, doc_id: &str) -> Result<Option<Document>, StoreError> {
        let found = self
            .collection
            .find_one(doc! { "_id": doc_id })
            .await
            .map_err(Self::to_transport_err)?;
        Ok(found.map(Document::from))
    }

    async fn put(&self, document: Document) -> Result<(), StoreError> {
        let doc_id = document.doc_id.clone();
        let wire: MongoDocument = document.into();
        self.collection
            .replace_one(doc! { "_id": &doc_id }, &wire)
            .upsert(true)
            .await
            .map_err(Self::to_transport_err)?;
        Ok(())
    }

    async fn delete(&self, doc_id: &str) -> Result<(), StoreError> {
        self.collection
            .delete_one(doc! { "_id": doc_id })
            .await
            .map_err(Self::to_transport_err)?;
        Ok(())
    }

    async fn list(&self, skip: u64, limit: u64) -> Result<(Vec<Document>, u64), StoreError> {
        use futures::stream::TryStreamExt;

        let total = self
            .collection
            .count_documents(doc! {})
            .await
            .map_err(Self::to_transport_err)?;

        let mut cursor = self
            .collection
            .find(doc! {})
            .sort(doc! { "upload_date": 1 })
            .skip(skip)
            .limit(limit as i64)
            .await
            .map_err(Self::to_transport_err)?;

        let mut docs = Vec::new();
        while let Some(d) = cursor.try_next().await.map_err(Self::to_transport_err)? {
            docs.push(Document::from(d));
        }
        Ok((docs, total))
    }

    async fn update_state(&self, doc_id: &str, state: DocumentState) -> Result<(), StoreError> {
        let now = bson::DateTime::from_chrono(Utc::now());
        self.collection
            .update_one(
                doc! { "_id": doc_id },
                doc! { "$set": { "state": bson::to_bson(&state).map_err(|e| StoreError::Transport(e.to_string()))?, "state_updated_at": now } },
            )
            .await
            .map_err(Self::to_transport_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_types::DocumentState;

    fn sample(doc_id: &str) -> Document {
        Document {
            doc_id: doc_id.to_string(),
            organization_id: "org-1".to_string(),
            user_file_name: "doc-A.pdf".to_string(),
            mongo_file_name: Some("mongo-doc-A".to_string()),
            pdf_file_name: Some("pdf/doc-A.pdf".to_string()),
            tag_ids: vec![],
            state: DocumentState::Uploaded,
            state_updated_at: Utc::now(),
            upload_date: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_missing_document_returns_none() {
        let store = InMemoryDocumentStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryDocumentStore::new();
        store.put(sample("doc-1")).await.unwrap();
        let found = store.get("doc-1").await.unwrap().unwrap();
        assert_eq!(found.organization_id, "org-1");
    }

    #[tokio::test]
    async fn update_state_on_unknown_document_is_a_no_op() {
        let store = InMemoryDocumentStore::new();
        store
            .update_state("missing", DocumentState::OcrCompleted)
            .await
            .unwrap();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_state_stamps_state_updated_at() {
        let store = InMemoryDocumentStore::new();
        let mut doc = sample("doc-1");
        doc.state_updated_at = Utc::now() - chrono::Duration::days(1);
        let before = doc.state_updated_at;
        store.put(doc).await.unwrap();

        store
            .update_state("doc-1", DocumentState::OcrProcessing)
            .await
            .unwrap();

        let after = store.get("doc-1").await.unwrap().unwrap();
        assert_eq!(after.state, DocumentState::OcrProcessing);
        assert!(after.state_updated_at > before);
    }

    #[tokio::test]
    async fn list_orders_by_upload_date_ascending_and_reports_total() {
        let store = InMemoryDocumentStore::new();
        let mut first = sample("doc-1");
        first.upload_date = Utc::now() - chrono::Duration::hours(2);
        let mut second = sample("doc-2");
        second.upload_date = Utc::now() - chrono::Duration::hours(1);
        store.put(second).await.unwrap();
        store.put(first).await.unwrap();

        let (page, total) = store.list(0, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page[0].doc_id, "doc-1");
        assert_eq!(page[1].doc_id, "doc-2");
    }

    #[tokio::test]
    async fn list_respects_skip_and_limit() {
        let store = InMemoryDocumentStore::new();
        for i in 0..5 {
            let mut d = sample(&format!("doc-{i}"));
            d.upload_date = Utc::now() + chrono::Duration::seconds(i);
            store.put(d).await.unwrap();
        }
        let (page, total) = store.list(2, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].doc_id, "doc-2");
        assert_eq!(page[1].doc_id, "doc-3");
    }
}
