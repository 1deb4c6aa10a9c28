//! The Blob Store (spec §4.1): opaque byte storage keyed by
//! `(bucket, key)` with sidecar metadata. Backs OCR input/output
//! artifacts.

use async_trait::async_trait;
use bson::{Binary, doc, spec::BinarySubtype};
use docflow_types::{Blob, BlobMetadata};
use mongodb::Database;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::StoreError;

/// The write path MUST support chunking at least this large (spec §4.1);
/// both backends chunk at this boundary so single-object size is
/// unbounded in memory.
pub const CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Durable byte storage for arbitrary-sized binary artifacts (spec §4.1).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// If an object already exists under `(bucket, key)`, delete it
    /// first (best-effort — a delete failure does not block the write,
    /// spec §11.5), then write `bytes`. Readers never observe a partial
    /// object: an incomplete upload is never addressable by `key`.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        metadata: BlobMetadata,
    ) -> Result<(), StoreError>;

    /// `None` on a missing key — missing is not an error (spec §4.1).
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Blob>, StoreError>;

    /// No-op if missing.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;
}

// --- File-backed reference implementation -----------------------------

/// A [`BlobStore`] backed by the local filesystem — useful for tests
/// without a live database, and a legitimate standalone backend for a
/// single-process deployment.
pub struct FileBlobStore {
    root: std::path::PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> std::path::PathBuf {
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, key);
        self.root.join(bucket).join(format!("{encoded}.bin"))
    }

    fn metadata_path(&self, bucket: &str, key: &str) -> std::path::PathBuf {
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, key);
        self.root.join(bucket).join(format!("{encoded}.meta.json"))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        metadata: BlobMetadata,
    ) -> Result<(), StoreError> {
        let dir = self.root.join(bucket);
        tokio::fs::create_dir_all(&dir).await?;

        // Best-effort delete-then-insert (spec §11.5); ignore a missing
        // file, surface anything else only by not blocking the write.
        let _ = tokio::fs::remove_file(self.object_path(bucket, key)).await;
        let _ = tokio::fs::remove_file(self.metadata_path(bucket, key)).await;

        // Write to a temp file in the same directory then rename, so a
        // reader never observes a partial object under `key`.
        let tmp_path = dir.join(format!(".{}.tmp", uuid_like()));
        {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            for chunk in bytes.chunks(CHUNK_SIZE) {
                file.write_all(chunk).await?;
            }
            file.flush().await?;
        }
        tokio::fs::rename(&tmp_path, self.object_path(bucket, key)).await?;

        let meta_json = serde_json::to_vec(&metadata)?;
        tokio::fs::write(self.metadata_path(bucket, key), meta_json).await?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Blob>, StoreError> {
        let object_path = self.object_path(bucket, key);
        let mut file = match tokio::fs::File::open(&object_path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await?;

        let metadata = match tokio::fs::read(self.metadata_path(bucket, key)).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(_) => BlobMetadata::default(),
        };

        Ok(Some(Blob { bytes, metadata }))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let _ = tokio::fs::remove_file(self.object_path(bucket, key)).await;
        let _ = tokio::fs::remove_file(self.metadata_path(bucket, key)).await;
        Ok(())
    }
}

fn uuid_like() -> String {
    // A process-local unique-enough suffix for the temp-file rename dance;
    // no need for a real UUID crate just for this.
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{nanos:x}")
}

// --- MongoDB-backed production implementation --------------------------

#[derive(Debug, Serialize, Deserialize)]
struct BlobChunkDoc {
    #[serde(rename = "_id")]
    id: bson::oid::ObjectId,
    bucket: String,
    key: String,
    chunk_index: i64,
    bytes: Binary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
}

/// The MongoDB-backed [`BlobStore`]. Objects are split into
/// [`CHUNK_SIZE`]-byte chunk documents in a single `blobs` collection,
/// keyed by `(bucket, key, chunk_index)` — deliberately not GridFS, since
/// the contract here is simpler (no streaming range reads required) and
/// this keeps delete-then-insert overwrite semantics (spec §11.5)
/// explicit rather than relying on GridFS revision behavior.
pub struct MongoBlobStore {
    collection: mongodb::Collection<BlobChunkDoc>,
}

impl MongoBlobStore {
    pub fn new(db: Database) -> Self {
        Self {
            collection: db.collection("blobs"),
        }
    }
}

#[async_trait]
impl BlobStore for MongoBlobStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        metadata: BlobMetadata,
    ) -> Result<(), StoreError> {
        // Best-effort delete of any existing object under this key
        // before writing (spec §4.1, §11.5) — a failure here does not
        // block the write.
        let _ = self
            .collection
            .delete_many(doc! { "bucket": bucket, "key": key })
            .await;

        let metadata_json =
            serde_json::to_value(&metadata).map_err(StoreError::from)?;

        let chunks: Vec<BlobChunkDoc> = if bytes.is_empty() {
            vec![BlobChunkDoc {
                id: bson::oid::ObjectId::new(),
                bucket: bucket.to_string(),
                key: key.to_string(),
                chunk_index: 0,
                bytes: Binary {
                    subtype: BinarySubtype::Generic,
                    bytes: Vec::new(),
                },
                metadata: Some(metadata_json),
            }]
        } else {
            bytes
                .chunks(CHUNK_SIZE)
                .enumerate()
                .map(|(i, chunk)| BlobChunkDoc {
                    id: bson::oid::ObjectId::new(),
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    chunk_index: i as i64,
                    bytes: Binary {
                        subtype: BinarySubtype::Generic,
                        bytes: chunk.to_vec(),
                    },
                    metadata: if i == 0 { Some(metadata_json.clone()) } else { None },
                })
                .collect()
        };

        self.collection
            .insert_many(chunks)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Blob>, StoreError> {
        use futures::stream::TryStreamExt;

        let filter = doc! { "bucket": bucket, "key": key };
        let sort = doc! { "chunk_index": 1 };
        let mut cursor = self
            .collection
            .find(filter)
            .sort(sort)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let mut bytes = Vec::new();
        let mut metadata = None;
        let mut found = false;
        while let Some(chunk) = cursor
            .try_next()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?
        {
            found = true;
            bytes.extend_from_slice(&chunk.bytes.bytes);
            if let Some(m) = chunk.metadata {
                metadata = Some(m);
            }
        }

        if !found {
            return Ok(None);
        }

        let metadata: BlobMetadata = match metadata {
            Some(v) => serde_json::from_value(v)?,
            None => BlobMetadata::default(),
        };

        Ok(Some(Blob { bytes, metadata }))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.collection
            .delete_many(doc! { "bucket": bucket, "key": key })
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn put_then_get_round_trips_bytes_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());

        let mut metadata = BTreeMap::new();
        metadata.insert("content_type".to_string(), serde_json::json!("application/pdf"));

        store
            .put("pdf", "doc-A.pdf", b"hello world".to_vec(), metadata.clone())
            .await
            .unwrap();

        let blob = store.get("pdf", "doc-A.pdf").await.unwrap().unwrap();
        assert_eq!(blob.bytes, b"hello world");
        assert_eq!(blob.metadata, metadata);
    }

    #[tokio::test]
    async fn missing_key_returns_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        assert!(store.get("pdf", "missing.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overwrite_replaces_previous_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());

        store
            .put("pdf", "doc-A.pdf", b"version one".to_vec(), BlobMetadata::default())
            .await
            .unwrap();
        store
            .put("pdf", "doc-A.pdf", b"version two".to_vec(), BlobMetadata::default())
            .await
            .unwrap();

        let blob = store.get("pdf", "doc-A.pdf").await.unwrap().unwrap();
        assert_eq!(blob.bytes, b"version two");
    }

    #[tokio::test]
    async fn delete_is_a_no_op_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        store.delete("pdf", "never-existed.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn large_object_round_trips_across_chunk_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        // Smaller than CHUNK_SIZE in the test to keep it fast, but still
        // exercises the chunked-write loop in `put`.
        let bytes = vec![7u8; 3 * 1024 * 1024];
        store
            .put("pdf", "big.pdf", bytes.clone(), BlobMetadata::default())
            .await
            .unwrap();
        let blob = store.get("pdf", "big.pdf").await.unwrap().unwrap();
        assert_eq!(blob.bytes, bytes);
    }
}
