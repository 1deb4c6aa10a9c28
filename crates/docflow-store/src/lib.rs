//! The Blob Store and Document State Store (spec §4.1, §4.3): the two
//! leaf components every pipeline handler reads and writes through.
//!
//! Both are traits with a file-/memory-backed reference implementation
//! (good for tests without a live database) and a MongoDB-backed
//! production adapter.

pub mod blob;
pub mod document;

pub use blob::{BlobStore, FileBlobStore, MongoBlobStore};
pub use document::{DocumentStore, InMemoryDocumentStore, MongoDocumentStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
