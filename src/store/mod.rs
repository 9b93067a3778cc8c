//! Document store access.
//!
//! The agent reads its owner's settings from, and writes discovered jobs to,
//! a schema-on-read document store. Three collections are used:
//! - `profile/{owner}` holds `{email}`
//! - `search/{owner}` holds `{terms, interval, paused}`
//! - `jobs/{job_id}` holds job records stamped with their owner

mod file;
mod firestore;
mod memory;

pub use file::FileStore;
pub use firestore::FirestoreStore;
pub use memory::InMemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::StoreConfig;
use crate::http::HttpPolicy;

pub const PROFILE_COLLECTION: &str = "profile";
pub const SEARCH_COLLECTION: &str = "search";
pub const JOBS_COLLECTION: &str = "jobs";

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid document {collection}/{id}: {reason}")]
    InvalidDocument {
        collection: String,
        id: String,
        reason: String,
    },

    #[error("Store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Key-value access to document collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Whether documents survive a process restart.
    fn is_persistent(&self) -> bool;

    /// Read a document. A missing document is `Ok(None)`.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Write a document, fully replacing any existing one with the same id.
    async fn set(&self, collection: &str, id: &str, document: Document) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn DocumentStore>;

/// Build the store selected by configuration.
pub fn from_config(config: &StoreConfig, http: &HttpPolicy) -> Result<SharedStore, StoreError> {
    let store: SharedStore = match config {
        StoreConfig::File { root } => Arc::new(FileStore::new(root.clone())),
        StoreConfig::Firestore {
            base_url,
            project_id,
            access_token,
        } => Arc::new(FirestoreStore::new(
            base_url.clone(),
            project_id.clone(),
            access_token.clone(),
            http.clone(),
        )?),
    };
    Ok(store)
}
