//! File-backed document store.
//!
//! Each document is a pretty-printed JSON file at `{root}/{collection}/{id}.json`,
//! so an operator can pause the agent or change its search by editing a file.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{Document, DocumentStore, StoreError};

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of a document, with both path segments sanitised.
    fn document_path(&self, collection: &str, id: &str) -> PathBuf {
        self.root
            .join(sanitize_segment(collection))
            .join(format!("{}.json", sanitize_segment(id)))
    }
}

/// Replace anything that could leave the collection directory.
fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_") + "_"
    } else {
        cleaned
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let path = self.document_path(collection, id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let value: serde_json::Value =
            serde_json::from_str(&contents).map_err(|e| StoreError::InvalidDocument {
                collection: collection.to_string(),
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        match value {
            serde_json::Value::Object(document) => Ok(Some(document)),
            other => Err(StoreError::InvalidDocument {
                collection: collection.to_string(),
                id: id.to_string(),
                reason: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
        }
    }

    async fn set(&self, collection: &str, id: &str, document: Document) -> Result<(), StoreError> {
        let path = self.document_path(collection, id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_string_pretty(&document).map_err(|e| {
            StoreError::InvalidDocument {
                collection: collection.to_string(),
                id: id.to_string(),
                reason: e.to_string(),
            }
        })?;

        // Readers never observe a partially written document.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!("Saved document to {}", path.display());
        Ok(())
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
