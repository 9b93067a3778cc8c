//! Job records and their persistence sink.

use serde_json::Value;
use thiserror::Error;

use crate::marketplace::SearchError;
use crate::store::{Document, DocumentStore, StoreError, JOBS_COLLECTION};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Failed to persist job {id}: {source}")]
    Store {
        id: String,
        #[source]
        source: StoreError,
    },
}

/// A marketplace project as it will be stored.
///
/// `fields` carries every marketplace-provided field untouched. `id` is the
/// document id derived from the `id` field, if it has a usable one.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: Option<String>,
    pub fields: Document,
}

impl JobRecord {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self {
                id: fields.get("id").and_then(id_string),
                fields,
            },
            other => {
                tracing::warn!("Ignoring non-object project entry: {}", other);
                Self {
                    id: None,
                    fields: Document::new(),
                }
            }
        }
    }

    /// The stored form: all fields plus the owner stamp.
    pub fn to_document(&self, owner: &str) -> Document {
        let mut document = self.fields.clone();
        document.insert("owner".to_string(), Value::String(owner.to_string()));
        document
    }
}

fn id_string(value: &Value) -> Option<String> {
    let id = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

/// Pull `result.projects` out of a marketplace search response.
pub fn extract_projects(payload: &Value) -> Result<Vec<JobRecord>, SearchError> {
    let projects = payload
        .get("result")
        .and_then(|r| r.get("projects"))
        .ok_or_else(|| SearchError::Malformed("missing result.projects".to_string()))?;

    match projects {
        Value::Array(items) => Ok(items.iter().cloned().map(JobRecord::from_value).collect()),
        other => Err(SearchError::Malformed(format!(
            "result.projects is not an array: {}",
            other
        ))),
    }
}

/// Outcome of persisting one batch of jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistSummary {
    /// Ids written, in batch order
    pub persisted: Vec<String>,
    /// Records without a usable id
    pub skipped: usize,
    /// Ids whose write failed
    pub failed: Vec<String>,
}

/// Upserts job records into the `jobs` collection.
pub struct JobSink<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> JobSink<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    /// Write one record, fully replacing any existing record with the same id.
    ///
    /// Records without an id are skipped and return `Ok(false)`.
    pub async fn upsert(&self, job: &JobRecord, owner: &str) -> Result<bool, PersistError> {
        let Some(id) = job.id.as_deref() else {
            return Ok(false);
        };
        self.store
            .set(JOBS_COLLECTION, id, job.to_document(owner))
            .await
            .map_err(|source| PersistError::Store {
                id: id.to_string(),
                source,
            })?;
        Ok(true)
    }

    /// Write a batch. A failed write is logged and the rest of the batch continues.
    pub async fn persist(&self, jobs: &[JobRecord], owner: &str) -> PersistSummary {
        let mut summary = PersistSummary::default();
        for job in jobs {
            match self.upsert(job, owner).await {
                Ok(true) => {
                    let id = job.id.clone().unwrap_or_default();
                    tracing::info!("Persisted job {}", id);
                    summary.persisted.push(id);
                }
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!("{}", e);
                    summary.failed.push(job.id.clone().unwrap_or_default());
                }
            }
        }
        if summary.skipped > 0 {
            tracing::debug!("Skipped {} jobs without an id", summary.skipped);
        }
        summary
    }
}
