use async_trait::async_trait;

use crate::jobs::JobRecord;
use crate::marketplace::SearchError;

/// One result produced while searching.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// Human-readable text meant for the owner's inbox.
    Narrative { text: String },
    /// Marketplace projects meant for the jobs collection.
    Structured { projects: Vec<JobRecord> },
}

#[async_trait]
pub trait JobSearch: Send + Sync {
    /// Search for `term`, returning outcomes in the order they were produced.
    async fn search(&self, term: &str) -> Result<Vec<SearchOutcome>, SearchError>;
}
