use std::sync::Arc;

use async_trait::async_trait;

use super::{JobSearch, SearchOutcome};
use crate::jobs::extract_projects;
use crate::marketplace::{FreelancerClient, SearchError};

/// Queries the marketplace directly, once per search.
pub struct DirectSearch {
    client: Arc<FreelancerClient>,
}

impl DirectSearch {
    pub fn new(client: Arc<FreelancerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobSearch for DirectSearch {
    async fn search(&self, term: &str) -> Result<Vec<SearchOutcome>, SearchError> {
        let payload = self.client.search_projects(term).await?;
        let projects = extract_projects(&payload)?;
        tracing::info!("Marketplace returned {} projects", projects.len());
        Ok(vec![SearchOutcome::Structured { projects }])
    }
}
