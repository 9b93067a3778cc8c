//! Freelancer marketplace client.
//!
//! Searches active fixed-price projects in the 250-500 average price band,
//! 30 results at a time, with full descriptions.

use serde_json::Value;
use thiserror::Error;

use crate::config::MarketplaceConfig;
use crate::http::HttpPolicy;

const PROJECTS_PATH: &str = "/projects/0.1/projects/active/";
const RESULT_LIMIT: u32 = 30;
const MIN_AVG_PRICE: u32 = 250;
const MAX_AVG_PRICE: u32 = 500;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search query is empty")]
    EmptyQuery,

    #[error("Marketplace request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Marketplace returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed marketplace response: {0}")]
    Malformed(String),

    #[error("Search orchestration failed: {0}")]
    Orchestration(String),
}

pub struct FreelancerClient {
    client: reqwest::Client,
    policy: HttpPolicy,
    base_url: String,
    token: String,
}

impl FreelancerClient {
    pub fn new(config: &MarketplaceConfig, policy: HttpPolicy) -> Result<Self, SearchError> {
        Ok(Self {
            client: policy.client()?,
            policy,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    /// Query active projects matching `query` and return the raw response body.
    pub async fn search_projects(&self, query: &str) -> Result<Value, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        let url = format!("{}{}", self.base_url, PROJECTS_PATH);
        let params = search_params(query);
        tracing::debug!("Searching marketplace for {:?}", query);

        let response = self
            .policy
            .send_with_retry(|| {
                self.client
                    .get(&url)
                    .header("freelancer-oauth-v1", &self.token)
                    .query(&params)
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| SearchError::Malformed(e.to_string()))
    }
}

fn search_params(query: &str) -> Vec<(&'static str, String)> {
    vec![
        ("compact", String::new()),
        ("limit", RESULT_LIMIT.to_string()),
        ("full_description", "true".to_string()),
        ("project_types[]", "fixed".to_string()),
        ("max_avg_price", MAX_AVG_PRICE.to_string()),
        ("min_avg_price", MIN_AVG_PRICE.to_string()),
        ("query", query.to_string()),
    ]
}
