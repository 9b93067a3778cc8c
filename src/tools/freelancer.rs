//! Marketplace search tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::Tool;
use crate::marketplace::FreelancerClient;

pub const QUERY_FREELANCER: &str = "queryFreelancer";

/// Search the marketplace for projects matching a query.
pub struct QueryFreelancer {
    client: Arc<FreelancerClient>,
}

impl QueryFreelancer {
    pub fn new(client: Arc<FreelancerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for QueryFreelancer {
    fn name(&self) -> &str {
        QUERY_FREELANCER
    }

    fn description(&self) -> &str {
        "Search freelancer.com for active fixed-price projects matching a job description. Returns the marketplace response with result.projects."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The query term to fetch projects for",
                    "minLength": 1
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'query' argument"))?;
        Ok(self.client.search_projects(query).await?)
    }
}
