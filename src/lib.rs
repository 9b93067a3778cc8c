//! # WorkMate
//!
//! An autonomous job scout for freelance marketplaces.
//!
//! This library provides:
//! - A polling loop that re-reads the owner's search settings every tick
//! - Direct and LLM-driven marketplace search
//! - Job persistence into a document store (files or Firestore)
//! - Email notifications through SendGrid
//!
//! ## Architecture
//!
//! Each tick of the loop:
//! 1. Loads `profile/{owner}` and `search/{owner}` from the store
//! 2. Skips the search when the owner has paused the agent
//! 3. Searches the marketplace for the configured term
//! 4. Emails narrative results and upserts structured results into `jobs/`
//! 5. Sleeps for the configured interval
//!
//! ## Example
//!
//! ```rust,ignore
//! use workmate::{config::Config, poller::PollingLoop};
//!
//! let config = Config::from_env()?;
//! let mut poller = workmate::build_polling_loop(&config)?;
//! poller.run(tokio_util::sync::CancellationToken::new()).await?;
//! ```

pub mod agent;
pub mod backoff;
pub mod config;
pub mod http;
pub mod jobs;
pub mod llm;
pub mod marketplace;
pub mod notify;
pub mod poller;
pub mod search_params;
pub mod store;
pub mod tools;

pub use config::Config;

use std::sync::Arc;

use agent::{Agent, DirectSearch, JobSearch};
use config::SearchMode;
use llm::OpenAiClient;
use marketplace::FreelancerClient;
use poller::PollingLoop;
use tools::{QueryFreelancer, ToolRegistry};

/// Wire the store, search strategy and notifier described by `config`.
pub fn build_polling_loop(config: &Config) -> anyhow::Result<PollingLoop> {
    let store = store::from_config(&config.store, &config.http)?;
    if !store.is_persistent() {
        tracing::warn!("Document store is not persistent; jobs are lost on exit");
    }

    let marketplace = Arc::new(FreelancerClient::new(&config.marketplace, config.http.clone())?);
    let search: Arc<dyn JobSearch> = match (config.search_mode, &config.llm) {
        (SearchMode::Agent, Some(llm_config)) => {
            let llm = OpenAiClient::new(
                &llm_config.base_url,
                llm_config.api_key.clone(),
                config.http.clone(),
            )?;
            let mut tools = ToolRegistry::new();
            tools.register(Arc::new(QueryFreelancer::new(marketplace)));
            Arc::new(Agent::new(
                Arc::new(llm),
                tools,
                llm_config.model.clone(),
                llm_config.max_iterations,
            ))
        }
        (SearchMode::Agent, None) => {
            anyhow::bail!("Agent search mode requires LLM configuration")
        }
        (SearchMode::Direct, _) => {
            if config.mail.is_enabled() {
                tracing::warn!("Direct search mode produces no narrative, so no email is sent");
            }
            Arc::new(DirectSearch::new(marketplace))
        }
    };

    let notifier: Arc<dyn notify::Notifier> =
        Arc::from(notify::from_config(&config.mail, &config.http)?);

    Ok(PollingLoop::new(
        config.owner.clone(),
        store,
        search,
        notifier,
        config.interval_unit,
        config.failure_policy.clone(),
    ))
}
