//! Per-tick search parameters for the owner.
//!
//! The owner's profile and search documents are re-read on every tick so an
//! operator can change the search term, interval or paused flag without
//! restarting the process. Nothing here is cached.

use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;

use crate::config::{parse_bool, ConfigError};
use crate::poller::LoopError;
use crate::store::{Document, DocumentStore, PROFILE_COLLECTION, SEARCH_COLLECTION};

/// Unit of the stored `interval` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Seconds,
    Minutes,
}

impl IntervalUnit {
    pub fn to_duration(self, interval: u64) -> Duration {
        match self {
            Self::Seconds => Duration::from_secs(interval),
            Self::Minutes => Duration::from_secs(interval.saturating_mul(60)),
        }
    }
}

impl FromStr for IntervalUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => Ok(Self::Seconds),
            "m" | "min" | "mins" | "minute" | "minutes" => Ok(Self::Minutes),
            other => Err(format!("expected seconds or minutes, got: {}", other)),
        }
    }
}

/// Search parameters resolved for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    /// Notification recipient (None = notifications suppressed)
    pub email: Option<String>,
    /// Free-text marketplace query
    pub term: String,
    /// Stored interval in the configured unit (None = no delay)
    pub interval: Option<u64>,
    /// Skip searching this tick
    pub paused: bool,
}

impl SearchParams {
    /// Sleep after this tick.
    pub fn sleep_duration(&self, unit: IntervalUnit) -> Duration {
        unit.to_duration(self.interval.unwrap_or(0))
    }
}

/// Load the owner's search parameters with two fresh reads.
///
/// # Errors
///
/// `ConfigError` when `owner` is empty; store errors are passed through.
/// Missing documents or fields are not errors.
pub async fn load_search_params(
    store: &dyn DocumentStore,
    owner: &str,
) -> Result<SearchParams, LoopError> {
    if owner.trim().is_empty() {
        return Err(ConfigError::MissingEnvVar("AGENT_OWNER".to_string()).into());
    }

    let profile = store.get(PROFILE_COLLECTION, owner).await?;
    let search = store.get(SEARCH_COLLECTION, owner).await?;

    if profile.is_none() {
        tracing::warn!("No profile document for owner {}, notifications suppressed", owner);
    }
    if search.is_none() {
        tracing::warn!("No search document for owner {}", owner);
    }

    let params = SearchParams {
        email: profile.as_ref().and_then(email_field),
        term: search.as_ref().map(terms_field).unwrap_or_default(),
        interval: search.as_ref().and_then(interval_field),
        paused: search.as_ref().map(paused_field).unwrap_or(false),
    };
    tracing::debug!(?params, "Loaded search parameters for {}", owner);
    Ok(params)
}

fn email_field(profile: &Document) -> Option<String> {
    profile
        .get("email")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
}

fn terms_field(search: &Document) -> String {
    match search.get("terms") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    }
}

fn interval_field(search: &Document) -> Option<u64> {
    match search.get("interval")? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|i| i.max(0) as u64))
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => Some(f.max(0.0) as u64),
            _ => {
                tracing::warn!("Ignoring non-numeric search interval {:?}", s);
                None
            }
        },
        _ => None,
    }
}

fn paused_field(search: &Document) -> bool {
    match search.get("paused") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => parse_bool(s).unwrap_or_else(|e| {
            tracing::warn!("Ignoring paused flag: {}", e);
            false
        }),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}
