//! Configuration management for WorkMate.
//!
//! Configuration is read once at startup from environment variables:
//! - `AGENT_OWNER` - Required. The owner whose search this process runs.
//! - `FREELANCER_TOKEN` - Required. OAuth token for the marketplace API.
//! - `FREELANCER_API_URL` - Optional. Defaults to `https://www.freelancer.com/api`.
//! - `SENDGRID_API_KEY` - Optional. Without it notifications are only logged.
//! - `MAIL_FROM` / `MAIL_SUBJECT` / `SENDGRID_API_URL` - Optional mail settings.
//! - `SEARCH_MODE` - Optional. `direct` or `agent`. Defaults to `agent` when
//!   `OPENAI_API_KEY` is set, otherwise `direct`.
//! - `OPENAI_API_KEY` - Required in agent mode.
//! - `OPENAI_MODEL` / `OPENAI_API_URL` / `MAX_AGENT_ITERATIONS` - Optional agent settings.
//! - `STORE_BACKEND` - Optional. `file` (default) or `firestore`.
//! - `STORE_PATH` - Optional. Root directory of the file store. Defaults to `./.workmate`.
//! - `FIRESTORE_PROJECT_ID` / `FIRESTORE_ACCESS_TOKEN` - Required for the firestore backend.
//! - `FIRESTORE_API_URL` - Optional.
//! - `INTERVAL_UNIT` - Optional. `minutes` (default) or `seconds`.
//! - `FAILURE_POLICY` - Optional. `fatal` (default) or `backoff`.
//! - `HTTP_TIMEOUT_SECS` - Optional. Defaults to `30`.
//! - `HTTP_RETRIES` - Optional. Defaults to `1`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::backoff::BackoffConfig;
use crate::http::HttpPolicy;
use crate::poller::FailurePolicy;
use crate::search_params::IntervalUnit;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingEnvVars(Vec<String>),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// How a tick turns a search term into outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Call the marketplace once per tick.
    Direct,
    /// Let an LLM drive the marketplace tool and report back.
    Agent,
}

/// Marketplace API settings.
#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    pub base_url: String,
    pub token: String,
}

/// Mail provider settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// SendGrid API key (None = log-only notifications)
    pub api_key: Option<String>,
    pub base_url: String,
    pub from: String,
    pub subject: String,
}

impl MailConfig {
    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

/// LLM settings, only present in agent mode.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_iterations: usize,
}

/// Document store backend.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    File {
        root: PathBuf,
    },
    Firestore {
        base_url: String,
        project_id: String,
        access_token: String,
    },
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Owner identifier, fixed for the lifetime of the process
    pub owner: String,

    pub marketplace: MarketplaceConfig,

    pub mail: MailConfig,

    pub search_mode: SearchMode,

    /// LLM configuration (agent mode only)
    pub llm: Option<LlmConfig>,

    pub store: StoreConfig,

    /// Unit of the stored `interval` field
    pub interval_unit: IntervalUnit,

    /// What happens when a tick fails
    pub failure_policy: FailurePolicy,

    /// Timeout and retry policy for all outbound HTTP
    pub http: HttpPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `AGENT_OWNER` or `FREELANCER_TOKEN`
    /// is unset or empty, or `ConfigError::MissingEnvVars` naming every required
    /// variable when more than one is missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut missing: Vec<String> = Vec::new();
        let mut required = |name: &str| {
            var(name).unwrap_or_else(|| {
                missing.push(name.to_string());
                String::new()
            })
        };

        let owner = required("AGENT_OWNER").trim().to_string();

        let marketplace = MarketplaceConfig {
            base_url: var("FREELANCER_API_URL")
                .unwrap_or_else(|| "https://www.freelancer.com/api".to_string()),
            token: required("FREELANCER_TOKEN"),
        };

        let mail = MailConfig {
            api_key: var("SENDGRID_API_KEY"),
            base_url: var("SENDGRID_API_URL")
                .unwrap_or_else(|| "https://api.sendgrid.com".to_string()),
            from: var("MAIL_FROM").unwrap_or_else(|| "alerts@workmate.local".to_string()),
            subject: var("MAIL_SUBJECT").unwrap_or_else(|| "WorkMate Job Alert".to_string()),
        };

        let search_mode = match var("SEARCH_MODE") {
            None if var("OPENAI_API_KEY").is_some() => SearchMode::Agent,
            None => SearchMode::Direct,
            Some(v) => match v.trim().to_lowercase().as_str() {
                "direct" => SearchMode::Direct,
                "agent" => SearchMode::Agent,
                other => {
                    return Err(ConfigError::InvalidValue(
                        "SEARCH_MODE".to_string(),
                        format!("expected direct or agent, got: {}", other),
                    ))
                }
            },
        };

        let llm = match search_mode {
            SearchMode::Direct => None,
            SearchMode::Agent => Some(LlmConfig {
                api_key: required("OPENAI_API_KEY"),
                base_url: var("OPENAI_API_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                model: var("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
                max_iterations: parse_number(&var, "MAX_AGENT_ITERATIONS", 8)?,
            }),
        };

        let store = match var("STORE_BACKEND").map(|v| v.trim().to_lowercase()) {
            None => StoreConfig::File {
                root: var("STORE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./.workmate")),
            },
            Some(v) if v == "file" => StoreConfig::File {
                root: var("STORE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./.workmate")),
            },
            Some(v) if v == "firestore" => StoreConfig::Firestore {
                base_url: var("FIRESTORE_API_URL")
                    .unwrap_or_else(|| "https://firestore.googleapis.com/v1".to_string()),
                project_id: required("FIRESTORE_PROJECT_ID"),
                access_token: required("FIRESTORE_ACCESS_TOKEN"),
            },
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "STORE_BACKEND".to_string(),
                    format!("expected file or firestore, got: {}", other),
                ))
            }
        };

        match missing.len() {
            0 => {}
            1 => return Err(ConfigError::MissingEnvVar(missing.remove(0))),
            _ => return Err(ConfigError::MissingEnvVars(missing)),
        }

        let interval_unit = var("INTERVAL_UNIT")
            .map(|v| {
                v.parse::<IntervalUnit>()
                    .map_err(|e| ConfigError::InvalidValue("INTERVAL_UNIT".to_string(), e))
            })
            .transpose()?
            .unwrap_or(IntervalUnit::Minutes);

        let failure_policy = match var("FAILURE_POLICY").map(|v| v.trim().to_lowercase()) {
            None => FailurePolicy::Fatal,
            Some(v) if v == "fatal" => FailurePolicy::Fatal,
            Some(v) if v == "backoff" => FailurePolicy::Backoff(BackoffConfig::default()),
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "FAILURE_POLICY".to_string(),
                    format!("expected fatal or backoff, got: {}", other),
                ))
            }
        };

        let http = HttpPolicy {
            timeout: Duration::from_secs(parse_number(&var, "HTTP_TIMEOUT_SECS", 30)?),
            retries: parse_number(&var, "HTTP_RETRIES", 1)?,
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(10),
                multiplier: 2.0,
            },
        };

        Ok(Self {
            owner,
            marketplace,
            mail,
            search_mode,
            llm,
            store,
            interval_unit,
            failure_policy,
            http,
        })
    }
}

fn parse_number<F, T>(var: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e)))
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}

/// Parse a boolean-like string the way operators tend to write them.
pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_owner_is_config_error() {
        let err = Config::from_lookup(lookup(&[("FREELANCER_TOKEN", "t")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "AGENT_OWNER"));
    }

    #[test]
    fn blank_owner_is_config_error() {
        let err = Config::from_lookup(lookup(&[("AGENT_OWNER", "  "), ("FREELANCER_TOKEN", "t")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "AGENT_OWNER"));
    }

    #[test]
    fn defaults_are_direct_file_minutes_fatal() {
        let config =
            Config::from_lookup(lookup(&[("AGENT_OWNER", "u1"), ("FREELANCER_TOKEN", "t")]))
                .expect("config");
        assert_eq!(config.owner, "u1");
        assert_eq!(config.search_mode, SearchMode::Direct);
        assert!(config.llm.is_none());
        assert!(!config.mail.is_enabled());
        assert_eq!(config.interval_unit, IntervalUnit::Minutes);
        assert!(matches!(config.failure_policy, FailurePolicy::Fatal));
        assert!(matches!(config.store, StoreConfig::File { .. }));
        assert_eq!(config.http.timeout, Duration::from_secs(30));
        assert_eq!(config.http.retries, 1);
    }

    #[test]
    fn every_missing_variable_is_reported() {
        let err = Config::from_lookup(lookup(&[
            ("STORE_BACKEND", "firestore"),
            ("FIRESTORE_PROJECT_ID", "proj"),
        ]))
        .unwrap_err();
        match err {
            ConfigError::MissingEnvVars(names) => assert_eq!(
                names,
                vec!["AGENT_OWNER", "FREELANCER_TOKEN", "FIRESTORE_ACCESS_TOKEN"]
            ),
            other => panic!("expected MissingEnvVars, got {:?}", other),
        }
    }

    #[test]
    fn default_mode_is_agent_when_llm_key_present() {
        let config = Config::from_lookup(lookup(&[
            ("AGENT_OWNER", "u1"),
            ("FREELANCER_TOKEN", "t"),
            ("OPENAI_API_KEY", "sk"),
        ]))
        .expect("config");
        assert_eq!(config.search_mode, SearchMode::Agent);
        assert_eq!(config.llm.map(|l| l.api_key).as_deref(), Some("sk"));

        let config = Config::from_lookup(lookup(&[
            ("AGENT_OWNER", "u1"),
            ("FREELANCER_TOKEN", "t"),
            ("OPENAI_API_KEY", "sk"),
            ("SEARCH_MODE", "direct"),
        ]))
        .expect("config");
        assert_eq!(config.search_mode, SearchMode::Direct);
        assert!(config.llm.is_none());
    }

    #[test]
    fn agent_mode_requires_llm_key() {
        let err = Config::from_lookup(lookup(&[
            ("AGENT_OWNER", "u1"),
            ("FREELANCER_TOKEN", "t"),
            ("SEARCH_MODE", "agent"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "OPENAI_API_KEY"));
    }

    #[test]
    fn firestore_backend_and_backoff_policy() {
        let config = Config::from_lookup(lookup(&[
            ("AGENT_OWNER", "u1"),
            ("FREELANCER_TOKEN", "t"),
            ("STORE_BACKEND", "Firestore"),
            ("FIRESTORE_PROJECT_ID", "proj"),
            ("FIRESTORE_ACCESS_TOKEN", "tok"),
            ("FAILURE_POLICY", "backoff"),
            ("INTERVAL_UNIT", "seconds"),
        ]))
        .expect("config");
        assert!(matches!(config.store, StoreConfig::Firestore { ref project_id, .. } if project_id == "proj"));
        assert!(matches!(config.failure_policy, FailurePolicy::Backoff(_)));
        assert_eq!(config.interval_unit, IntervalUnit::Seconds);
    }

    #[test]
    fn invalid_timeout_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("AGENT_OWNER", "u1"),
            ("FREELANCER_TOKEN", "t"),
            ("HTTP_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref v, _) if v == "HTTP_TIMEOUT_SECS"));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("Yes"), Ok(true));
        assert_eq!(parse_bool(" off "), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }
}
