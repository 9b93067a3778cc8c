//! Email notifications to the owner.
//!
//! Delivery is best-effort: callers log a failed send and move on, a failed
//! message is not queued for retry.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::config::MailConfig;
use crate::http::HttpPolicy;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Mail request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Mail provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, message: &str) -> Result<(), NotifyError>;
}

/// Sends plain-text mail through the SendGrid v3 API.
pub struct SendGridNotifier {
    client: reqwest::Client,
    policy: HttpPolicy,
    url: String,
    api_key: String,
    from: String,
    subject: String,
}

impl SendGridNotifier {
    pub fn new(
        config: &MailConfig,
        api_key: String,
        policy: HttpPolicy,
    ) -> Result<Self, NotifyError> {
        Ok(Self {
            client: policy.client()?,
            policy,
            url: format!("{}/v3/mail/send", config.base_url.trim_end_matches('/')),
            api_key,
            from: config.from.clone(),
            subject: config.subject.clone(),
        })
    }
}

#[async_trait]
impl Notifier for SendGridNotifier {
    async fn notify(&self, recipient: &str, message: &str) -> Result<(), NotifyError> {
        let body = json!({
            "personalizations": [{ "to": [{ "email": recipient }] }],
            "from": { "email": self.from },
            "subject": self.subject,
            "content": [{ "type": "text/plain", "value": message }]
        });

        let response = self
            .policy
            .send_with_retry(|| {
                self.client
                    .post(&self.url)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        tracing::info!("Email sent to {}", recipient);
        Ok(())
    }
}

/// Logs messages instead of sending them. Used when no mail key is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: &str, message: &str) -> Result<(), NotifyError> {
        tracing::info!(recipient, "Mail delivery disabled, message: {}", message);
        Ok(())
    }
}

/// Build the notifier selected by configuration.
pub fn from_config(
    config: &MailConfig,
    policy: &HttpPolicy,
) -> Result<Box<dyn Notifier>, NotifyError> {
    match &config.api_key {
        Some(key) => Ok(Box::new(SendGridNotifier::new(
            config,
            key.clone(),
            policy.clone(),
        )?)),
        None => {
            tracing::warn!("SENDGRID_API_KEY not set, notifications will only be logged");
            Ok(Box::new(LogNotifier))
        }
    }
}
