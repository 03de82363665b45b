//! Mail provider client

use async_trait::async_trait;
use casemail_common::config::ProviderConfig;
use casemail_common::types::UserId;
use casemail_common::{Error, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest pause between two provider attempts
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// One message as reported by the provider's delta endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub internet_message_id: Option<String>,
    /// Raw `In-Reply-To` header
    #[serde(default)]
    pub in_reply_to: Option<String>,
    /// Raw `References` header
    #[serde(default)]
    pub references: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body_preview: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub importance: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    /// Deleted or moved out of the mailbox since the last delta
    #[serde(default)]
    pub removed: bool,
}

/// A page of changes plus the cursor to resume from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaPage {
    #[serde(default)]
    pub messages: Vec<ProviderMessage>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Source of mailbox changes
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Fetch changes since `cursor` (everything when `None`)
    async fn fetch_delta(&self, user_id: UserId, cursor: Option<&str>) -> Result<DeltaPage>;
}

/// Backoff before retry `attempt` (0-based)
pub fn calculate_backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2_u64.saturating_pow(attempt);
    std::cmp::min(Duration::from_millis(base_ms.saturating_mul(factor)), MAX_BACKOFF)
}

enum FetchError {
    /// Worth retrying: throttling, server errors, connection problems
    Transient(String),
    Fatal(String),
}

/// HTTP delta API client
pub struct HttpMailProvider {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    page_size: u32,
    max_retries: u32,
    retry_base_ms: u64,
}

impl HttpMailProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| Error::Config("provider.base_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_token: config.api_token.clone(),
            page_size: config.page_size,
            max_retries: config.max_retries,
            retry_base_ms: config.retry_base_ms,
        })
    }

    async fn try_fetch(&self, user_id: UserId, cursor: Option<&str>) -> std::result::Result<DeltaPage, FetchError> {
        let url = format!("{}/delta", self.base_url);
        let mut query = vec![
            ("user_id", user_id.to_string()),
            ("limit", self.page_size.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let mut request = self.client.get(&url).query(&query);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                FetchError::Transient(format!("Delta request failed: {}", e))
            } else {
                FetchError::Fatal(format!("Delta request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(FetchError::Transient(format!("Provider returned {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Fatal(format!("Provider returned {}: {}", status, body)));
        }

        response
            .json::<DeltaPage>()
            .await
            .map_err(|e| FetchError::Fatal(format!("Invalid delta page: {}", e)))
    }
}

#[async_trait]
impl MailProvider for HttpMailProvider {
    async fn fetch_delta(&self, user_id: UserId, cursor: Option<&str>) -> Result<DeltaPage> {
        let mut attempt = 0;
        loop {
            match self.try_fetch(user_id, cursor).await {
                Ok(page) => {
                    debug!(
                        user_id = %user_id,
                        messages = page.messages.len(),
                        "Fetched delta page"
                    );
                    return Ok(page);
                }
                Err(FetchError::Transient(reason)) if attempt < self.max_retries => {
                    let delay = calculate_backoff(self.retry_base_ms, attempt);
                    warn!(
                        user_id = %user_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Transient provider error, retrying: {}",
                        reason
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(FetchError::Transient(reason)) => {
                    return Err(Error::Provider(format!(
                        "{} (gave up after {} retries)",
                        reason, attempt
                    )));
                }
                Err(FetchError::Fatal(reason)) => return Err(Error::Provider(reason)),
            }
        }
    }
}
