//! Signed webhook audit sink

use async_trait::async_trait;
use casemail_common::{Error, Result};
use casemail_storage::models::AuditEvent;
use casemail_storage::repository::AuditSink;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex>` over the request body
pub const SIGNATURE_HEADER: &str = "X-Casemail-Signature";

/// Compute the `sha256=<hex>` signature for a payload
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("Invalid HMAC key: {}", e)))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// POSTs each audit event as JSON to an external endpoint
pub struct WebhookAuditSink {
    client: Client,
    url: String,
    secret: Option<String>,
}

impl WebhookAuditSink {
    pub fn new(url: String, secret: Option<String>, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, url, secret })
    }
}

#[async_trait]
impl AuditSink for WebhookAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        let body = serde_json::to_vec(event)
            .map_err(|e| Error::Internal(format!("Failed to encode audit event: {}", e)))?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");

        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(secret, &body)?);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("Audit webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Internal(format!(
                "Audit webhook returned status {}",
                response.status()
            )));
        }

        debug!(event_id = %event.id, "Audit event delivered to webhook");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
