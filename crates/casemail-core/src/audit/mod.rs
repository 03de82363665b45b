//! Audit event dispatch
//!
//! Classification decisions and thread-wide assignments are reported to a
//! set of sinks. Delivery is fire-and-forget: each sink runs on its own
//! task and failures are only logged.

mod webhook;

pub use webhook::{sign_payload, WebhookAuditSink, SIGNATURE_HEADER};

use casemail_common::config::AuditConfig;
use casemail_common::Result;
use casemail_storage::db::DatabasePool;
use casemail_storage::models::AuditEvent;
use casemail_storage::repository::{AuditSink, DbAuditRepository};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Fans audit events out to every configured sink
#[derive(Clone, Default)]
pub struct AuditDispatcher {
    sinks: Arc<Vec<Arc<dyn AuditSink>>>,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl AuditDispatcher {
    /// Create a dispatcher over explicit sinks
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self {
            sinks: Arc::new(sinks),
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A dispatcher that drops every event
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build the sinks named by the `[audit]` section
    pub fn from_config(config: &AuditConfig, pool: Option<DatabasePool>) -> Result<Self> {
        let mut sinks: Vec<Arc<dyn AuditSink>> = Vec::new();

        if config.persist {
            match pool {
                Some(pool) => sinks.push(Arc::new(DbAuditRepository::new(pool))),
                None => warn!("Audit persistence enabled but no database pool available"),
            }
        }

        if let Some(url) = &config.webhook_url {
            sinks.push(Arc::new(WebhookAuditSink::new(
                url.clone(),
                config.webhook_secret.clone(),
                config.timeout_ms,
            )?));
        }

        debug!(sinks = sinks.len(), "Audit dispatcher configured");
        Ok(Self::new(sinks))
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Hand an event to every sink without waiting for delivery
    pub async fn dispatch(&self, event: AuditEvent) {
        if self.sinks.is_empty() {
            return;
        }

        let event = Arc::new(event);
        let mut pending = self.pending.lock().await;
        pending.retain(|handle| !handle.is_finished());

        for sink in self.sinks.iter() {
            let sink = sink.clone();
            let event = event.clone();
            pending.push(tokio::spawn(async move {
                if let Err(e) = sink.record(&event).await {
                    warn!(
                        sink = sink.name(),
                        event_type = %event.event_type,
                        event_id = %event.id,
                        "Failed to record audit event: {}",
                        e
                    );
                }
            }));
        }
    }

    /// Wait for every in-flight delivery
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pending.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Audit delivery task failed: {}", e);
            }
        }
    }
}
