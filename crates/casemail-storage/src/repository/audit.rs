//! Audit event sink

use crate::db::DatabasePool;
use crate::models::AuditEvent;
use async_trait::async_trait;
use casemail_common::types::FirmId;
use casemail_common::{Error, Result};

/// Receives one record per classification decision and thread-wide action
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record a single event
    async fn record(&self, event: &AuditEvent) -> Result<()>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Audit sink writing to the `audit_events` table
pub struct DbAuditRepository {
    pool: DatabasePool,
}

impl DbAuditRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Most recent events for a firm
    pub async fn list_for_firm(&self, firm_id: FirmId, limit: i64) -> Result<Vec<AuditEvent>> {
        sqlx::query_as::<_, AuditEvent>(
            r#"
            SELECT * FROM audit_events
            WHERE firm_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(firm_id)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}

#[async_trait]
impl AuditSink for DbAuditRepository {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (
                id, firm_id, event_type, actor, message_id, conversation_id,
                case_id, client_id, details, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id)
        .bind(event.firm_id)
        .bind(&event.event_type)
        .bind(&event.actor)
        .bind(event.message_id)
        .bind(&event.conversation_id)
        .bind(event.case_id)
        .bind(event.client_id)
        .bind(&event.details)
        .bind(event.created_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "database"
    }
}
