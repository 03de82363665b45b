//! Case/client directory repository
//!
//! The directory tables belong to the case management module; this
//! subsystem only reads them to build scoring candidates.

use crate::db::DatabasePool;
use crate::models::{CaseEntry, ClientEntry};
use async_trait::async_trait;
use casemail_common::types::{CaseId, FirmId};
use casemail_common::{Error, Result};

/// Directory repository trait
#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    /// Active cases of one firm
    async fn list_active_cases(&self, firm_id: FirmId) -> Result<Vec<CaseEntry>>;

    /// Clients of one firm
    async fn list_clients(&self, firm_id: FirmId) -> Result<Vec<ClientEntry>>;

    /// Look up a case by id regardless of firm, so callers can detect mismatches
    async fn get_case(&self, case_id: CaseId) -> Result<Option<CaseEntry>>;
}

/// PostgreSQL directory repository
pub struct DbDirectoryRepository {
    pool: DatabasePool,
}

impl DbDirectoryRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DirectoryRepository for DbDirectoryRepository {
    async fn list_active_cases(&self, firm_id: FirmId) -> Result<Vec<CaseEntry>> {
        sqlx::query_as::<_, CaseEntry>(
            r#"
            SELECT id, firm_id, case_number, client_id, status,
                   participant_addresses, last_activity_at
            FROM cases
            WHERE firm_id = $1 AND status = 'active'
            ORDER BY case_number
            "#,
        )
        .bind(firm_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_clients(&self, firm_id: FirmId) -> Result<Vec<ClientEntry>> {
        sqlx::query_as::<_, ClientEntry>(
            "SELECT id, firm_id, name, contact_addresses FROM clients WHERE firm_id = $1 ORDER BY name",
        )
        .bind(firm_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get_case(&self, case_id: CaseId) -> Result<Option<CaseEntry>> {
        sqlx::query_as::<_, CaseEntry>(
            r#"
            SELECT id, firm_id, case_number, client_id, status,
                   participant_addresses, last_activity_at
            FROM cases
            WHERE id = $1
            "#,
        )
        .bind(case_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
