//! Delta cursor repository

use crate::db::DatabasePool;
use crate::models::SyncCursor;
use async_trait::async_trait;
use casemail_common::types::{FirmId, UserId};
use casemail_common::{Error, Result};

/// Cursor repository trait
#[async_trait]
pub trait CursorRepository: Send + Sync {
    /// Last persisted cursor for a mailbox
    async fn load(&self, user_id: UserId) -> Result<Option<SyncCursor>>;

    /// Persist the cursor returned by a completed sync
    async fn save(&self, user_id: UserId, firm_id: FirmId, cursor: &str) -> Result<()>;
}

/// PostgreSQL cursor repository
pub struct DbCursorRepository {
    pool: DatabasePool,
}

impl DbCursorRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorRepository for DbCursorRepository {
    async fn load(&self, user_id: UserId) -> Result<Option<SyncCursor>> {
        sqlx::query_as::<_, SyncCursor>("SELECT * FROM sync_cursors WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn save(&self, user_id: UserId, firm_id: FirmId, cursor: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (user_id, firm_id, cursor, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET cursor = EXCLUDED.cursor, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(firm_id)
        .bind(cursor)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }
}
