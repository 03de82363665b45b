//! Message repository

use crate::db::DatabasePool;
use crate::models::{
    ApplyMode, BacklogCursor, ClassificationUpdate, InsertOutcome, Message, MessageCaseLink, NewMessage,
    ThreadStats,
};
use async_trait::async_trait;
use casemail_common::types::{
    CaseId, ClassificationState, ClientId, FirmId, MessageId, UserId,
    AUTO_RECLASSIFICATION_ACTOR, INGESTION_ACTOR,
};
use casemail_common::{Error, Result};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

/// Message repository trait
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Insert newly ingested messages, skipping provider ids already stored for the mailbox
    async fn insert_new(&self, messages: Vec<NewMessage>) -> Result<InsertOutcome>;

    /// Get a message by ID
    async fn get(&self, firm_id: FirmId, id: MessageId) -> Result<Option<Message>>;

    /// List a user's messages, newest first
    async fn list_for_user(&self, firm_id: FirmId, user_id: UserId, limit: i64) -> Result<Vec<Message>>;

    /// List every message of one conversation in a user's mailbox
    async fn list_conversation(
        &self,
        firm_id: FirmId,
        user_id: UserId,
        conversation_id: &str,
    ) -> Result<Vec<Message>>;

    /// List messages without a case in `pending`, `client_inbox` or `uncertain` state,
    /// oldest first, starting after `after` when given
    async fn list_unresolved(
        &self,
        firm_id: FirmId,
        after: Option<BacklogCursor>,
        limit: i64,
    ) -> Result<Vec<Message>>;

    /// Write classification fields. Returns false when the guard rejected the write.
    async fn apply_classification(
        &self,
        firm_id: FirmId,
        id: MessageId,
        update: &ClassificationUpdate,
        mode: ApplyMode,
    ) -> Result<bool>;

    /// Return a message to `pending`, clearing case, client and confidence
    async fn reset_classification(&self, firm_id: FirmId, id: MessageId) -> Result<bool>;

    /// Assign every message of a conversation to a case in one transaction
    async fn assign_conversation(
        &self,
        firm_id: FirmId,
        user_id: UserId,
        conversation_id: &str,
        case_id: CaseId,
        client_id: Option<ClientId>,
        linked_by: UserId,
    ) -> Result<Vec<MessageCaseLink>>;

    /// Mark every message of a conversation as read
    async fn mark_conversation_read(
        &self,
        firm_id: FirmId,
        user_id: UserId,
        conversation_id: &str,
    ) -> Result<u64>;

    /// Count distinct conversations and those with unread messages
    async fn thread_stats(&self, firm_id: FirmId, user_id: UserId) -> Result<ThreadStats>;
}

/// PostgreSQL message repository implementation
pub struct DbMessageRepository {
    pool: DatabasePool,
}

impl DbMessageRepository {
    /// Create a new repository
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for DbMessageRepository {
    async fn insert_new(&self, messages: Vec<NewMessage>) -> Result<InsertOutcome> {
        let mut outcome = InsertOutcome::default();
        if messages.is_empty() {
            return Ok(outcome);
        }

        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        for input in messages {
            let inserted = sqlx::query_as::<_, Message>(
                r#"
                INSERT INTO messages (
                    id, firm_id, user_id, provider_message_id, conversation_id,
                    internet_message_id, in_reply_to, reference_ids, subject, body_preview,
                    from_address, to_addresses, cc_addresses, bcc_addresses, received_at,
                    sent_at, has_attachments, importance, is_read, classification_state,
                    created_at, updated_at
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, NOW(), NOW()
                )
                ON CONFLICT (user_id, provider_message_id) DO NOTHING
                RETURNING *
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(input.firm_id)
            .bind(input.user_id)
            .bind(&input.provider_message_id)
            .bind(&input.conversation_id)
            .bind(&input.internet_message_id)
            .bind(&input.in_reply_to)
            .bind(&input.reference_ids)
            .bind(&input.subject)
            .bind(&input.body_preview)
            .bind(&input.from_address)
            .bind(&input.to_addresses)
            .bind(&input.cc_addresses)
            .bind(&input.bcc_addresses)
            .bind(input.received_at)
            .bind(input.sent_at)
            .bind(input.has_attachments)
            .bind(input.importance.as_str())
            .bind(input.is_read)
            .bind(ClassificationState::Pending.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

            match inserted {
                Some(message) => outcome.inserted.push(message),
                None => {
                    debug!(
                        provider_message_id = %input.provider_message_id,
                        "Skipping already stored message"
                    );
                    outcome.duplicates += 1;
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(outcome)
    }

    async fn get(&self, firm_id: FirmId, id: MessageId) -> Result<Option<Message>> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE firm_id = $1 AND id = $2")
            .bind(firm_id)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_for_user(&self, firm_id: FirmId, user_id: UserId, limit: i64) -> Result<Vec<Message>> {
        sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE firm_id = $1 AND user_id = $2
            ORDER BY received_at DESC
            LIMIT $3
            "#,
        )
        .bind(firm_id)
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_conversation(
        &self,
        firm_id: FirmId,
        user_id: UserId,
        conversation_id: &str,
    ) -> Result<Vec<Message>> {
        sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE firm_id = $1 AND user_id = $2 AND conversation_id = $3
            ORDER BY received_at ASC
            "#,
        )
        .bind(firm_id)
        .bind(user_id)
        .bind(conversation_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_unresolved(
        &self,
        firm_id: FirmId,
        after: Option<BacklogCursor>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let states: Vec<String> = ClassificationState::unresolved()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE firm_id = $1
              AND case_id IS NULL
              AND classification_state = ANY($2)
              AND ($3::timestamptz IS NULL OR (received_at, id) > ($3, $4))
            ORDER BY received_at ASC, id ASC
            LIMIT $5
            "#,
        )
        .bind(firm_id)
        .bind(&states)
        .bind(after.map(|c| c.received_at))
        .bind(after.map(|c| c.id))
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn apply_classification(
        &self,
        firm_id: FirmId,
        id: MessageId,
        update: &ClassificationUpdate,
        mode: ApplyMode,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET
                classification_state = $3,
                case_id = $4,
                client_id = $5,
                classification_confidence = $6,
                classified_by = $7,
                classified_at = $8,
                updated_at = NOW()
            WHERE firm_id = $1 AND id = $2
              AND (
                $9
                OR classification_state <> 'classified'
                OR classified_by IS NULL
                OR classified_by IN ($10, $11)
              )
              AND (
                NOT $12
                OR (classification_state <> 'classified' AND case_id IS NULL)
              )
            "#,
        )
        .bind(firm_id)
        .bind(id)
        .bind(update.state.as_str())
        .bind(update.case_id)
        .bind(update.client_id)
        .bind(update.confidence)
        .bind(&update.classified_by)
        .bind(update.classified_at)
        .bind(mode == ApplyMode::Override)
        .bind(AUTO_RECLASSIFICATION_ACTOR)
        .bind(INGESTION_ACTOR)
        .bind(mode == ApplyMode::UnresolvedOnly)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_classification(&self, firm_id: FirmId, id: MessageId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET
                classification_state = 'pending',
                case_id = NULL,
                client_id = NULL,
                classification_confidence = NULL,
                classified_by = NULL,
                classified_at = NULL,
                updated_at = NOW()
            WHERE firm_id = $1 AND id = $2
            "#,
        )
        .bind(firm_id)
        .bind(id)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn assign_conversation(
        &self,
        firm_id: FirmId,
        user_id: UserId,
        conversation_id: &str,
        case_id: CaseId,
        client_id: Option<ClientId>,
        linked_by: UserId,
    ) -> Result<Vec<MessageCaseLink>> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        // classified_at only moves when the assignment actually changes
        let ids: Vec<(MessageId,)> = sqlx::query_as(
            r#"
            UPDATE messages SET
                classified_at = CASE
                    WHEN classification_state = 'classified' AND case_id = $4 THEN classified_at
                    ELSE NOW()
                END,
                classification_state = 'classified',
                case_id = $4,
                client_id = $5,
                classification_confidence = 1.0,
                classified_by = $6,
                updated_at = NOW()
            WHERE firm_id = $1 AND user_id = $2 AND conversation_id = $3
            RETURNING id
            "#,
        )
        .bind(firm_id)
        .bind(user_id)
        .bind(conversation_id)
        .bind(case_id)
        .bind(client_id)
        .bind(linked_by.to_string())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let mut links = Vec::with_capacity(ids.len());
        for (message_id,) in ids {
            let link = sqlx::query_as::<_, MessageCaseLink>(
                r#"
                INSERT INTO message_case_links (
                    id, firm_id, message_id, case_id, conversation_id, linked_by, linked_at
                ) VALUES ($1, $2, $3, $4, $5, $6, NOW())
                ON CONFLICT (message_id, case_id)
                DO UPDATE SET linked_by = EXCLUDED.linked_by
                RETURNING *
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(firm_id)
            .bind(message_id)
            .bind(case_id)
            .bind(conversation_id)
            .bind(linked_by)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
            links.push(link);
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(links)
    }

    async fn mark_conversation_read(
        &self,
        firm_id: FirmId,
        user_id: UserId,
        conversation_id: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET is_read = TRUE, updated_at = NOW()
            WHERE firm_id = $1 AND user_id = $2 AND conversation_id = $3 AND is_read = FALSE
            "#,
        )
        .bind(firm_id)
        .bind(user_id)
        .bind(conversation_id)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn thread_stats(&self, firm_id: FirmId, user_id: UserId) -> Result<ThreadStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(DISTINCT conversation_id) AS total_threads,
                COUNT(DISTINCT conversation_id) FILTER (WHERE is_read = FALSE) AS unread_threads
            FROM messages
            WHERE firm_id = $1 AND user_id = $2
            "#,
        )
        .bind(firm_id)
        .bind(user_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(ThreadStats {
            total_threads: row.get::<i64, _>("total_threads"),
            unread_threads: row.get::<i64, _>("unread_threads"),
        })
    }
}
