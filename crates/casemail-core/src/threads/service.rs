//! Thread service - thread views and thread-wide actions

use super::assembler::{build_thread, group_into_threads, Thread, ThreadParticipant};
use crate::audit::AuditDispatcher;
use casemail_common::types::{CaseId, FirmId, UserId};
use casemail_common::{Error, Result};
use casemail_storage::models::{AuditEvent, AuditEventType, MessageCaseLink, ThreadStats};
use casemail_storage::repository::{DirectoryRepository, MessageRepository};
use std::sync::Arc;
use tracing::info;

/// Messages loaded when building a thread list
const DEFAULT_SCAN_LIMIT: i64 = 5000;

/// Thread service
pub struct ThreadService {
    messages: Arc<dyn MessageRepository>,
    directory: Arc<dyn DirectoryRepository>,
    audit: AuditDispatcher,
    scan_limit: i64,
}

impl ThreadService {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        directory: Arc<dyn DirectoryRepository>,
        audit: AuditDispatcher,
    ) -> Self {
        Self {
            messages,
            directory,
            audit,
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }

    /// Cap on messages read per thread listing
    pub fn with_scan_limit(mut self, scan_limit: i64) -> Self {
        self.scan_limit = scan_limit;
        self
    }

    /// Most recently active threads of a mailbox
    pub async fn list_threads(&self, firm_id: FirmId, user_id: UserId, limit: usize) -> Result<Vec<Thread>> {
        let messages = self
            .messages
            .list_for_user(firm_id, user_id, self.scan_limit)
            .await?;
        let mut threads = group_into_threads(messages);
        threads.truncate(limit);
        Ok(threads)
    }

    pub async fn get_thread(
        &self,
        firm_id: FirmId,
        conversation_id: &str,
        user_id: UserId,
    ) -> Result<Option<Thread>> {
        let messages = self
            .messages
            .list_conversation(firm_id, user_id, conversation_id)
            .await?;
        Ok(build_thread(messages))
    }

    pub async fn thread_participants(
        &self,
        firm_id: FirmId,
        conversation_id: &str,
        user_id: UserId,
    ) -> Result<Vec<ThreadParticipant>> {
        self.get_thread(firm_id, conversation_id, user_id)
            .await?
            .map(|thread| thread.participants)
            .ok_or_else(|| Error::NotFound(format!("thread {}", conversation_id)))
    }

    /// Move every message of a thread to a case in one step.
    ///
    /// Repeating the call with the same arguments leaves the same state.
    pub async fn assign_thread_to_case(
        &self,
        firm_id: FirmId,
        conversation_id: &str,
        case_id: CaseId,
        user_id: UserId,
    ) -> Result<Vec<MessageCaseLink>> {
        let case = self
            .directory
            .get_case(case_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("case {}", case_id)))?;
        if case.firm_id != firm_id {
            return Err(Error::FirmMismatch {
                entity: format!("case {}", case_id),
                expected: firm_id,
                actual: case.firm_id,
            });
        }

        let links = self
            .messages
            .assign_conversation(
                firm_id,
                user_id,
                conversation_id,
                case.id,
                Some(case.client_id),
                user_id,
            )
            .await?;
        if links.is_empty() {
            return Err(Error::NotFound(format!("thread {}", conversation_id)));
        }

        info!(
            firm_id = %firm_id,
            conversation_id,
            case_id = %case_id,
            messages = links.len(),
            "Thread assigned to case"
        );

        self.audit
            .dispatch(
                AuditEvent::new(firm_id, AuditEventType::ThreadAssigned)
                    .with_actor(user_id)
                    .with_conversation(conversation_id)
                    .with_case(Some(case.id))
                    .with_client(Some(case.client_id))
                    .with_details(serde_json::json!({
                        "case_number": case.case_number,
                        "message_count": links.len(),
                    })),
            )
            .await;
        for link in &links {
            self.audit
                .dispatch(
                    AuditEvent::new(firm_id, AuditEventType::MessageLinked)
                        .with_actor(user_id)
                        .with_message(link.message_id)
                        .with_conversation(conversation_id)
                        .with_case(Some(link.case_id))
                        .with_details(serde_json::json!({ "link_id": link.id })),
                )
                .await;
        }

        Ok(links)
    }

    /// Returns how many messages changed
    pub async fn mark_thread_as_read(
        &self,
        firm_id: FirmId,
        conversation_id: &str,
        user_id: UserId,
    ) -> Result<u64> {
        self.messages
            .mark_conversation_read(firm_id, user_id, conversation_id)
            .await
    }

    pub async fn get_thread_stats(&self, firm_id: FirmId, user_id: UserId) -> Result<ThreadStats> {
        self.messages.thread_stats(firm_id, user_id).await
    }
}
