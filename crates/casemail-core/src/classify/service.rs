//! Classification service - scoring plus persistence and audit

use super::{ClassificationResult, ClassificationScorer, FirmDirectory};
use crate::audit::AuditDispatcher;
use casemail_common::types::{
    CaseId, ClassificationActor, ClassificationState, FirmId, MessageId, UserId,
};
use casemail_common::{Error, Result};
use casemail_storage::models::{ApplyMode, AuditEvent, AuditEventType, ClassificationUpdate, Message};
use casemail_storage::repository::{DirectoryRepository, MessageRepository};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// A scoring decision and whether it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationOutcome {
    pub message_id: MessageId,
    pub result: ClassificationResult,
    /// False when a human assignment protected the message
    pub applied: bool,
}

/// Classification service
pub struct ClassificationService {
    messages: Arc<dyn MessageRepository>,
    directory: Arc<dyn DirectoryRepository>,
    scorer: ClassificationScorer,
    audit: AuditDispatcher,
}

impl ClassificationService {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        directory: Arc<dyn DirectoryRepository>,
        scorer: ClassificationScorer,
        audit: AuditDispatcher,
    ) -> Self {
        Self {
            messages,
            directory,
            scorer,
            audit,
        }
    }

    pub fn scorer(&self) -> &ClassificationScorer {
        &self.scorer
    }

    /// Snapshot of a firm's active cases and clients
    pub async fn load_directory(&self, firm_id: FirmId) -> Result<FirmDirectory> {
        FirmDirectory::load(firm_id, self.directory.as_ref()).await
    }

    async fn load_message(&self, firm_id: FirmId, message_id: MessageId) -> Result<Message> {
        self.messages
            .get(firm_id, message_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("message {}", message_id)))
    }

    /// Score a message against a directory snapshot, with its thread as context
    pub async fn score(&self, message: &Message, directory: &FirmDirectory) -> Result<ClassificationResult> {
        let thread = self
            .messages
            .list_conversation(message.firm_id, message.user_id, &message.conversation_id)
            .await?;
        self.scorer.classify(message, &thread, directory)
    }

    /// Persist a result. Returns false when the write guard refused it.
    pub async fn apply(
        &self,
        message: &Message,
        result: &ClassificationResult,
        actor: ClassificationActor,
        mode: ApplyMode,
    ) -> Result<bool> {
        let update = result.to_update(actor, Utc::now());
        let applied = self
            .messages
            .apply_classification(message.firm_id, message.id, &update, mode)
            .await?;

        if applied {
            debug!(
                message_id = %message.id,
                state = %result.state,
                confidence = result.confidence,
                actor = %actor,
                "Classification applied"
            );
            self.audit
                .dispatch(
                    AuditEvent::new(message.firm_id, AuditEventType::ClassificationDecision)
                        .with_actor(actor)
                        .with_message(message.id)
                        .with_conversation(message.conversation_id.clone())
                        .with_case(result.case_id)
                        .with_client(result.client_id)
                        .with_details(serde_json::json!({
                            "state": result.state,
                            "confidence": result.confidence,
                            "reason": result.reason,
                            "previous_state": message.classification_state,
                        })),
                )
                .await;
        } else {
            debug!(message_id = %message.id, "Classification skipped, message assigned by a person");
        }
        Ok(applied)
    }

    /// Score and apply against an already loaded directory
    pub async fn classify_with_directory(
        &self,
        message: &Message,
        directory: &FirmDirectory,
        actor: ClassificationActor,
        mode: ApplyMode,
    ) -> Result<ClassificationOutcome> {
        let result = self.score(message, directory).await?;
        let applied = self.apply(message, &result, actor, mode).await?;
        Ok(ClassificationOutcome {
            message_id: message.id,
            result,
            applied,
        })
    }

    /// Classify a stored message, leaving human assignments untouched
    pub async fn classify_message(
        &self,
        firm_id: FirmId,
        message_id: MessageId,
        actor: ClassificationActor,
    ) -> Result<ClassificationOutcome> {
        let message = self.load_message(firm_id, message_id).await?;
        let directory = self.load_directory(firm_id).await?;
        self.classify_with_directory(&message, &directory, actor, ApplyMode::RespectHuman)
            .await
    }

    /// Explicit re-score requested by a user; overrides earlier assignments
    pub async fn reclassify_message(
        &self,
        firm_id: FirmId,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<ClassificationOutcome> {
        let message = self.load_message(firm_id, message_id).await?;
        let directory = self.load_directory(firm_id).await?;
        info!(message_id = %message_id, user_id = %user_id, "Manual reclassification requested");
        self.classify_with_directory(
            &message,
            &directory,
            ClassificationActor::User(user_id),
            ApplyMode::Override,
        )
        .await
    }

    /// Assign a message to a case by hand
    pub async fn assign_manually(
        &self,
        firm_id: FirmId,
        message_id: MessageId,
        case_id: CaseId,
        user_id: UserId,
    ) -> Result<Message> {
        let message = self.load_message(firm_id, message_id).await?;
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

        let actor = ClassificationActor::User(user_id);
        let update = ClassificationUpdate {
            state: ClassificationState::Classified,
            case_id: Some(case.id),
            client_id: Some(case.client_id),
            confidence: Some(1.0),
            classified_by: Some(actor.to_string()),
            classified_at: Some(Utc::now()),
        };
        self.messages
            .apply_classification(firm_id, message_id, &update, ApplyMode::Override)
            .await?;

        info!(message_id = %message_id, case_id = %case_id, user_id = %user_id, "Message assigned to case");
        self.audit
            .dispatch(
                AuditEvent::new(firm_id, AuditEventType::ManualAssignment)
                    .with_actor(actor)
                    .with_message(message_id)
                    .with_conversation(message.conversation_id.clone())
                    .with_case(Some(case.id))
                    .with_client(Some(case.client_id))
                    .with_details(serde_json::json!({
                        "case_number": case.case_number,
                        "previous_case_id": message.case_id,
                    })),
            )
            .await;

        self.load_message(firm_id, message_id).await
    }

    /// Return a message to `pending`
    pub async fn reset_classification(&self, firm_id: FirmId, message_id: MessageId) -> Result<Message> {
        let message = self.load_message(firm_id, message_id).await?;
        self.messages.reset_classification(firm_id, message_id).await?;

        info!(message_id = %message_id, "Classification reset");
        self.audit
            .dispatch(
                AuditEvent::new(firm_id, AuditEventType::ClassificationReset)
                    .with_message(message_id)
                    .with_conversation(message.conversation_id.clone())
                    .with_case(message.case_id)
                    .with_client(message.client_id)
                    .with_details(serde_json::json!({
                        "previous_state": message.classification_state,
                        "previous_classified_by": message.classified_by,
                    })),
            )
            .await;

        self.load_message(firm_id, message_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casemail_common::config::ClassificationConfig;
    use casemail_common::types::{CaseStatus, Importance, AUTO_RECLASSIFICATION_ACTOR};
    use casemail_storage::memory::{MemoryAuditLog, MemoryDirectoryRepository, MemoryMessageRepository};
    use casemail_storage::models::{CaseEntry, ClientEntry, NewMessage};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    struct Harness {
        firm_id: FirmId,
        user_id: UserId,
        messages: Arc<MemoryMessageRepository>,
        directory: Arc<MemoryDirectoryRepository>,
        audit_log: Arc<MemoryAuditLog>,
        audit: AuditDispatcher,
        service: ClassificationService,
    }

    impl Harness {
        fn new() -> Self {
            let messages = Arc::new(MemoryMessageRepository::new());
            let directory = Arc::new(MemoryDirectoryRepository::new());
            let audit_log = Arc::new(MemoryAuditLog::new());
            let audit = AuditDispatcher::new(vec![audit_log.clone()]);
            let service = ClassificationService::new(
                messages.clone(),
                directory.clone(),
                ClassificationScorer::new(ClassificationConfig::default()),
                audit.clone(),
            );
            Self {
                firm_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                messages,
                directory,
                audit_log,
                audit,
                service,
            }
        }

        async fn case(&self, firm_id: FirmId, number: &str, contact: &str) -> CaseEntry {
            let client = ClientEntry {
                id: Uuid::new_v4(),
                firm_id,
                name: number.to_string(),
                contact_addresses: vec![contact.to_string()],
            };
            let case = CaseEntry {
                id: Uuid::new_v4(),
                firm_id,
                case_number: number.to_string(),
                client_id: client.id,
                status: CaseStatus::Active.as_str().to_string(),
                participant_addresses: vec![],
                last_activity_at: None,
            };
            self.directory.add_client(client).await;
            self.directory.add_case(case.clone()).await;
            case
        }

        async fn message(&self, subject: &str, from: &str) -> Message {
            let outcome = self
                .messages
                .insert_new(vec![NewMessage {
                    firm_id: self.firm_id,
                    user_id: self.user_id,
                    provider_message_id: Uuid::new_v4().to_string(),
                    conversation_id: Uuid::new_v4().to_string(),
                    internet_message_id: None,
                    in_reply_to: None,
                    reference_ids: vec![],
                    subject: Some(subject.to_string()),
                    body_preview: None,
                    from_address: Some(from.to_string()),
                    to_addresses: vec![],
                    cc_addresses: vec![],
                    bcc_addresses: vec![],
                    received_at: Utc::now(),
                    sent_at: None,
                    has_attachments: false,
                    importance: Importance::Normal,
                    is_read: false,
                }])
                .await
                .unwrap();
            outcome.inserted[0].clone()
        }
    }

    #[tokio::test]
    async fn test_classify_message_applies_and_audits() {
        let h = Harness::new();
        let case = h.case(h.firm_id, "MAT-100", "client@acme.com").await;
        let message = h.message("MAT-100 engagement letter", "client@acme.com").await;

        let outcome = h
            .service
            .classify_message(h.firm_id, message.id, ClassificationActor::Ingestion)
            .await
            .unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.result.case_id, Some(case.id));

        let stored = h.messages.get(h.firm_id, message.id).await.unwrap().unwrap();
        assert_eq!(stored.state(), ClassificationState::Classified);
        assert_eq!(stored.classified_by.as_deref(), Some("ingestion"));

        h.audit.flush().await;
        let events = h.audit_log.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "classification_decision");
    }

    #[tokio::test]
    async fn test_human_assignment_survives_automated_scoring() {
        let h = Harness::new();
        let chosen = h.case(h.firm_id, "MAT-1", "other@acme.com").await;
        h.case(h.firm_id, "MAT-2", "client@acme.com").await;
        let message = h.message("MAT-2 question", "client@acme.com").await;

        h.service
            .assign_manually(h.firm_id, message.id, chosen.id, h.user_id)
            .await
            .unwrap();
        let outcome = h
            .service
            .classify_message(h.firm_id, message.id, ClassificationActor::AutoReclassification)
            .await
            .unwrap();
        assert!(!outcome.applied);

        let stored = h.messages.get(h.firm_id, message.id).await.unwrap().unwrap();
        assert_eq!(stored.case_id, Some(chosen.id));
        assert!(stored.is_human_classified());
        assert_ne!(stored.classified_by.as_deref(), Some(AUTO_RECLASSIFICATION_ACTOR));
    }

    #[tokio::test]
    async fn test_reclassify_overrides_human_assignment() {
        let h = Harness::new();
        let chosen = h.case(h.firm_id, "MAT-1", "other@acme.com").await;
        let matching = h.case(h.firm_id, "MAT-2", "client@acme.com").await;
        let message = h.message("MAT-2 question", "client@acme.com").await;

        h.service
            .assign_manually(h.firm_id, message.id, chosen.id, h.user_id)
            .await
            .unwrap();
        let outcome = h
            .service
            .reclassify_message(h.firm_id, message.id, h.user_id)
            .await
            .unwrap();
        assert!(outcome.applied);

        let stored = h.messages.get(h.firm_id, message.id).await.unwrap().unwrap();
        assert_eq!(stored.case_id, Some(matching.id));
    }

    #[tokio::test]
    async fn test_assign_rejects_case_of_other_firm() {
        let h = Harness::new();
        let foreign = h.case(Uuid::new_v4(), "MAT-9", "client@globex.com").await;
        let message = h.message("hello", "client@acme.com").await;

        let err = h
            .service
            .assign_manually(h.firm_id, message.id, foreign.id, h.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FirmMismatch { .. }));

        let stored = h.messages.get(h.firm_id, message.id).await.unwrap().unwrap();
        assert!(stored.case_id.is_none());
    }

    #[tokio::test]
    async fn test_reset_returns_to_pending() {
        let h = Harness::new();
        let case = h.case(h.firm_id, "MAT-1", "client@acme.com").await;
        let message = h.message("hello", "client@acme.com").await;
        h.service
            .assign_manually(h.firm_id, message.id, case.id, h.user_id)
            .await
            .unwrap();

        let reset = h.service.reset_classification(h.firm_id, message.id).await.unwrap();
        assert_eq!(reset.state(), ClassificationState::Pending);
        assert!(reset.case_id.is_none());
        assert!(reset.client_id.is_none());
        assert!(reset.classification_confidence.is_none());
        assert!(reset.classified_by.is_none());
    }

    #[tokio::test]
    async fn test_unknown_message() {
        let h = Harness::new();
        let err = h
            .service
            .classify_message(h.firm_id, Uuid::new_v4(), ClassificationActor::Ingestion)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
