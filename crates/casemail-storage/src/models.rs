//! Database models

use casemail_common::types::{
    normalize_address, CaseId, CaseStatus, ClassificationActor, ClassificationState, ClientId,
    FirmId, Importance, MessageId, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Message model
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub firm_id: FirmId,
    pub user_id: UserId,
    pub provider_message_id: String,
    pub conversation_id: String,
    pub internet_message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub reference_ids: Vec<String>,
    pub subject: Option<String>,
    pub body_preview: Option<String>,
    pub from_address: Option<String>,
    pub to_addresses: Vec<String>,
    pub cc_addresses: Vec<String>,
    pub bcc_addresses: Vec<String>,
    pub received_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub has_attachments: bool,
    pub importance: String,
    pub is_read: bool,
    pub case_id: Option<CaseId>,
    pub client_id: Option<ClientId>,
    pub classification_state: String,
    pub classification_confidence: Option<f64>,
    pub classified_at: Option<DateTime<Utc>>,
    pub classified_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Get the classification state enum
    pub fn state(&self) -> ClassificationState {
        self.classification_state
            .parse()
            .unwrap_or(ClassificationState::Pending)
    }

    /// Get the classification actor, if any
    pub fn classified_by_actor(&self) -> Option<ClassificationActor> {
        self.classified_by.as_deref().and_then(ClassificationActor::parse)
    }

    /// A case assignment made by a person
    pub fn is_human_classified(&self) -> bool {
        self.state() == ClassificationState::Classified
            && self.classified_by_actor().map(|a| a.is_human()).unwrap_or(false)
    }

    /// Get the importance enum
    pub fn importance_enum(&self) -> Importance {
        Importance::parse(&self.importance)
    }

    /// Every sender and recipient address, normalized and deduplicated
    pub fn participant_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .from_address
            .iter()
            .chain(self.to_addresses.iter())
            .chain(self.cc_addresses.iter())
            .chain(self.bcc_addresses.iter())
            .map(|a| normalize_address(a))
            .filter(|a| !a.is_empty())
            .collect();
        addresses.sort();
        addresses.dedup();
        addresses
    }
}

/// Input for storing a newly ingested message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub firm_id: FirmId,
    pub user_id: UserId,
    pub provider_message_id: String,
    pub conversation_id: String,
    pub internet_message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub reference_ids: Vec<String>,
    pub subject: Option<String>,
    pub body_preview: Option<String>,
    pub from_address: Option<String>,
    pub to_addresses: Vec<String>,
    pub cc_addresses: Vec<String>,
    pub bcc_addresses: Vec<String>,
    pub received_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub has_attachments: bool,
    pub importance: Importance,
    pub is_read: bool,
}

impl NewMessage {
    /// Materialize as a `Pending` message row
    pub fn into_message(self, id: MessageId, now: DateTime<Utc>) -> Message {
        Message {
            id,
            firm_id: self.firm_id,
            user_id: self.user_id,
            provider_message_id: self.provider_message_id,
            conversation_id: self.conversation_id,
            internet_message_id: self.internet_message_id,
            in_reply_to: self.in_reply_to,
            reference_ids: self.reference_ids,
            subject: self.subject,
            body_preview: self.body_preview,
            from_address: self.from_address,
            to_addresses: self.to_addresses,
            cc_addresses: self.cc_addresses,
            bcc_addresses: self.bcc_addresses,
            received_at: self.received_at,
            sent_at: self.sent_at,
            has_attachments: self.has_attachments,
            importance: self.importance.as_str().to_string(),
            is_read: self.is_read,
            case_id: None,
            client_id: None,
            classification_state: ClassificationState::Pending.as_str().to_string(),
            classification_confidence: None,
            classified_at: None,
            classified_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of a skip-duplicates insert
#[derive(Debug, Clone, Default)]
pub struct InsertOutcome {
    /// Rows that were actually created
    pub inserted: Vec<Message>,
    /// Inputs skipped because the provider id was already stored
    pub duplicates: usize,
}

/// New classification fields for one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationUpdate {
    pub state: ClassificationState,
    pub case_id: Option<CaseId>,
    pub client_id: Option<ClientId>,
    pub confidence: Option<f64>,
    pub classified_by: Option<String>,
    pub classified_at: Option<DateTime<Utc>>,
}

impl ClassificationUpdate {
    /// The update applied by a reset/reprocess operation
    pub fn reset() -> Self {
        Self {
            state: ClassificationState::Pending,
            case_id: None,
            client_id: None,
            confidence: None,
            classified_by: None,
            classified_at: None,
        }
    }

    /// Apply to an in-memory row
    pub fn apply_to(&self, message: &mut Message, now: DateTime<Utc>) {
        message.classification_state = self.state.as_str().to_string();
        message.case_id = self.case_id;
        message.client_id = self.client_id;
        message.classification_confidence = self.confidence;
        message.classified_by = self.classified_by.clone();
        message.classified_at = self.classified_at;
        message.updated_at = now;
    }
}

/// Guard for classification writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Leave messages a person already assigned untouched
    RespectHuman,
    /// Explicit reclassify request: overwrite regardless of attribution
    Override,
    /// Batch re-scoring: only write while the message is still without a case
    UnresolvedOnly,
}

/// Keyset position in the unresolved backlog, ordered by `(received_at, id)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklogCursor {
    pub received_at: DateTime<Utc>,
    pub id: MessageId,
}

impl BacklogCursor {
    pub fn after(message: &Message) -> Self {
        Self {
            received_at: message.received_at,
            id: message.id,
        }
    }
}

/// Case directory entry
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct CaseEntry {
    pub id: CaseId,
    pub firm_id: FirmId,
    pub case_number: String,
    pub client_id: ClientId,
    pub status: String,
    pub participant_addresses: Vec<String>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl CaseEntry {
    pub fn is_active(&self) -> bool {
        self.status == CaseStatus::Active.as_str()
    }
}

/// Client directory entry
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ClientEntry {
    pub id: ClientId,
    pub firm_id: FirmId,
    pub name: String,
    pub contact_addresses: Vec<String>,
}

/// Stored delta cursor for a mailbox
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SyncCursor {
    pub user_id: UserId,
    pub firm_id: FirmId,
    pub cursor: String,
    pub updated_at: DateTime<Utc>,
}

/// Per-message record written by a thread-wide case assignment
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MessageCaseLink {
    pub id: Uuid,
    pub firm_id: FirmId,
    pub message_id: MessageId,
    pub case_id: CaseId,
    pub conversation_id: String,
    pub linked_by: UserId,
    pub linked_at: DateTime<Utc>,
}

/// Thread counters for one mailbox
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadStats {
    pub total_threads: i64,
    pub unread_threads: i64,
}

/// Audit event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ClassificationDecision,
    ManualAssignment,
    ClassificationReset,
    ThreadAssigned,
    MessageLinked,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClassificationDecision => "classification_decision",
            Self::ManualAssignment => "manual_assignment",
            Self::ClassificationReset => "classification_reset",
            Self::ThreadAssigned => "thread_assigned",
            Self::MessageLinked => "message_linked",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit event model
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub firm_id: FirmId,
    pub event_type: String,
    pub actor: Option<String>,
    pub message_id: Option<MessageId>,
    pub conversation_id: Option<String>,
    pub case_id: Option<CaseId>,
    pub client_id: Option<ClientId>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Create a new event with empty details
    pub fn new(firm_id: FirmId, event_type: AuditEventType) -> Self {
        Self {
            id: Uuid::now_v7(),
            firm_id,
            event_type: event_type.as_str().to_string(),
            actor: None,
            message_id: None,
            conversation_id: None,
            case_id: None,
            client_id: None,
            details: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor: impl ToString) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    pub fn with_message(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_case(mut self, case_id: Option<CaseId>) -> Self {
        self.case_id = case_id;
        self
    }

    pub fn with_client(mut self, client_id: Option<ClientId>) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn new_message() -> NewMessage {
        NewMessage {
            firm_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            provider_message_id: "AAMk-1".to_string(),
            conversation_id: "conv-1".to_string(),
            internet_message_id: None,
            in_reply_to: None,
            reference_ids: vec![],
            subject: Some("Contract Review".to_string()),
            body_preview: None,
            from_address: Some("Client <Client@Acme.com>".to_string()),
            to_addresses: vec!["lawyer@firm.com".to_string()],
            cc_addresses: vec!["client@acme.com".to_string()],
            bcc_addresses: vec![],
            received_at: Utc::now(),
            sent_at: None,
            has_attachments: false,
            importance: Importance::High,
            is_read: false,
        }
    }

    #[test]
    fn test_into_message_defaults_to_pending() {
        let message = new_message().into_message(Uuid::new_v4(), Utc::now());
        assert_eq!(message.state(), ClassificationState::Pending);
        assert_eq!(message.importance_enum(), Importance::High);
        assert!(message.case_id.is_none());
        assert!(!message.is_human_classified());
    }

    #[test]
    fn test_participant_addresses_dedup() {
        let message = new_message().into_message(Uuid::new_v4(), Utc::now());
        assert_eq!(
            message.participant_addresses(),
            vec!["client@acme.com".to_string(), "lawyer@firm.com".to_string()]
        );
    }

    #[test]
    fn test_update_and_reset() {
        let mut message = new_message().into_message(Uuid::new_v4(), Utc::now());
        let user = Uuid::new_v4();
        let case_id = Uuid::new_v4();
        ClassificationUpdate {
            state: ClassificationState::Classified,
            case_id: Some(case_id),
            client_id: None,
            confidence: Some(1.0),
            classified_by: Some(user.to_string()),
            classified_at: Some(Utc::now()),
        }
        .apply_to(&mut message, Utc::now());
        assert!(message.is_human_classified());
        assert_eq!(message.case_id, Some(case_id));

        ClassificationUpdate::reset().apply_to(&mut message, Utc::now());
        assert_eq!(message.state(), ClassificationState::Pending);
        assert!(message.case_id.is_none());
        assert!(message.classification_confidence.is_none());
    }

    #[test]
    fn test_audit_event_builder() {
        let firm = Uuid::new_v4();
        let event = AuditEvent::new(firm, AuditEventType::ThreadAssigned)
            .with_conversation("conv-9")
            .with_actor("auto_reclassification");
        assert_eq!(event.event_type, "thread_assigned");
        assert_eq!(event.conversation_id.as_deref(), Some("conv-9"));
        assert_eq!(event.actor.as_deref(), Some("auto_reclassification"));
    }
}
