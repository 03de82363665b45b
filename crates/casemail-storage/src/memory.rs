//! In-memory repository implementations
//!
//! Behave like the PostgreSQL repositories (same dedup keys, same write
//! guards, same atomicity for conversation-wide updates) and back the test
//! suites and embedded use without a database.

use crate::models::{
    ApplyMode, AuditEvent, BacklogCursor, CaseEntry, ClassificationUpdate, ClientEntry, InsertOutcome, Message,
    MessageCaseLink, NewMessage, SyncCursor, ThreadStats,
};
use crate::repository::{AuditSink, CursorRepository, DirectoryRepository, MessageRepository};
use async_trait::async_trait;
use casemail_common::types::{
    CaseId, ClassificationState, ClientId, FirmId, MessageId, UserId,
    AUTO_RECLASSIFICATION_ACTOR, INGESTION_ACTOR,
};
use casemail_common::Result;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MessageState {
    messages: HashMap<MessageId, Message>,
    links: Vec<MessageCaseLink>,
}

/// In-memory message repository
#[derive(Default)]
pub struct MemoryMessageRepository {
    state: RwLock<MessageState>,
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed row, bypassing dedup (fixtures)
    pub async fn put(&self, message: Message) {
        self.state.write().await.messages.insert(message.id, message);
    }

    /// Snapshot of every stored message
    pub async fn all(&self) -> Vec<Message> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state.messages.values().cloned().collect();
        messages.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));
        messages
    }

    /// Case links recorded by conversation assignments
    pub async fn links(&self) -> Vec<MessageCaseLink> {
        self.state.read().await.links.clone()
    }
}

fn guard_allows(message: &Message, mode: ApplyMode) -> bool {
    if mode == ApplyMode::UnresolvedOnly {
        return message.state() != ClassificationState::Classified && message.case_id.is_none();
    }
    if mode == ApplyMode::Override || message.state() != ClassificationState::Classified {
        return true;
    }
    match message.classified_by.as_deref() {
        None => true,
        Some(actor) => actor == AUTO_RECLASSIFICATION_ACTOR || actor == INGESTION_ACTOR,
    }
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn insert_new(&self, messages: Vec<NewMessage>) -> Result<InsertOutcome> {
        let mut state = self.state.write().await;
        let mut seen: HashSet<(UserId, String)> = state
            .messages
            .values()
            .map(|m| (m.user_id, m.provider_message_id.clone()))
            .collect();

        let mut outcome = InsertOutcome::default();
        let now = Utc::now();
        for input in messages {
            if !seen.insert((input.user_id, input.provider_message_id.clone())) {
                outcome.duplicates += 1;
                continue;
            }
            let message = input.into_message(Uuid::now_v7(), now);
            state.messages.insert(message.id, message.clone());
            outcome.inserted.push(message);
        }
        Ok(outcome)
    }

    async fn get(&self, firm_id: FirmId, id: MessageId) -> Result<Option<Message>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .get(&id)
            .filter(|m| m.firm_id == firm_id)
            .cloned())
    }

    async fn list_for_user(&self, firm_id: FirmId, user_id: UserId, limit: i64) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|m| m.firm_id == firm_id && m.user_id == user_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        messages.truncate(limit.max(0) as usize);
        Ok(messages)
    }

    async fn list_conversation(
        &self,
        firm_id: FirmId,
        user_id: UserId,
        conversation_id: &str,
    ) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|m| {
                m.firm_id == firm_id && m.user_id == user_id && m.conversation_id == conversation_id
            })
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        Ok(messages)
    }

    async fn list_unresolved(
        &self,
        firm_id: FirmId,
        after: Option<BacklogCursor>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|m| m.firm_id == firm_id && m.case_id.is_none() && m.state().is_unresolved())
            .filter(|m| after.map_or(true, |c| (m.received_at, m.id) > (c.received_at, c.id)))
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));
        messages.truncate(limit.max(0) as usize);
        Ok(messages)
    }

    async fn apply_classification(
        &self,
        firm_id: FirmId,
        id: MessageId,
        update: &ClassificationUpdate,
        mode: ApplyMode,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.messages.get_mut(&id) {
            Some(message) if message.firm_id == firm_id && guard_allows(message, mode) => {
                update.apply_to(message, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_classification(&self, firm_id: FirmId, id: MessageId) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.messages.get_mut(&id) {
            Some(message) if message.firm_id == firm_id => {
                ClassificationUpdate::reset().apply_to(message, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
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
        // one write guard for the whole conversation
        let mut state = self.state.write().await;
        let now = Utc::now();

        let mut touched = Vec::new();
        for message in state.messages.values_mut().filter(|m| {
            m.firm_id == firm_id && m.user_id == user_id && m.conversation_id == conversation_id
        }) {
            let unchanged =
                message.state() == ClassificationState::Classified && message.case_id == Some(case_id);
            let update = ClassificationUpdate {
                state: ClassificationState::Classified,
                case_id: Some(case_id),
                client_id,
                confidence: Some(1.0),
                classified_by: Some(linked_by.to_string()),
                classified_at: if unchanged { message.classified_at } else { Some(now) },
            };
            update.apply_to(message, now);
            touched.push(message.id);
        }
        touched.sort();

        let mut links = Vec::with_capacity(touched.len());
        for message_id in touched {
            let existing = state
                .links
                .iter_mut()
                .find(|l| l.message_id == message_id && l.case_id == case_id);
            let link = match existing {
                Some(link) => {
                    link.linked_by = linked_by;
                    link.clone()
                }
                None => {
                    let link = MessageCaseLink {
                        id: Uuid::now_v7(),
                        firm_id,
                        message_id,
                        case_id,
                        conversation_id: conversation_id.to_string(),
                        linked_by,
                        linked_at: now,
                    };
                    state.links.push(link.clone());
                    link
                }
            };
            links.push(link);
        }
        Ok(links)
    }

    async fn mark_conversation_read(
        &self,
        firm_id: FirmId,
        user_id: UserId,
        conversation_id: &str,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut changed = 0;
        for message in state.messages.values_mut().filter(|m| {
            m.firm_id == firm_id
                && m.user_id == user_id
                && m.conversation_id == conversation_id
                && !m.is_read
        }) {
            message.is_read = true;
            message.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }

    async fn thread_stats(&self, firm_id: FirmId, user_id: UserId) -> Result<ThreadStats> {
        let state = self.state.read().await;
        let mut total = HashSet::new();
        let mut unread = HashSet::new();
        for message in state
            .messages
            .values()
            .filter(|m| m.firm_id == firm_id && m.user_id == user_id)
        {
            total.insert(message.conversation_id.as_str());
            if !message.is_read {
                unread.insert(message.conversation_id.as_str());
            }
        }
        Ok(ThreadStats {
            total_threads: total.len() as i64,
            unread_threads: unread.len() as i64,
        })
    }
}

/// In-memory case/client directory
#[derive(Default)]
pub struct MemoryDirectoryRepository {
    cases: RwLock<Vec<CaseEntry>>,
    clients: RwLock<Vec<ClientEntry>>,
}

impl MemoryDirectoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_case(&self, case: CaseEntry) {
        self.cases.write().await.push(case);
    }

    pub async fn add_client(&self, client: ClientEntry) {
        self.clients.write().await.push(client);
    }
}

#[async_trait]
impl DirectoryRepository for MemoryDirectoryRepository {
    async fn list_active_cases(&self, firm_id: FirmId) -> Result<Vec<CaseEntry>> {
        let cases = self.cases.read().await;
        Ok(cases
            .iter()
            .filter(|c| c.firm_id == firm_id && c.is_active())
            .cloned()
            .collect())
    }

    async fn list_clients(&self, firm_id: FirmId) -> Result<Vec<ClientEntry>> {
        let clients = self.clients.read().await;
        Ok(clients.iter().filter(|c| c.firm_id == firm_id).cloned().collect())
    }

    async fn get_case(&self, case_id: CaseId) -> Result<Option<CaseEntry>> {
        let cases = self.cases.read().await;
        Ok(cases.iter().find(|c| c.id == case_id).cloned())
    }
}

/// In-memory cursor store
#[derive(Default)]
pub struct MemoryCursorRepository {
    cursors: RwLock<HashMap<UserId, SyncCursor>>,
}

impl MemoryCursorRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorRepository for MemoryCursorRepository {
    async fn load(&self, user_id: UserId) -> Result<Option<SyncCursor>> {
        Ok(self.cursors.read().await.get(&user_id).cloned())
    }

    async fn save(&self, user_id: UserId, firm_id: FirmId, cursor: &str) -> Result<()> {
        self.cursors.write().await.insert(
            user_id,
            SyncCursor {
                user_id,
                firm_id,
                cursor: cursor.to_string(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}

/// In-memory audit log
#[derive(Default)]
pub struct MemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casemail_common::types::Importance;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn new_message(firm_id: FirmId, user_id: UserId, provider_id: &str, conversation: &str) -> NewMessage {
        NewMessage {
            firm_id,
            user_id,
            provider_message_id: provider_id.to_string(),
            conversation_id: conversation.to_string(),
            internet_message_id: None,
            in_reply_to: None,
            reference_ids: vec![],
            subject: Some("Subject".to_string()),
            body_preview: None,
            from_address: Some("a@example.com".to_string()),
            to_addresses: vec![],
            cc_addresses: vec![],
            bcc_addresses: vec![],
            received_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            sent_at: None,
            has_attachments: false,
            importance: Importance::Normal,
            is_read: false,
        }
    }

    #[tokio::test]
    async fn test_insert_skips_duplicates() {
        let repo = MemoryMessageRepository::new();
        let (firm, user) = (Uuid::new_v4(), Uuid::new_v4());

        let first = repo
            .insert_new(vec![
                new_message(firm, user, "p1", "c1"),
                new_message(firm, user, "p2", "c1"),
                new_message(firm, user, "p1", "c1"),
            ])
            .await
            .unwrap();
        assert_eq!(first.inserted.len(), 2);
        assert_eq!(first.duplicates, 1);

        let second = repo
            .insert_new(vec![new_message(firm, user, "p2", "c1")])
            .await
            .unwrap();
        assert!(second.inserted.is_empty());
        assert_eq!(second.duplicates, 1);

        // the same provider id in another mailbox is a different message
        let other_user = repo
            .insert_new(vec![new_message(firm, Uuid::new_v4(), "p1", "c1")])
            .await
            .unwrap();
        assert_eq!(other_user.inserted.len(), 1);
    }

    #[tokio::test]
    async fn test_guard_protects_human_assignment() {
        let repo = MemoryMessageRepository::new();
        let (firm, user) = (Uuid::new_v4(), Uuid::new_v4());
        let inserted = repo
            .insert_new(vec![new_message(firm, user, "p1", "c1")])
            .await
            .unwrap();
        let id = inserted.inserted[0].id;

        let human = ClassificationUpdate {
            state: ClassificationState::Classified,
            case_id: Some(Uuid::new_v4()),
            client_id: None,
            confidence: Some(1.0),
            classified_by: Some(user.to_string()),
            classified_at: Some(Utc::now()),
        };
        assert!(repo.apply_classification(firm, id, &human, ApplyMode::RespectHuman).await.unwrap());

        let automated = ClassificationUpdate {
            state: ClassificationState::Uncertain,
            case_id: None,
            client_id: None,
            confidence: Some(0.1),
            classified_by: Some(AUTO_RECLASSIFICATION_ACTOR.to_string()),
            classified_at: Some(Utc::now()),
        };
        assert!(!repo
            .apply_classification(firm, id, &automated, ApplyMode::RespectHuman)
            .await
            .unwrap());
        assert!(repo
            .apply_classification(firm, id, &automated, ApplyMode::Override)
            .await
            .unwrap());

        // another firm can never write
        assert!(!repo
            .apply_classification(Uuid::new_v4(), id, &human, ApplyMode::Override)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unresolved_only_never_touches_classified() {
        let repo = MemoryMessageRepository::new();
        let (firm, user) = (Uuid::new_v4(), Uuid::new_v4());
        let inserted = repo
            .insert_new(vec![new_message(firm, user, "p1", "c1")])
            .await
            .unwrap();
        let id = inserted.inserted[0].id;

        let uncertain = ClassificationUpdate {
            state: ClassificationState::Uncertain,
            case_id: None,
            client_id: None,
            confidence: Some(0.2),
            classified_by: Some(AUTO_RECLASSIFICATION_ACTOR.to_string()),
            classified_at: Some(Utc::now()),
        };
        assert!(repo
            .apply_classification(firm, id, &uncertain, ApplyMode::UnresolvedOnly)
            .await
            .unwrap());

        // classified at ingestion in the meantime
        let case_id = Uuid::new_v4();
        let ingested = ClassificationUpdate {
            state: ClassificationState::Classified,
            case_id: Some(case_id),
            client_id: None,
            confidence: Some(0.9),
            classified_by: Some(INGESTION_ACTOR.to_string()),
            classified_at: Some(Utc::now()),
        };
        assert!(repo
            .apply_classification(firm, id, &ingested, ApplyMode::RespectHuman)
            .await
            .unwrap());

        assert!(!repo
            .apply_classification(firm, id, &uncertain, ApplyMode::UnresolvedOnly)
            .await
            .unwrap());
        let stored = repo.get(firm, id).await.unwrap().unwrap();
        assert_eq!(stored.case_id, Some(case_id));
        assert_eq!(stored.state(), ClassificationState::Classified);
    }

    #[tokio::test]
    async fn test_list_unresolved_pages_by_keyset() {
        let repo = MemoryMessageRepository::new();
        let (firm, user) = (Uuid::new_v4(), Uuid::new_v4());
        let batch = (0..5)
            .map(|i| {
                let mut message = new_message(firm, user, &format!("p{}", i), "c1");
                message.received_at = message.received_at + Duration::minutes(i);
                message
            })
            .collect();
        repo.insert_new(batch).await.unwrap();

        let mut seen = Vec::new();
        let mut after = None;
        loop {
            let page = repo.list_unresolved(firm, after, 2).await.unwrap();
            if page.is_empty() {
                break;
            }
            after = page.last().map(BacklogCursor::after);
            seen.extend(page.into_iter().map(|m| m.provider_message_id));
        }
        assert_eq!(seen, vec!["p0", "p1", "p2", "p3", "p4"]);
    }

    #[tokio::test]
    async fn test_assign_conversation_is_idempotent() {
        let repo = MemoryMessageRepository::new();
        let (firm, user) = (Uuid::new_v4(), Uuid::new_v4());
        let mut later = new_message(firm, user, "p2", "c1");
        later.received_at = later.received_at + Duration::minutes(5);
        repo.insert_new(vec![
            new_message(firm, user, "p1", "c1"),
            later,
            new_message(firm, user, "p3", "c2"),
        ])
        .await
        .unwrap();

        let case_id = Uuid::new_v4();
        let first = repo
            .assign_conversation(firm, user, "c1", case_id, None, user)
            .await
            .unwrap();
        let snapshot = repo.all().await;
        let second = repo
            .assign_conversation(firm, user, "c1", case_id, None, user)
            .await
            .unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(repo.links().await.len(), 2);
        let after = repo.all().await;
        for (a, b) in snapshot.iter().zip(after.iter()) {
            assert_eq!(a.case_id, b.case_id);
            assert_eq!(a.classified_at, b.classified_at);
        }
        let untouched = after.iter().find(|m| m.conversation_id == "c2").unwrap();
        assert!(untouched.case_id.is_none());
    }

    #[tokio::test]
    async fn test_thread_stats() {
        let repo = MemoryMessageRepository::new();
        let (firm, user) = (Uuid::new_v4(), Uuid::new_v4());
        let mut read = new_message(firm, user, "p3", "c2");
        read.is_read = true;
        repo.insert_new(vec![
            new_message(firm, user, "p1", "c1"),
            new_message(firm, user, "p2", "c1"),
            read,
        ])
        .await
        .unwrap();

        let stats = repo.thread_stats(firm, user).await.unwrap();
        assert_eq!(stats, ThreadStats { total_threads: 2, unread_threads: 1 });

        assert_eq!(repo.mark_conversation_read(firm, user, "c1").await.unwrap(), 2);
        let stats = repo.thread_stats(firm, user).await.unwrap();
        assert_eq!(stats.unread_threads, 0);
    }
}
