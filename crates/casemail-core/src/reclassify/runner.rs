//! Batch re-scoring of unresolved messages

use crate::classify::{ClassificationResult, ClassificationService, FirmDirectory};
use casemail_common::config::ReclassifyConfig;
use casemail_common::types::{ClassificationActor, ClassificationState, FirmId, MessageId, UserId};
use casemail_common::Result;
use casemail_storage::models::{ApplyMode, BacklogCursor, Message};
use casemail_storage::repository::MessageRepository;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Final counters of one `reclassify_unresolved` run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclassifySummary {
    /// Distinct messages scored
    pub scanned: usize,
    pub classified: usize,
    pub client_inbox: usize,
    pub uncertain: usize,
    /// Messages whose stored decision already matched
    pub unchanged: usize,
    /// Writes refused because the message was classified meanwhile
    pub skipped: usize,
    pub errors: usize,
    pub passes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Written(ClassificationState),
    Unchanged(ClassificationState),
    Skipped,
    Failed,
}

/// Re-scores every unresolved message of a firm
pub struct Reclassifier {
    service: Arc<ClassificationService>,
    messages: Arc<dyn MessageRepository>,
    config: ReclassifyConfig,
}

impl Reclassifier {
    pub fn new(
        service: Arc<ClassificationService>,
        messages: Arc<dyn MessageRepository>,
        config: ReclassifyConfig,
    ) -> Self {
        Self {
            service,
            messages,
            config,
        }
    }

    /// Score every `pending`, `client_inbox` and `uncertain` message without
    /// a case and persist the outcome as `auto_reclassification`.
    ///
    /// Classified messages are never read or written. Per-message failures
    /// are counted and logged. When a pass classifies a message, the
    /// unresolved remainder of its conversation is scored again (up to
    /// `max_passes`) so thread affinity settles within a single run.
    pub async fn reclassify_unresolved(&self, firm_id: FirmId) -> Result<ReclassifySummary> {
        let directory = Arc::new(self.service.load_directory(firm_id).await?);
        info!(
            firm_id = %firm_id,
            cases = directory.cases().count(),
            concurrency = self.config.concurrency,
            "Reclassification started"
        );

        let mut outcomes: HashMap<MessageId, ItemOutcome> = HashMap::new();
        let mut passes = 0;
        let mut focus: Option<HashSet<(UserId, String)>> = None;

        while passes < self.config.max_passes.max(1) {
            let mut scored = false;
            let mut newly_classified = HashSet::new();
            let mut after: Option<BacklogCursor> = None;

            // walk the whole backlog page by page
            loop {
                let page = self
                    .messages
                    .list_unresolved(firm_id, after, self.config.batch_limit.max(1))
                    .await?;
                let exhausted = (page.len() as i64) < self.config.batch_limit.max(1);
                after = page.last().map(BacklogCursor::after);

                let candidates: Vec<Message> = match &focus {
                    Some(conversations) => page
                        .into_iter()
                        .filter(|m| conversations.contains(&(m.user_id, m.conversation_id.clone())))
                        .collect(),
                    None => page,
                };

                if !candidates.is_empty() {
                    if !scored {
                        scored = true;
                        passes += 1;
                    }
                    let results = self.run_pass(firm_id, &directory, candidates, passes).await;
                    for (message, outcome) in results {
                        if outcome == ItemOutcome::Written(ClassificationState::Classified) {
                            newly_classified.insert((message.user_id, message.conversation_id.clone()));
                        }
                        outcomes.insert(message.id, outcome);
                    }
                }

                if exhausted || after.is_none() {
                    break;
                }
            }

            if !scored || newly_classified.is_empty() {
                break;
            }
            focus = Some(newly_classified);
        }

        let summary = summarize(&outcomes, passes);
        info!(
            firm_id = %firm_id,
            scanned = summary.scanned,
            classified = summary.classified,
            client_inbox = summary.client_inbox,
            uncertain = summary.uncertain,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            errors = summary.errors,
            passes = summary.passes,
            "Reclassification finished"
        );
        Ok(summary)
    }

    async fn run_pass(
        &self,
        firm_id: FirmId,
        directory: &Arc<FirmDirectory>,
        candidates: Vec<Message>,
        pass: u32,
    ) -> Vec<(Message, ItemOutcome)> {
        let total = candidates.len();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::with_capacity(total);

        debug!(firm_id = %firm_id, pass, candidates = total, "Reclassification pass");

        for message in candidates {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    warn!("Reclassification semaphore closed: {}", e);
                    break;
                }
            };
            let service = self.service.clone();
            let directory = directory.clone();

            handles.push(tokio::spawn(async move {
                let outcome = process_message(&service, &directory, &message).await;
                drop(permit);
                (message, outcome)
            }));
        }

        let progress_every = self.config.progress_every.max(1);
        let mut results = Vec::with_capacity(handles.len());
        for (done, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => warn!(firm_id = %firm_id, "Reclassification task failed: {}", e),
            }
            if (done + 1) % progress_every == 0 {
                info!(firm_id = %firm_id, pass, done = done + 1, total, "Reclassification progress");
            }
        }
        results
    }
}

async fn process_message(
    service: &ClassificationService,
    directory: &FirmDirectory,
    message: &Message,
) -> ItemOutcome {
    let result: ClassificationResult = match service.score(message, directory).await {
        Ok(result) => result,
        Err(e) => {
            warn!(message_id = %message.id, "Scoring failed, message left unchanged: {}", e);
            return ItemOutcome::Failed;
        }
    };

    if result.matches(message) {
        return ItemOutcome::Unchanged(result.state);
    }

    match service
        .apply(
            message,
            &result,
            ClassificationActor::AutoReclassification,
            ApplyMode::UnresolvedOnly,
        )
        .await
    {
        Ok(true) => ItemOutcome::Written(result.state),
        Ok(false) => ItemOutcome::Skipped,
        Err(e) => {
            warn!(message_id = %message.id, "Failed to store classification: {}", e);
            ItemOutcome::Failed
        }
    }
}

fn summarize(outcomes: &HashMap<MessageId, ItemOutcome>, passes: u32) -> ReclassifySummary {
    let mut summary = ReclassifySummary {
        scanned: outcomes.len(),
        passes,
        ..ReclassifySummary::default()
    };

    for outcome in outcomes.values() {
        let state = match outcome {
            ItemOutcome::Written(state) => *state,
            ItemOutcome::Unchanged(state) => {
                summary.unchanged += 1;
                *state
            }
            ItemOutcome::Skipped => {
                summary.skipped += 1;
                continue;
            }
            ItemOutcome::Failed => {
                summary.errors += 1;
                continue;
            }
        };
        match state {
            ClassificationState::Classified => summary.classified += 1,
            ClassificationState::ClientInbox => summary.client_inbox += 1,
            ClassificationState::Uncertain => summary.uncertain += 1,
            ClassificationState::Pending => {}
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditDispatcher;
    use crate::classify::ClassificationScorer;
    use async_trait::async_trait;
    use casemail_common::config::ClassificationConfig;
    use casemail_common::types::{CaseId, CaseStatus, ClientId, Importance};
    use casemail_common::Error;
    use casemail_storage::memory::{MemoryDirectoryRepository, MemoryMessageRepository};
    use casemail_storage::models::{
        CaseEntry, ClassificationUpdate, ClientEntry, InsertOutcome, MessageCaseLink, NewMessage,
        ThreadStats,
    };
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    /// Delegates to the in-memory store but fails conversation reads for one conversation
    struct FlakyStore {
        inner: Arc<MemoryMessageRepository>,
        broken_conversation: String,
    }

    #[async_trait]
    impl MessageRepository for FlakyStore {
        async fn insert_new(&self, messages: Vec<NewMessage>) -> Result<InsertOutcome> {
            self.inner.insert_new(messages).await
        }
        async fn get(&self, firm_id: FirmId, id: MessageId) -> Result<Option<Message>> {
            self.inner.get(firm_id, id).await
        }
        async fn list_for_user(&self, firm_id: FirmId, user_id: UserId, limit: i64) -> Result<Vec<Message>> {
            self.inner.list_for_user(firm_id, user_id, limit).await
        }
        async fn list_conversation(
            &self,
            firm_id: FirmId,
            user_id: UserId,
            conversation_id: &str,
        ) -> Result<Vec<Message>> {
            if conversation_id == self.broken_conversation {
                return Err(Error::Database("connection reset".to_string()));
            }
            self.inner.list_conversation(firm_id, user_id, conversation_id).await
        }
        async fn list_unresolved(
            &self,
            firm_id: FirmId,
            after: Option<BacklogCursor>,
            limit: i64,
        ) -> Result<Vec<Message>> {
            self.inner.list_unresolved(firm_id, after, limit).await
        }
        async fn apply_classification(
            &self,
            firm_id: FirmId,
            id: MessageId,
            update: &ClassificationUpdate,
            mode: ApplyMode,
        ) -> Result<bool> {
            self.inner.apply_classification(firm_id, id, update, mode).await
        }
        async fn reset_classification(&self, firm_id: FirmId, id: MessageId) -> Result<bool> {
            self.inner.reset_classification(firm_id, id).await
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
            self.inner
                .assign_conversation(firm_id, user_id, conversation_id, case_id, client_id, linked_by)
                .await
        }
        async fn mark_conversation_read(
            &self,
            firm_id: FirmId,
            user_id: UserId,
            conversation_id: &str,
        ) -> Result<u64> {
            self.inner.mark_conversation_read(firm_id, user_id, conversation_id).await
        }
        async fn thread_stats(&self, firm_id: FirmId, user_id: UserId) -> Result<ThreadStats> {
            self.inner.thread_stats(firm_id, user_id).await
        }
    }

    /// Classifies a message at ingestion while the batch is scoring it
    struct RacingStore {
        inner: Arc<MemoryMessageRepository>,
        case_id: CaseId,
    }

    #[async_trait]
    impl MessageRepository for RacingStore {
        async fn insert_new(&self, messages: Vec<NewMessage>) -> Result<InsertOutcome> {
            self.inner.insert_new(messages).await
        }
        async fn get(&self, firm_id: FirmId, id: MessageId) -> Result<Option<Message>> {
            self.inner.get(firm_id, id).await
        }
        async fn list_for_user(&self, firm_id: FirmId, user_id: UserId, limit: i64) -> Result<Vec<Message>> {
            self.inner.list_for_user(firm_id, user_id, limit).await
        }
        async fn list_conversation(
            &self,
            firm_id: FirmId,
            user_id: UserId,
            conversation_id: &str,
        ) -> Result<Vec<Message>> {
            let snapshot = self.inner.list_conversation(firm_id, user_id, conversation_id).await?;
            let ingested = ClassificationUpdate {
                state: ClassificationState::Classified,
                case_id: Some(self.case_id),
                client_id: None,
                confidence: Some(0.9),
                classified_by: Some(casemail_common::types::INGESTION_ACTOR.to_string()),
                classified_at: Some(Utc::now()),
            };
            for message in &snapshot {
                self.inner
                    .apply_classification(firm_id, message.id, &ingested, ApplyMode::RespectHuman)
                    .await?;
            }
            Ok(snapshot)
        }
        async fn list_unresolved(
            &self,
            firm_id: FirmId,
            after: Option<BacklogCursor>,
            limit: i64,
        ) -> Result<Vec<Message>> {
            self.inner.list_unresolved(firm_id, after, limit).await
        }
        async fn apply_classification(
            &self,
            firm_id: FirmId,
            id: MessageId,
            update: &ClassificationUpdate,
            mode: ApplyMode,
        ) -> Result<bool> {
            self.inner.apply_classification(firm_id, id, update, mode).await
        }
        async fn reset_classification(&self, firm_id: FirmId, id: MessageId) -> Result<bool> {
            self.inner.reset_classification(firm_id, id).await
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
            self.inner
                .assign_conversation(firm_id, user_id, conversation_id, case_id, client_id, linked_by)
                .await
        }
        async fn mark_conversation_read(
            &self,
            firm_id: FirmId,
            user_id: UserId,
            conversation_id: &str,
        ) -> Result<u64> {
            self.inner.mark_conversation_read(firm_id, user_id, conversation_id).await
        }
        async fn thread_stats(&self, firm_id: FirmId, user_id: UserId) -> Result<ThreadStats> {
            self.inner.thread_stats(firm_id, user_id).await
        }
    }

    struct Harness {
        firm_id: FirmId,
        user_id: UserId,
        store: Arc<MemoryMessageRepository>,
        directory: Arc<MemoryDirectoryRepository>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                firm_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                store: Arc::new(MemoryMessageRepository::new()),
                directory: Arc::new(MemoryDirectoryRepository::new()),
            }
        }

        fn reclassifier(&self, messages: Arc<dyn MessageRepository>) -> Reclassifier {
            self.reclassifier_with(
                messages,
                ReclassifyConfig {
                    concurrency: 3,
                    progress_every: 2,
                    ..ReclassifyConfig::default()
                },
            )
        }

        fn reclassifier_with(&self, messages: Arc<dyn MessageRepository>, config: ReclassifyConfig) -> Reclassifier {
            let service = Arc::new(ClassificationService::new(
                messages.clone(),
                self.directory.clone(),
                ClassificationScorer::new(ClassificationConfig::default()),
                AuditDispatcher::disabled(),
            ));
            Reclassifier::new(service, messages, config)
        }

        async fn case(&self, number: &str, contact: &str) -> CaseEntry {
            let client = ClientEntry {
                id: Uuid::new_v4(),
                firm_id: self.firm_id,
                name: number.to_string(),
                contact_addresses: vec![contact.to_string()],
            };
            let case = CaseEntry {
                id: Uuid::new_v4(),
                firm_id: self.firm_id,
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

        async fn message(&self, conversation: &str, subject: &str, from: &str, minutes: i64) -> Message {
            let outcome = self
                .store
                .insert_new(vec![NewMessage {
                    firm_id: self.firm_id,
                    user_id: self.user_id,
                    provider_message_id: Uuid::new_v4().to_string(),
                    conversation_id: conversation.to_string(),
                    internet_message_id: None,
                    in_reply_to: None,
                    reference_ids: vec![],
                    subject: Some(subject.to_string()),
                    body_preview: None,
                    from_address: Some(from.to_string()),
                    to_addresses: vec![],
                    cc_addresses: vec![],
                    bcc_addresses: vec![],
                    received_at: Utc.with_ymd_and_hms(2024, 4, 2, 10, 0, 0).unwrap()
                        + Duration::minutes(minutes),
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
    async fn test_reclassifies_and_summarizes() {
        let h = Harness::new();
        let case = h.case("MAT-1", "client@acme.com").await;
        let hit = h.message("c1", "MAT-1 filing", "client@acme.com", 0).await;
        let miss = h.message("c2", "lunch?", "friend@example.com", 1).await;

        let summary = h.reclassifier(h.store.clone()).reclassify_unresolved(h.firm_id).await.unwrap();
        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.classified, 1);
        assert_eq!(summary.uncertain, 1);
        assert_eq!(summary.errors, 0);

        let hit = h.store.get(h.firm_id, hit.id).await.unwrap().unwrap();
        assert_eq!(hit.case_id, Some(case.id));
        assert_eq!(hit.classified_by.as_deref(), Some("auto_reclassification"));
        let miss = h.store.get(h.firm_id, miss.id).await.unwrap().unwrap();
        assert_eq!(miss.state(), ClassificationState::Uncertain);
    }

    #[tokio::test]
    async fn test_thread_affinity_settles_in_one_run() {
        let h = Harness::new();
        let case = h.case("MAT-1", "client@acme.com").await;
        h.message("c1", "MAT-1 filing", "client@acme.com", 0).await;
        let reply = h.message("c1", "Re: filing", "clerk@court.gov", 5).await;

        let summary = h.reclassifier(h.store.clone()).reclassify_unresolved(h.firm_id).await.unwrap();
        assert_eq!(summary.classified, 2);
        assert_eq!(summary.uncertain, 0);

        let reply = h.store.get(h.firm_id, reply.id).await.unwrap().unwrap();
        assert_eq!(reply.case_id, Some(case.id));
        assert_eq!(reply.classification_confidence, Some(1.0));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let h = Harness::new();
        h.case("MAT-1", "client@acme.com").await;
        h.case("MAT-2", "client@acme.com").await;
        h.message("c1", "MAT-1 filing", "client@acme.com", 0).await;
        h.message("c1", "Re: filing", "clerk@court.gov", 1).await;
        h.message("c2", "question", "client@acme.com", 2).await;
        h.message("c3", "hello", "nobody@example.com", 3).await;

        let reclassifier = h.reclassifier(h.store.clone());
        reclassifier.reclassify_unresolved(h.firm_id).await.unwrap();
        let after_first = h.store.all().await;

        let second = reclassifier.reclassify_unresolved(h.firm_id).await.unwrap();
        let after_second = h.store.all().await;

        assert_eq!(after_first, after_second);
        assert_eq!(second.classified + second.client_inbox + second.uncertain, second.unchanged);
    }

    #[tokio::test]
    async fn test_classified_messages_are_not_touched() {
        let h = Harness::new();
        let case = h.case("MAT-1", "client@acme.com").await;
        let other = h.case("MAT-2", "other@acme.com").await;
        let message = h.message("c1", "MAT-1 filing", "client@acme.com", 0).await;
        h.store
            .assign_conversation(h.firm_id, h.user_id, "c1", other.id, Some(other.client_id), h.user_id)
            .await
            .unwrap();

        let summary = h.reclassifier(h.store.clone()).reclassify_unresolved(h.firm_id).await.unwrap();
        assert_eq!(summary.scanned, 0);

        let stored = h.store.get(h.firm_id, message.id).await.unwrap().unwrap();
        assert_eq!(stored.case_id, Some(other.id));
        assert_ne!(stored.case_id, Some(case.id));
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_fatal() {
        let h = Harness::new();
        h.case("MAT-1", "client@acme.com").await;
        let broken = h.message("broken", "MAT-1 filing", "client@acme.com", 0).await;
        h.message("c2", "MAT-1 status", "client@acme.com", 1).await;

        let flaky = Arc::new(FlakyStore {
            inner: h.store.clone(),
            broken_conversation: "broken".to_string(),
        });
        let summary = h.reclassifier(flaky).reclassify_unresolved(h.firm_id).await.unwrap();

        assert_eq!(summary.errors, 1);
        assert_eq!(summary.classified, 1);
        let broken = h.store.get(h.firm_id, broken.id).await.unwrap().unwrap();
        assert_eq!(broken.state(), ClassificationState::Pending);
    }

    #[tokio::test]
    async fn test_backlog_larger_than_batch_limit_is_covered() {
        let h = Harness::new();
        let case = h.case("MAT-1", "client@acme.com").await;
        h.message("c1", "lunch?", "friend@example.com", 0).await;
        h.message("c2", "coffee?", "friend@example.com", 1).await;
        let newer = h.message("c3", "MAT-1 filing", "client@acme.com", 2).await;

        let reclassifier = h.reclassifier_with(
            h.store.clone(),
            ReclassifyConfig {
                batch_limit: 1,
                ..ReclassifyConfig::default()
            },
        );
        let summary = reclassifier.reclassify_unresolved(h.firm_id).await.unwrap();

        assert_eq!(summary.scanned, 3);
        assert_eq!(summary.uncertain, 2);
        assert_eq!(summary.classified, 1);
        let newer = h.store.get(h.firm_id, newer.id).await.unwrap().unwrap();
        assert_eq!(newer.case_id, Some(case.id));
    }

    #[tokio::test]
    async fn test_message_classified_meanwhile_is_not_overwritten() {
        let h = Harness::new();
        let case = h.case("MAT-1", "client@acme.com").await;
        let message = h.message("c1", "lunch?", "friend@example.com", 0).await;

        let racing = Arc::new(RacingStore {
            inner: h.store.clone(),
            case_id: case.id,
        });
        let summary = h.reclassifier(racing).reclassify_unresolved(h.firm_id).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.uncertain, 0);
        let stored = h.store.get(h.firm_id, message.id).await.unwrap().unwrap();
        assert_eq!(stored.state(), ClassificationState::Classified);
        assert_eq!(stored.case_id, Some(case.id));
    }
}
