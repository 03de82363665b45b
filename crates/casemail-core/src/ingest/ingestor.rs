//! Delta Ingestor - incremental mailbox synchronisation

use super::normalize::normalize_page;
use super::provider::MailProvider;
use crate::classify::ClassificationService;
use casemail_common::config::IngestConfig;
use casemail_common::types::{ClassificationActor, ClassificationState, MailboxRef, UserId};
use casemail_common::Result;
use casemail_storage::models::{ApplyMode, Message};
use casemail_storage::repository::{CursorRepository, MessageRepository};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Counters for one sync call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub pages: u32,
    /// Messages reported by the provider, removed ones included
    pub fetched: usize,
    pub removed: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub classified: usize,
    pub client_inbox: usize,
    pub uncertain: usize,
    pub classification_errors: usize,
    /// Cursor stored at the end of the call
    pub cursor: Option<String>,
}

impl SyncOutcome {
    fn absorb(&mut self, page: SyncOutcome) {
        self.pages += page.pages;
        self.fetched += page.fetched;
        self.removed += page.removed;
        self.inserted += page.inserted;
        self.duplicates += page.duplicates;
        self.classified += page.classified;
        self.client_inbox += page.client_inbox;
        self.uncertain += page.uncertain;
        self.classification_errors += page.classification_errors;
        self.cursor = page.cursor;
    }
}

/// Pulls mailbox changes from the provider into the message store
pub struct DeltaIngestor {
    provider: Arc<dyn MailProvider>,
    messages: Arc<dyn MessageRepository>,
    cursors: Arc<dyn CursorRepository>,
    classifier: Option<Arc<ClassificationService>>,
    config: IngestConfig,
    mailbox_locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl DeltaIngestor {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        messages: Arc<dyn MessageRepository>,
        cursors: Arc<dyn CursorRepository>,
        config: IngestConfig,
    ) -> Self {
        Self {
            provider,
            messages,
            cursors,
            classifier: None,
            config,
            mailbox_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Score newly stored messages as they arrive
    pub fn with_classifier(mut self, classifier: Arc<ClassificationService>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    async fn mailbox_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.mailbox_locks.lock().await;
        locks.entry(user_id).or_default().clone()
    }

    /// Drop the map entry once no other sync holds or waits on it
    async fn release_mailbox_lock(&self, user_id: UserId, lock: Arc<Mutex<()>>) {
        let mut locks = self.mailbox_locks.lock().await;
        drop(lock);
        if locks.get(&user_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&user_id);
        }
    }

    /// Fetch and store one delta page
    pub async fn sync_mailbox(&self, mailbox: MailboxRef) -> Result<SyncOutcome> {
        let lock = self.mailbox_lock(mailbox.user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.sync_page(mailbox).await.map(|(outcome, _)| outcome).map_err(|e| {
                error!(user_id = %mailbox.user_id, "Mailbox sync aborted: {}", e);
                e
            })
        };
        self.release_mailbox_lock(mailbox.user_id, lock).await;
        result
    }

    /// Fetch pages until the provider has nothing new, bounded by `max_pages_per_run`
    pub async fn sync_until_caught_up(&self, mailbox: MailboxRef) -> Result<SyncOutcome> {
        let lock = self.mailbox_lock(mailbox.user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.catch_up(mailbox).await
        };
        self.release_mailbox_lock(mailbox.user_id, lock).await;
        result
    }

    async fn catch_up(&self, mailbox: MailboxRef) -> Result<SyncOutcome> {
        let mut total = SyncOutcome::default();
        while total.pages < self.config.max_pages_per_run.max(1) {
            let (page, advanced) = self.sync_page(mailbox).await.map_err(|e| {
                error!(
                    user_id = %mailbox.user_id,
                    pages = total.pages,
                    "Mailbox sync aborted: {}",
                    e
                );
                e
            })?;
            let empty = page.fetched == 0;
            total.absorb(page);
            if empty || !advanced {
                break;
            }
        }

        info!(
            user_id = %mailbox.user_id,
            pages = total.pages,
            inserted = total.inserted,
            duplicates = total.duplicates,
            classification_errors = total.classification_errors,
            "Mailbox sync finished"
        );
        Ok(total)
    }

    /// One fetch-store-advance step. Returns whether the cursor moved.
    async fn sync_page(&self, mailbox: MailboxRef) -> Result<(SyncOutcome, bool)> {
        let stored = self.cursors.load(mailbox.user_id).await?;
        let cursor = stored.map(|c| c.cursor);

        // errors here leave the stored cursor untouched
        let page = self
            .provider
            .fetch_delta(mailbox.user_id, cursor.as_deref())
            .await?;

        let mut outcome = SyncOutcome {
            pages: 1,
            fetched: page.messages.len(),
            cursor: cursor.clone(),
            ..SyncOutcome::default()
        };

        let normalized = normalize_page(mailbox, page.messages);
        outcome.removed = outcome.fetched - normalized.len();

        let inserted = if normalized.is_empty() {
            Vec::new()
        } else {
            let result = self.messages.insert_new(normalized).await?;
            outcome.duplicates = result.duplicates;
            result.inserted
        };
        outcome.inserted = inserted.len();

        let advanced = match page.next_cursor {
            Some(next) if Some(&next) != cursor.as_ref() => {
                self.cursors
                    .save(mailbox.user_id, mailbox.firm_id, &next)
                    .await?;
                outcome.cursor = Some(next);
                true
            }
            _ => false,
        };

        debug!(
            user_id = %mailbox.user_id,
            fetched = outcome.fetched,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            advanced,
            "Delta page stored"
        );

        if let Some(classifier) = &self.classifier {
            if self.config.classify_on_ingest && !inserted.is_empty() {
                self.classify_inserted(classifier, mailbox, inserted, &mut outcome)
                    .await;
            }
        }

        Ok((outcome, advanced))
    }

    async fn classify_inserted(
        &self,
        classifier: &ClassificationService,
        mailbox: MailboxRef,
        mut inserted: Vec<Message>,
        outcome: &mut SyncOutcome,
    ) {
        let directory = match classifier.load_directory(mailbox.firm_id).await {
            Ok(directory) => directory,
            Err(e) => {
                warn!(
                    firm_id = %mailbox.firm_id,
                    "Skipping classification on ingest, directory unavailable: {}",
                    e
                );
                outcome.classification_errors += inserted.len();
                return;
            }
        };

        // oldest first so replies see their thread's earlier decisions
        inserted.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));
        for message in &inserted {
            match classifier
                .classify_with_directory(
                    message,
                    &directory,
                    ClassificationActor::Ingestion,
                    ApplyMode::RespectHuman,
                )
                .await
            {
                Ok(result) => match result.result.state {
                    ClassificationState::Classified => outcome.classified += 1,
                    ClassificationState::ClientInbox => outcome.client_inbox += 1,
                    ClassificationState::Uncertain => outcome.uncertain += 1,
                    ClassificationState::Pending => {}
                },
                Err(e) => {
                    warn!(message_id = %message.id, "Classification on ingest failed: {}", e);
                    outcome.classification_errors += 1;
                }
            }
        }
    }
}
