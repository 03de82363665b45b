//! Periodic sync + reclassification cycle

use casemail_common::types::{FirmId, MailboxRef};
use casemail_core::{DeltaIngestor, Reclassifier};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info};

/// Totals for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub mailboxes_synced: usize,
    pub sync_failures: usize,
    pub messages_inserted: usize,
    pub firms_reclassified: usize,
    pub reclassify_failures: usize,
}

pub struct Worker {
    ingestor: Arc<DeltaIngestor>,
    reclassifier: Arc<Reclassifier>,
    mailboxes: Vec<MailboxRef>,
}

impl Worker {
    pub fn new(
        ingestor: Arc<DeltaIngestor>,
        reclassifier: Arc<Reclassifier>,
        mailboxes: Vec<MailboxRef>,
    ) -> Self {
        Self {
            ingestor,
            reclassifier,
            mailboxes,
        }
    }

    /// Firms owning at least one configured mailbox, in stable order
    fn firms(&self) -> BTreeSet<FirmId> {
        self.mailboxes.iter().map(|m| m.firm_id).collect()
    }

    /// Catch every mailbox up, then reclassify each firm's unresolved mail.
    ///
    /// A failing mailbox or firm is logged and counted; the rest of the
    /// cycle still runs.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let handles: Vec<_> = self
            .mailboxes
            .iter()
            .map(|&mailbox| {
                let ingestor = self.ingestor.clone();
                tokio::spawn(async move { (mailbox, ingestor.sync_until_caught_up(mailbox).await) })
            })
            .collect();

        for handle in handles {
            match handle.await {
                Ok((_, Ok(outcome))) => {
                    report.mailboxes_synced += 1;
                    report.messages_inserted += outcome.inserted;
                }
                Ok((mailbox, Err(e))) => {
                    report.sync_failures += 1;
                    error!(user_id = %mailbox.user_id, "Mailbox sync failed: {}", e);
                }
                Err(e) => {
                    report.sync_failures += 1;
                    error!("Sync task panicked: {}", e);
                }
            }
        }

        for firm_id in self.firms() {
            match self.reclassifier.reclassify_unresolved(firm_id).await {
                Ok(summary) => {
                    report.firms_reclassified += 1;
                    info!(
                        firm_id = %firm_id,
                        classified = summary.classified,
                        client_inbox = summary.client_inbox,
                        uncertain = summary.uncertain,
                        errors = summary.errors,
                        "Reclassification finished"
                    );
                }
                Err(e) => {
                    report.reclassify_failures += 1;
                    error!(firm_id = %firm_id, "Reclassification failed: {}", e);
                }
            }
        }

        info!(
            synced = report.mailboxes_synced,
            sync_failures = report.sync_failures,
            inserted = report.messages_inserted,
            firms = report.firms_reclassified,
            "Worker cycle complete"
        );
        report
    }
}
