//! Case classification
//!
//! [`ClassificationScorer`] is a pure function from a message, its thread
//! and one firm's directory snapshot to a [`ClassificationResult`].
//! [`ClassificationService`] owns the I/O around it: loading the snapshot,
//! applying results to the message store and reporting audit events.

mod scorer;
mod service;

pub use scorer::ClassificationScorer;
pub use service::{ClassificationOutcome, ClassificationService};

use casemail_common::types::{
    normalize_address, CaseId, ClassificationActor, ClassificationState, ClientId, FirmId,
};
use casemail_common::Result;
use casemail_storage::models::{CaseEntry, ClassificationUpdate, ClientEntry, Message};
use casemail_storage::repository::DirectoryRepository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// Scorer output for one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub state: ClassificationState,
    pub confidence: f64,
    pub case_id: Option<CaseId>,
    pub client_id: Option<ClientId>,
    pub reason: String,
}

impl ClassificationResult {
    pub fn classified(case: &CaseEntry, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            state: ClassificationState::Classified,
            confidence: confidence.clamp(0.0, 1.0),
            case_id: Some(case.id),
            client_id: Some(case.client_id),
            reason: reason.into(),
        }
    }

    pub fn client_inbox(client_id: ClientId, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            state: ClassificationState::ClientInbox,
            confidence: confidence.clamp(0.0, 1.0),
            case_id: None,
            client_id: Some(client_id),
            reason: reason.into(),
        }
    }

    pub fn uncertain(confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            state: ClassificationState::Uncertain,
            confidence: confidence.clamp(0.0, 1.0),
            case_id: None,
            client_id: None,
            reason: reason.into(),
        }
    }

    /// Whether the message already carries this decision
    pub fn matches(&self, message: &Message) -> bool {
        message.state() == self.state
            && message.case_id == self.case_id
            && message.client_id == self.client_id
    }

    /// Classification fields to persist for this result
    pub fn to_update(&self, actor: ClassificationActor, now: DateTime<Utc>) -> ClassificationUpdate {
        ClassificationUpdate {
            state: self.state,
            case_id: self.case_id,
            client_id: self.client_id,
            confidence: Some(self.confidence),
            classified_by: Some(actor.to_string()),
            classified_at: Some(now),
        }
    }
}

/// An active case with its normalised address set
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub entry: CaseEntry,
    /// Case participants plus the client's contacts
    pub addresses: BTreeSet<String>,
}

/// Snapshot of one firm's active cases and clients.
///
/// Built once per scoring call (or once per batch run) and never shared
/// across firms: entries of any other firm are dropped on construction.
#[derive(Debug, Clone)]
pub struct FirmDirectory {
    firm_id: FirmId,
    candidates: Vec<Candidate>,
    clients: Vec<ClientEntry>,
    client_contacts: HashMap<ClientId, BTreeSet<String>>,
}

fn normalized_set<'a>(addresses: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
    addresses
        .into_iter()
        .map(|a| normalize_address(a))
        .filter(|a| !a.is_empty())
        .collect()
}

impl FirmDirectory {
    pub fn new(firm_id: FirmId, cases: Vec<CaseEntry>, clients: Vec<ClientEntry>) -> Self {
        let clients: Vec<ClientEntry> = clients
            .into_iter()
            .filter(|client| {
                if client.firm_id != firm_id {
                    warn!(
                        firm_id = %firm_id,
                        client_id = %client.id,
                        client_firm_id = %client.firm_id,
                        "Dropping client of another firm from directory"
                    );
                }
                client.firm_id == firm_id
            })
            .collect();

        let client_contacts: HashMap<ClientId, BTreeSet<String>> = clients
            .iter()
            .map(|c| (c.id, normalized_set(&c.contact_addresses)))
            .collect();

        let mut candidates: Vec<Candidate> = cases
            .into_iter()
            .filter(|case| {
                if case.firm_id != firm_id {
                    warn!(
                        firm_id = %firm_id,
                        case_id = %case.id,
                        case_firm_id = %case.firm_id,
                        "Dropping case of another firm from directory"
                    );
                }
                case.firm_id == firm_id && case.is_active()
            })
            .map(|entry| {
                let mut addresses = normalized_set(&entry.participant_addresses);
                if let Some(contacts) = client_contacts.get(&entry.client_id) {
                    addresses.extend(contacts.iter().cloned());
                }
                Candidate { entry, addresses }
            })
            .collect();
        candidates.sort_by(|a, b| a.entry.id.cmp(&b.entry.id));

        Self {
            firm_id,
            candidates,
            clients,
            client_contacts,
        }
    }

    /// Load the active directory of a firm
    pub async fn load(firm_id: FirmId, repo: &dyn DirectoryRepository) -> Result<Self> {
        let cases = repo.list_active_cases(firm_id).await?;
        let clients = repo.list_clients(firm_id).await?;
        Ok(Self::new(firm_id, cases, clients))
    }

    pub fn firm_id(&self) -> FirmId {
        self.firm_id
    }

    /// Active case by id
    pub fn case(&self, case_id: CaseId) -> Option<&CaseEntry> {
        self.candidates
            .iter()
            .find(|c| c.entry.id == case_id)
            .map(|c| &c.entry)
    }

    pub fn cases(&self) -> impl Iterator<Item = &CaseEntry> {
        self.candidates.iter().map(|c| &c.entry)
    }

    pub fn clients(&self) -> &[ClientEntry] {
        &self.clients
    }

    /// Number of active cases held for a client
    pub fn active_case_count(&self, client_id: ClientId) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.entry.client_id == client_id)
            .count()
    }

    pub(crate) fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Clients with at least one contact address in `addresses`
    pub(crate) fn clients_matching(&self, addresses: &BTreeSet<String>) -> Vec<ClientId> {
        let mut matched: Vec<ClientId> = self
            .client_contacts
            .iter()
            .filter(|(_, contacts)| !contacts.is_disjoint(addresses))
            .map(|(id, _)| *id)
            .collect();
        matched.sort();
        matched
    }
}
