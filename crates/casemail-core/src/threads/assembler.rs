//! Thread assembly from stored messages

use super::subject::normalize_subject;
use casemail_common::types::{normalize_address, CaseId, FirmId, UserId};
use casemail_storage::models::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Role a participant held on at least one message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Sender,
    Recipient,
    Cc,
}

/// One address in a thread's roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadParticipant {
    pub address: String,
    pub roles: BTreeSet<ParticipantRole>,
    /// Messages this address sent
    pub sent_count: usize,
    /// Messages this address appears on in any role
    pub message_count: usize,
}

/// A conversation in one user's mailbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub conversation_id: String,
    pub user_id: UserId,
    pub firm_id: FirmId,
    pub subject: String,
    /// Oldest first
    pub messages: Vec<Message>,
    pub participants: Vec<ThreadParticipant>,
    pub has_unread: bool,
    pub has_attachments: bool,
    pub dominant_case_id: Option<CaseId>,
    pub last_activity_at: DateTime<Utc>,
}

impl Thread {
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Most recently received message
    pub fn latest(&self) -> Option<&Message> {
        self.messages.last()
    }
}

fn chronological(a: &Message, b: &Message) -> Ordering {
    a.received_at.cmp(&b.received_at).then_with(|| a.id.cmp(&b.id))
}

/// Partition messages into threads keyed by owner and conversation id.
///
/// Every input message lands in exactly one thread. Threads are returned
/// newest activity first.
pub fn group_into_threads(messages: Vec<Message>) -> Vec<Thread> {
    let mut groups: HashMap<(UserId, String), Vec<Message>> = HashMap::new();
    for message in messages {
        groups
            .entry((message.user_id, message.conversation_id.clone()))
            .or_default()
            .push(message);
    }

    let mut threads: Vec<Thread> = groups.into_values().filter_map(build_thread).collect();
    threads.sort_by(|a, b| {
        b.last_activity_at
            .cmp(&a.last_activity_at)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    threads
}

/// Build one thread from messages that share a conversation.
///
/// Returns `None` for an empty input.
pub fn build_thread(mut messages: Vec<Message>) -> Option<Thread> {
    messages.sort_by(chronological);
    let first = messages.first()?;
    let last = messages.last()?;

    let conversation_id = first.conversation_id.clone();
    let user_id = first.user_id;
    let firm_id = first.firm_id;
    let subject = normalize_subject(first.subject.as_deref());
    let last_activity_at = last.received_at;

    Some(Thread {
        participants: participants(&messages),
        has_unread: messages.iter().any(|m| !m.is_read),
        has_attachments: messages.iter().any(|m| m.has_attachments),
        dominant_case_id: dominant_case(&messages),
        conversation_id,
        user_id,
        firm_id,
        subject,
        last_activity_at,
        messages,
    })
}

fn participants(messages: &[Message]) -> Vec<ThreadParticipant> {
    let mut roster: BTreeMap<String, ThreadParticipant> = BTreeMap::new();

    for message in messages {
        let mut on_message: BTreeSet<String> = BTreeSet::new();
        let roles = message
            .from_address
            .iter()
            .map(|a| (a, ParticipantRole::Sender))
            .chain(message.to_addresses.iter().map(|a| (a, ParticipantRole::Recipient)))
            .chain(message.cc_addresses.iter().map(|a| (a, ParticipantRole::Cc)));

        for (raw, role) in roles {
            let address = normalize_address(raw);
            if address.is_empty() {
                continue;
            }
            let entry = roster.entry(address.clone()).or_insert_with(|| ThreadParticipant {
                address: address.clone(),
                roles: BTreeSet::new(),
                sent_count: 0,
                message_count: 0,
            });
            entry.roles.insert(role);
            if role == ParticipantRole::Sender {
                entry.sent_count += 1;
            }
            if on_message.insert(address) {
                entry.message_count += 1;
            }
        }
    }

    roster.into_values().collect()
}

/// Most frequent case across the messages.
///
/// Ties go to the case seen on the most recent message, then to the lowest
/// case id. `messages` must be in chronological order.
pub fn dominant_case(messages: &[Message]) -> Option<CaseId> {
    // case -> (count, index of latest message carrying it)
    let mut tally: HashMap<CaseId, (usize, usize)> = HashMap::new();
    for (index, case_id) in messages
        .iter()
        .enumerate()
        .filter_map(|(i, m)| m.case_id.map(|c| (i, c)))
    {
        let entry = tally.entry(case_id).or_insert((0, index));
        entry.0 += 1;
        entry.1 = index;
    }

    tally
        .into_iter()
        .max_by(|(case_a, (count_a, seen_a)), (case_b, (count_b, seen_b))| {
            count_a
                .cmp(count_b)
                .then_with(|| seen_a.cmp(seen_b))
                .then_with(|| case_b.cmp(case_a))
        })
        .map(|(case_id, _)| case_id)
}
