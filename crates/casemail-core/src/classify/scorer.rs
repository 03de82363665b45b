//! Multi-signal case scorer

use super::{Candidate, ClassificationResult, FirmDirectory};
use casemail_common::config::ClassificationConfig;
use casemail_common::types::{CaseId, ClassificationState};
use casemail_common::{Error, Result};
use casemail_storage::models::Message;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::debug;

/// Tolerance when comparing weighted sums for ties
const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
struct CaseScore<'a> {
    candidate: &'a Candidate,
    identifier: bool,
    overlap: usize,
    /// Weighted identifier + participant score
    base: f64,
    /// Tie-break boost, only non-zero among cases tied at the top
    recency: f64,
}

impl CaseScore<'_> {
    fn rank(&self, other: &Self) -> Ordering {
        // best first
        other
            .base
            .partial_cmp(&self.base)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                other
                    .recency
                    .partial_cmp(&self.recency)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| {
                other
                    .candidate
                    .entry
                    .last_activity_at
                    .cmp(&self.candidate.entry.last_activity_at)
            })
            .then_with(|| self.candidate.entry.id.cmp(&other.candidate.entry.id))
    }
}

/// Scores one message against a firm's directory
#[derive(Debug, Clone)]
pub struct ClassificationScorer {
    config: ClassificationConfig,
}

impl ClassificationScorer {
    pub fn new(config: ClassificationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassificationConfig {
        &self.config
    }

    /// Classify `message` given the other messages of its conversation.
    ///
    /// Pure and deterministic for a given input. Fails only when the message
    /// does not belong to the directory's firm.
    pub fn classify(
        &self,
        message: &Message,
        thread: &[Message],
        directory: &FirmDirectory,
    ) -> Result<ClassificationResult> {
        if message.firm_id != directory.firm_id() {
            return Err(Error::FirmMismatch {
                entity: format!("message {}", message.id),
                expected: directory.firm_id(),
                actual: message.firm_id,
            });
        }

        if let Some(result) = self.thread_affinity(message, thread, directory) {
            return Ok(result);
        }

        let addresses: BTreeSet<String> = message.participant_addresses().into_iter().collect();
        let text = searchable_text(message);

        let mut scores: Vec<CaseScore> = directory
            .candidates()
            .iter()
            .map(|candidate| self.score_case(candidate, &addresses, &text))
            .collect();
        self.apply_recency(message, &mut scores);
        scores.sort_by(|a, b| a.rank(b));

        let top = scores.first().filter(|s| s.base > 0.0);
        let top_score = top.map(|s| s.base).unwrap_or(0.0);

        if let Some(best) = top {
            if best.base + SCORE_EPSILON >= self.config.classify_threshold {
                return Ok(ClassificationResult::classified(
                    &best.candidate.entry,
                    best.base,
                    describe_match(best),
                ));
            }
        }

        let clients = directory.clients_matching(&addresses);
        if let [client_id] = clients.as_slice() {
            let active = directory.active_case_count(*client_id);
            if active > 1 {
                return Ok(ClassificationResult::client_inbox(
                    *client_id,
                    top_score,
                    format!("client has {} active cases and none matched confidently", active),
                ));
            }
        }

        if top_score < self.config.floor_threshold {
            debug!(message_id = %message.id, top_score, "No confident match");
            return Ok(ClassificationResult::uncertain(top_score, "no confident match"));
        }

        Ok(ClassificationResult::uncertain(
            top_score,
            format!(
                "best match scored {:.2}, below classify threshold {:.2}",
                top_score, self.config.classify_threshold
            ),
        ))
    }

    /// Case of the latest classified message earlier in the conversation
    fn thread_affinity(
        &self,
        message: &Message,
        thread: &[Message],
        directory: &FirmDirectory,
    ) -> Option<ClassificationResult> {
        let mut prior: Vec<&Message> = thread
            .iter()
            .filter(|m| {
                m.id != message.id
                    && m.received_at <= message.received_at
                    && m.firm_id == message.firm_id
                    && m.user_id == message.user_id
                    && m.conversation_id == message.conversation_id
                    && m.state() == ClassificationState::Classified
                    && m.case_id.is_some()
            })
            .collect();
        prior.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        for source in prior {
            let case_id: CaseId = source.case_id?;
            match directory.case(case_id) {
                Some(case) => {
                    return Some(ClassificationResult::classified(
                        case,
                        1.0,
                        format!("thread affinity with message {}", source.id),
                    ));
                }
                None => {
                    debug!(
                        message_id = %message.id,
                        case_id = %case_id,
                        "Thread case is not an active case of this firm, skipping"
                    );
                }
            }
        }
        None
    }

    fn score_case<'a>(
        &self,
        candidate: &'a Candidate,
        addresses: &BTreeSet<String>,
        text: &str,
    ) -> CaseScore<'a> {
        let identifier = contains_token(text, &candidate.entry.case_number);
        let overlap = addresses.intersection(&candidate.addresses).count();
        let participant = participant_signal(overlap);

        let weights = &self.config.weights;
        let identifier_score = if identifier { 1.0 } else { 0.0 };
        let base = (weights.identifier * identifier_score + weights.participant * participant)
            .clamp(0.0, 1.0);

        CaseScore {
            candidate,
            identifier,
            overlap,
            base,
            recency: 0.0,
        }
    }

    /// Boost cases tied for the best score by how recently they were active
    fn apply_recency(&self, message: &Message, scores: &mut [CaseScore]) {
        let best = scores.iter().map(|s| s.base).fold(0.0_f64, f64::max);
        if best <= 0.0 {
            return;
        }

        let tied = scores
            .iter()
            .filter(|s| (s.base - best).abs() < SCORE_EPSILON)
            .count();
        if tied < 2 {
            return;
        }

        let half_life = self.config.recency_half_life_days.max(f64::EPSILON);
        for score in scores
            .iter_mut()
            .filter(|s| (s.base - best).abs() < SCORE_EPSILON)
        {
            if let Some(last_activity) = score.candidate.entry.last_activity_at {
                let age_days =
                    ((message.received_at - last_activity).num_seconds() as f64 / 86_400.0).max(0.0);
                score.recency = self.config.weights.recency / (1.0 + age_days / half_life);
            }
        }
    }
}

/// Grows with each shared address and saturates at 1.0. The message's
/// own recipient count does not dilute it.
fn participant_signal(overlap: usize) -> f64 {
    let shared = i32::try_from(overlap).unwrap_or(i32::MAX);
    1.0 - 0.5_f64.powi(shared)
}

fn searchable_text(message: &Message) -> String {
    let mut text = message.subject.clone().unwrap_or_default();
    if let Some(body) = &message.body_preview {
        text.push('\n');
        text.push_str(body);
    }
    text
}

fn describe_match(score: &CaseScore) -> String {
    let case_number = &score.candidate.entry.case_number;
    match (score.identifier, score.overlap) {
        (true, 0) => format!("case number {} found", case_number),
        (true, n) => format!("case number {} found and {} participant(s) matched", case_number, n),
        (false, n) => format!("{} participant(s) matched case {}", n, case_number),
    }
}

/// Case-insensitive search for `token` delimited by non-alphanumeric text
fn contains_token(haystack: &str, token: &str) -> bool {
    let token = token.trim().to_lowercase();
    if token.is_empty() {
        return false;
    }
    let haystack = haystack.to_lowercase();

    haystack.match_indices(&token).any(|(start, _)| {
        let end = start + token.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.map(char::is_alphanumeric).unwrap_or(false)
            && !after.map(char::is_alphanumeric).unwrap_or(false)
    })
}
