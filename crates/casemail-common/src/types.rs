//! Common types for Casemail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for firms (tenants)
pub type FirmId = Uuid;

/// Unique identifier for users (mailbox owners)
pub type UserId = Uuid;

/// Unique identifier for stored messages
pub type MessageId = Uuid;

/// Unique identifier for legal cases
pub type CaseId = Uuid;

/// Unique identifier for clients
pub type ClientId = Uuid;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// Actor tag recorded when the batch reclassifier assigns a message
pub const AUTO_RECLASSIFICATION_ACTOR: &str = "auto_reclassification";

/// Actor tag recorded when a message is scored during ingestion
pub const INGESTION_ACTOR: &str = "ingestion";

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address, accepting the `Display Name <local@domain>` form.
    ///
    /// The result is lower-cased so that addresses compare case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let bare = match (s.rfind('<'), s.rfind('>')) {
            (Some(start), Some(end)) if end > start => &s[start + 1..end],
            _ => s,
        };
        let bare = bare.trim().trim_matches('"');

        let (local, domain) = bare.rsplit_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains(char::is_whitespace) {
            return None;
        }
        Some(Self::new(local.to_lowercase(), domain.to_lowercase()))
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation(format!("Invalid email address: {}", s)))
    }
}

/// Normalize a raw address for comparison.
///
/// Parseable addresses become `local@domain` in lower case; anything else is
/// trimmed and lower-cased so that it can still be compared consistently.
pub fn normalize_address(raw: &str) -> String {
    match EmailAddress::parse(raw) {
        Some(addr) => addr.to_string(),
        None => raw.trim().to_lowercase(),
    }
}

/// Classification state of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationState {
    /// Not yet scored
    Pending,
    /// Assigned to a case
    Classified,
    /// Client known, case ambiguous
    ClientInbox,
    /// No confident match
    Uncertain,
}

impl ClassificationState {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Classified => "classified",
            Self::ClientInbox => "client_inbox",
            Self::Uncertain => "uncertain",
        }
    }

    /// States the reclassifier is allowed to revisit
    pub fn is_unresolved(&self) -> bool {
        !matches!(self, Self::Classified)
    }

    /// All unresolved states
    pub fn unresolved() -> [ClassificationState; 3] {
        [Self::Pending, Self::ClientInbox, Self::Uncertain]
    }
}

impl std::fmt::Display for ClassificationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClassificationState {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "classified" => Ok(Self::Classified),
            "client_inbox" => Ok(Self::ClientInbox),
            "uncertain" => Ok(Self::Uncertain),
            other => Err(crate::Error::Validation(format!(
                "Unknown classification state: {}",
                other
            ))),
        }
    }
}

/// Who produced a classification decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "user_id")]
pub enum ClassificationActor {
    /// A human reviewer
    User(UserId),
    /// The batch reclassifier
    AutoReclassification,
    /// Synchronous scoring during ingestion
    Ingestion,
}

impl ClassificationActor {
    /// Whether the decision was made by a person
    pub fn is_human(&self) -> bool {
        matches!(self, Self::User(_))
    }

    /// Parse the stored `classified_by` column
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            AUTO_RECLASSIFICATION_ACTOR => Some(Self::AutoReclassification),
            INGESTION_ACTOR => Some(Self::Ingestion),
            other => Uuid::parse_str(other).ok().map(Self::User),
        }
    }
}

impl std::fmt::Display for ClassificationActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "{}", id),
            Self::AutoReclassification => f.write_str(AUTO_RECLASSIFICATION_ACTOR),
            Self::Ingestion => f.write_str(INGESTION_ACTOR),
        }
    }
}

/// Case status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Active,
    Closed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

/// Message importance as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    /// Lenient parse; unknown values map to `Normal`
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Normal,
        }
    }
}

/// A mailbox to synchronise: one user inside one firm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MailboxRef {
    pub user_id: UserId,
    pub firm_id: FirmId,
}
