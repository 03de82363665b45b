//! Casemail Core - mailbox ingestion, threading and case classification
//!
//! This crate pulls mail from the provider incrementally, assembles it into
//! conversation threads, and assigns each message to the legal case it
//! belongs to (or holds it for review when no confident match exists).

pub mod audit;
pub mod classify;
pub mod ingest;
pub mod reclassify;
pub mod threads;

pub use audit::{AuditDispatcher, WebhookAuditSink};
pub use classify::{ClassificationOutcome, ClassificationResult, ClassificationScorer, ClassificationService, FirmDirectory};
pub use ingest::{DeltaIngestor, DeltaPage, HttpMailProvider, MailProvider, ProviderMessage, SyncOutcome};
pub use reclassify::{Reclassifier, ReclassifySummary};
pub use threads::{group_into_threads, normalize_subject, Thread, ThreadParticipant, ThreadService};
