//! Mailbox ingestion
//!
//! The provider is polled with an opaque delta cursor. Pages are normalised,
//! stored with skip-duplicates semantics, and the cursor only advances once
//! the page is safely stored.

mod ingestor;
mod normalize;
mod provider;

pub use ingestor::{DeltaIngestor, SyncOutcome};
pub use normalize::{normalize_message, normalize_page};
pub use provider::{calculate_backoff, DeltaPage, HttpMailProvider, MailProvider, ProviderMessage};
