//! Batch reclassification
//!
//! Unresolved messages are re-scored as the directory and persisted thread
//! assignments change. Runs are safe to repeat.

mod runner;

pub use runner::{Reclassifier, ReclassifySummary};
