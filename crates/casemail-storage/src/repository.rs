//! Repository layer for data access

pub mod audit;
pub mod cursors;
pub mod directory;
pub mod messages;

pub use audit::{AuditSink, DbAuditRepository};
pub use cursors::{CursorRepository, DbCursorRepository};
pub use directory::{DbDirectoryRepository, DirectoryRepository};
pub use messages::{DbMessageRepository, MessageRepository};
