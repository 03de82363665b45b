//! Casemail Storage - Database abstraction
//!
//! This crate provides the persistent models and the repository traits the
//! core consumes (message store, case directory, sync cursors, audit log),
//! with PostgreSQL and in-memory implementations.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::{Database, DatabasePool};
pub use models::*;
pub use repository::*;
