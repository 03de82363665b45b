//! Casemail Common - Shared types and utilities
//!
//! This crate provides the identifiers, classification vocabulary,
//! configuration and error types shared by every Casemail component.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
