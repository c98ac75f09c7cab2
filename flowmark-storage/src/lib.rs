//! # flowmark-storage
//!
//! Storage layer for flowmark.
//!
//! This crate provides:
//! - Workflow definition loading from JSON/YAML files
//! - File-backed audit trail

pub mod audit;
pub mod error;
pub mod loader;

pub use audit::{audit_file_name, kebab_case, FileAuditTrail};
pub use error::StorageError;
pub use loader::{DefinitionLoader, DocumentFormat};
