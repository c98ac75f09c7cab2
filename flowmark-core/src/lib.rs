//! # flowmark-core
//!
//! Transition engine for flowmark.
//!
//! This crate provides:
//! - Workflow definition parsing and validation
//! - Token matching with AND/OR semantics
//! - Transition application with fork/join cleanup
//! - Ordered lifecycle dispatch with guard veto
//! - Audit trail and pub/sub contracts
//! - Graphviz and Mermaid export

pub mod audit;
pub mod bus;
pub mod definition;
pub mod dispatch;
pub mod engine;
pub mod entity;
pub mod error;
pub mod export;
pub mod validate;

pub use audit::{AuditEntry, AuditSink, MemoryAuditTrail};
pub use bus::{EventBroadcaster, EventBus, PublishedEvent};
pub use definition::{Definition, DefinitionBuilder, DefinitionRaw, Mode, Place, StateSpec, Transition};
pub use dispatch::{EventType, Handler, HandlerRegistry, WorkflowEvent};
pub use engine::{ApplyResult, Engine};
pub use entity::{Entity, Marking, Record};
pub use error::{AuditError, CoreError, HandlerError};
pub use export::{export, ExportFormat};
pub use validate::validate;
