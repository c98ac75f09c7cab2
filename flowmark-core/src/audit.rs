//! Audit trail contract.
//!
//! The engine writes one [`AuditEntry`] per lifecycle phase through an
//! [`AuditSink`]. Entries are keyed by `(workflow name, entity id)` and kept
//! in append order.

use crate::definition::StateSpec;
use crate::dispatch::EventType;
use crate::error::AuditError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A single recorded lifecycle phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub entity_id: String,
    pub event_type: EventType,
    pub transition: String,
    /// Token set before the transition.
    pub from_state: Vec<String>,
    /// Target spec of the transition.
    pub to_state: StateSpec,
    #[serde(default)]
    pub metadata: Value,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

impl AuditEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(
        entity_id: impl Into<String>,
        event_type: EventType,
        transition: impl Into<String>,
        from_state: Vec<String>,
        to_state: StateSpec,
        metadata: Value,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            event_type,
            transition: transition.into(),
            from_state,
            to_state,
            metadata,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Durable, append-only history of lifecycle phases.
pub trait AuditSink: Send + Sync {
    /// Appends `entry`; does nothing when `enabled` is false.
    fn log_event(&self, workflow: &str, entry: AuditEntry, enabled: bool)
        -> Result<(), AuditError>;

    /// Returns the entries for an entity in append order, or empty.
    fn history(&self, workflow: &str, entity_id: &str) -> Result<Vec<AuditEntry>, AuditError>;

    /// Deletes the history of an entity.
    fn clear_history(&self, workflow: &str, entity_id: &str) -> Result<(), AuditError>;
}

/// Audit trail kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryAuditTrail {
    entries: RwLock<HashMap<(String, String), Vec<AuditEntry>>>,
}

impl MemoryAuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across all entities.
    pub fn len(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditTrail {
    fn log_event(
        &self,
        workflow: &str,
        entry: AuditEntry,
        enabled: bool,
    ) -> Result<(), AuditError> {
        if !enabled {
            return Ok(());
        }
        self.entries
            .write()
            .entry((workflow.to_string(), entry.entity_id.clone()))
            .or_default()
            .push(entry);
        Ok(())
    }

    fn history(&self, workflow: &str, entity_id: &str) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self
            .entries
            .read()
            .get(&(workflow.to_string(), entity_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn clear_history(&self, workflow: &str, entity_id: &str) -> Result<(), AuditError> {
        self.entries
            .write()
            .remove(&(workflow.to_string(), entity_id.to_string()));
        Ok(())
    }
}
