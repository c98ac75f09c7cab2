//! Caller-owned entities and the markings stored in their state field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The value held in an entity's state field.
///
/// Single-state definitions store one place id; multi-state definitions store
/// an ordered, duplicate-free list of tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Marking {
    Single(String),
    Multi(Vec<String>),
}

impl Marking {
    /// Returns the marking as a token list, wrapping a scalar state.
    pub fn tokens(&self) -> Vec<String> {
        match self {
            Marking::Single(state) => vec![state.clone()],
            Marking::Multi(tokens) => tokens.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Marking::Single(state) => state.is_empty(),
            Marking::Multi(tokens) => tokens.is_empty(),
        }
    }

    pub fn contains(&self, place: &str) -> bool {
        match self {
            Marking::Single(state) => state == place,
            Marking::Multi(tokens) => tokens.iter().any(|t| t == place),
        }
    }
}

impl From<&str> for Marking {
    fn from(s: &str) -> Self {
        Marking::Single(s.to_string())
    }
}

impl From<Vec<String>> for Marking {
    fn from(tokens: Vec<String>) -> Self {
        Marking::Multi(tokens)
    }
}

impl From<Marking> for Value {
    fn from(marking: Marking) -> Self {
        match marking {
            Marking::Single(state) => Value::String(state),
            Marking::Multi(tokens) => Value::Array(tokens.into_iter().map(Value::String).collect()),
        }
    }
}

/// A record whose state field the engine drives.
///
/// The engine never owns entities; it reads and writes the named field only.
pub trait Entity {
    /// Identifier used to key the audit trail.
    fn id(&self) -> String;

    /// Reads the marking stored under `field`, if any.
    fn marking(&self, field: &str) -> Option<Marking>;

    /// Overwrites the marking stored under `field`.
    fn set_marking(&mut self, field: &str, marking: Marking);
}

/// JSON objects are entities: `id` is read from the `"id"` key (string or
/// number) and the state field holds a string or an array of strings.
impl Entity for Value {
    fn id(&self) -> String {
        match self.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    fn marking(&self, field: &str) -> Option<Marking> {
        match self.get(field)? {
            Value::String(s) => Some(Marking::Single(s.clone())),
            Value::Array(items) => {
                let tokens: Vec<String> = items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                if tokens.len() != items.len() {
                    tracing::warn!(
                        entity = %self.id(),
                        field,
                        dropped = items.len() - tokens.len(),
                        "ignoring non-string tokens in state field"
                    );
                }
                Some(Marking::Multi(tokens))
            }
            _ => None,
        }
    }

    fn set_marking(&mut self, field: &str, marking: Marking) {
        // Non-object values cannot carry fields; they become an object.
        if !self.is_object() {
            *self = Value::Object(Map::new());
        }
        if let Value::Object(map) = self {
            map.insert(field.to_string(), marking.into());
        }
    }
}

/// A minimal owned entity for callers without their own record type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unique entity ID.
    pub id: String,

    /// State fields by name.
    pub fields: HashMap<String, Marking>,

    /// Creation timestamp (Unix millis).
    pub created_at: i64,

    /// Last marking update timestamp (Unix millis).
    pub updated_at: i64,
}

impl Record {
    /// Creates a record with no state fields set.
    pub fn new(id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: id.into(),
            fields: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a record with `field` already holding `marking`.
    pub fn with_marking(id: impl Into<String>, field: &str, marking: impl Into<Marking>) -> Self {
        let mut record = Self::new(id);
        record.fields.insert(field.to_string(), marking.into());
        record
    }
}

impl Entity for Record {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn marking(&self, field: &str) -> Option<Marking> {
        self.fields.get(field).cloned()
    }

    fn set_marking(&mut self, field: &str, marking: Marking) {
        self.fields.insert(field.to_string(), marking);
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}
