//! Workflow definition types.
//!
//! Definitions use a JSON or YAML document:
//!
//! ```json
//! {
//!   "name": "article",
//!   "type": "workflow",
//!   "auditTrail": {"enabled": true},
//!   "stateField": "state",
//!   "initialState": ["draft"],
//!   "places": {"draft": {}, "review": {}, "published": {}},
//!   "transitions": {
//!     "submit": {"from": "draft", "to": "review"},
//!     "publish": {"from": "review", "to": "published"}
//!   },
//!   "events": {"GUARD": ["require_editor"]}
//! }
//! ```
//!
//! Places and transitions keep document order.

use crate::dispatch::EventType;
use crate::entity::Marking;
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// How many places an entity may occupy at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    /// Exactly one active place (finite-state machine).
    #[serde(rename = "state_machine")]
    SingleState,
    /// Any number of active places (tokens).
    #[default]
    #[serde(rename = "workflow")]
    MultiState,
}

/// A single place id or an ordered set of place ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateSpec {
    One(String),
    Many(Vec<String>),
}

impl StateSpec {
    /// Returns the referenced place ids in order.
    pub fn ids(&self) -> &[String] {
        match self {
            StateSpec::One(id) => std::slice::from_ref(id),
            StateSpec::Many(ids) => ids,
        }
    }

    /// Returns true if more than one place is referenced.
    pub fn is_multi(&self) -> bool {
        self.ids().len() > 1
    }

    pub fn first(&self) -> Option<&str> {
        self.ids().first().map(String::as_str)
    }

    /// Returns true if the current token set satisfies this spec as a source.
    ///
    /// A scalar or a one-element list is a membership test; a list of two or
    /// more ids requires every id to be present. An empty list never matches.
    pub fn matches(&self, current: &[String]) -> bool {
        match self {
            StateSpec::One(id) => current.contains(id),
            StateSpec::Many(ids) if ids.len() > 1 => ids.iter().all(|id| current.contains(id)),
            StateSpec::Many(ids) => ids.iter().any(|id| current.contains(id)),
        }
    }
}

impl From<&str> for StateSpec {
    fn from(s: &str) -> Self {
        StateSpec::One(s.to_string())
    }
}

impl From<Vec<&str>> for StateSpec {
    fn from(ids: Vec<&str>) -> Self {
        StateSpec::Many(ids.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for StateSpec {
    fn from(ids: Vec<String>) -> Self {
        StateSpec::Many(ids)
    }
}

/// A place in the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Place {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// A named edge between place sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Source place(s).
    pub from: StateSpec,

    /// Target place(s). More than one id is a fork.
    pub to: StateSpec,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl Transition {
    pub fn new(from: impl Into<StateSpec>, to: impl Into<StateSpec>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            metadata: Value::Null,
        }
    }
}

/// `auditTrail` accepts a bare boolean or `{enabled: bool}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuditTrailSetting {
    Flag(bool),
    Config { enabled: bool },
}

impl AuditTrailSetting {
    pub fn enabled(&self) -> bool {
        match self {
            AuditTrailSetting::Flag(enabled) => *enabled,
            AuditTrailSetting::Config { enabled } => *enabled,
        }
    }
}

impl Default for AuditTrailSetting {
    fn default() -> Self {
        AuditTrailSetting::Flag(false)
    }
}

fn default_state_field() -> String {
    "state".to_string()
}

/// Raw definition document as loaded/transmitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionRaw {
    /// Workflow name, also the audit trail key.
    pub name: String,

    /// `state_machine` or `workflow`.
    #[serde(default, rename = "type")]
    pub mode: Mode,

    #[serde(default)]
    pub audit_trail: AuditTrailSetting,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,

    #[serde(default = "default_state_field")]
    pub state_field: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<StateSpec>,

    #[serde(default, with = "ordered")]
    pub places: Vec<(String, Place)>,

    #[serde(default, with = "ordered")]
    pub transitions: Vec<(String, Transition)>,

    /// Handler names per lifecycle phase, resolved when an engine is built.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub events: BTreeMap<EventType, Vec<String>>,
}

impl DefinitionRaw {
    pub fn from_json_str(s: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, CoreError> {
        Ok(serde_yaml::from_str(s)?)
    }
}

/// Serde adapter that keeps map entries in document order.
mod ordered {
    use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
    use serde::ser::{Serialize, SerializeMap, Serializer};
    use std::fmt;
    use std::marker::PhantomData;

    pub fn serialize<S, T>(entries: &[(String, T)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        struct OrderedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
            type Value = Vec<(String, T)>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map keyed by id")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Vec::new())
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, T>()? {
                    entries.push((key, value));
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

/// Validated and indexed workflow definition. Immutable once built.
#[derive(Debug, Clone)]
pub struct Definition {
    /// Workflow name.
    pub name: String,

    pub mode: Mode,

    /// Entity field holding the marking.
    pub state_field: String,

    /// Whether lifecycle phases are written to the audit trail.
    pub audit_enabled: bool,

    metadata: Value,
    initial_states: Option<StateSpec>,
    places: Vec<(String, Place)>,
    place_index: HashMap<String, usize>,
    transitions: Vec<(String, Transition)>,
    transition_index: HashMap<String, usize>,
    declared_handlers: BTreeMap<EventType, Vec<String>>,

    /// Document the definition was built from.
    raw: DefinitionRaw,

    /// Hash of the raw definition for integrity checks.
    pub checksum: String,
}

impl Definition {
    /// Parses and validates a definition from a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self, CoreError> {
        Self::from_raw(DefinitionRaw::from_json_str(s)?)
    }

    /// Parses and validates a definition from a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self, CoreError> {
        Self::from_raw(DefinitionRaw::from_yaml_str(s)?)
    }

    /// Builds a definition: places first, then transitions (back-filling
    /// undeclared endpoints), then the explicit initial states.
    pub fn from_raw(raw: DefinitionRaw) -> Result<Self, CoreError> {
        let mut definition = Self {
            name: raw.name.clone(),
            mode: raw.mode,
            state_field: raw.state_field.clone(),
            audit_enabled: raw.audit_trail.enabled(),
            metadata: raw.metadata.clone(),
            initial_states: None,
            places: Vec::with_capacity(raw.places.len()),
            place_index: HashMap::new(),
            transitions: Vec::with_capacity(raw.transitions.len()),
            transition_index: HashMap::new(),
            declared_handlers: raw.events.clone(),
            raw: raw.clone(),
            checksum: String::new(),
        };

        for (id, place) in &raw.places {
            if definition.place_index.contains_key(id) {
                return Err(CoreError::invalid(format!("duplicate place '{}'", id)));
            }
            definition.add_place(id, place.clone());
        }

        for (id, transition) in &raw.transitions {
            definition.add_transition(id, transition.clone())?;
        }

        if let Some(initial) = &raw.initial_state {
            definition.set_initial_states(initial.clone())?;
        }

        let json_bytes = serde_json::to_vec(&raw)?;
        definition.checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        tracing::debug!(
            workflow = %definition.name,
            places = definition.places.len(),
            transitions = definition.transitions.len(),
            "definition built"
        );

        Ok(definition)
    }

    /// Registers a place, replacing the metadata of an existing one.
    fn add_place(&mut self, id: &str, place: Place) {
        match self.place_index.get(id) {
            Some(&idx) => self.places[idx].1 = place,
            None => {
                self.place_index.insert(id.to_string(), self.places.len());
                self.places.push((id.to_string(), place));
            }
        }
    }

    /// Registers a transition, auto-registering missing endpoints as bare places.
    fn add_transition(&mut self, id: &str, transition: Transition) -> Result<(), CoreError> {
        if self.transition_index.contains_key(id) {
            return Err(CoreError::invalid(format!("duplicate transition '{}'", id)));
        }

        if self.mode == Mode::SingleState {
            if transition.from.is_multi() {
                return Err(CoreError::invalid(format!(
                    "transition '{}' has multiple source places, not allowed in a state machine",
                    id
                )));
            }
            if transition.to.is_multi() {
                return Err(CoreError::invalid(format!(
                    "transition '{}' has multiple target places, not allowed in a state machine",
                    id
                )));
            }
        }

        for place in transition.from.ids().iter().chain(transition.to.ids()) {
            if !self.place_index.contains_key(place) {
                tracing::debug!(transition = id, place = %place, "auto-registering place");
                self.add_place(place, Place::default());
            }
        }

        self.transition_index
            .insert(id.to_string(), self.transitions.len());
        self.transitions.push((id.to_string(), transition));
        Ok(())
    }

    /// Sets the initial marking; every id must already be declared.
    fn set_initial_states(&mut self, initial: StateSpec) -> Result<(), CoreError> {
        if self.mode == Mode::SingleState && initial.is_multi() {
            return Err(CoreError::invalid(
                "a state machine can only have one initial state",
            ));
        }

        if let Some(missing) = initial.ids().iter().find(|id| !self.has_place(id)) {
            return Err(CoreError::invalid(format!(
                "initial place '{}' is not declared",
                missing
            )));
        }

        self.initial_states = Some(initial);
        Ok(())
    }

    /// Returns true if the current token set satisfies the transition's source spec.
    ///
    /// Unknown transitions never match.
    pub fn can_match(&self, current: &[String], transition: &str) -> bool {
        self.transition(transition)
            .map(|t| t.from.matches(current))
            .unwrap_or(false)
    }

    /// Returns the target spec of a transition.
    pub fn resolve_target(&self, transition: &str) -> Option<&StateSpec> {
        self.transition(transition).map(|t| &t.to)
    }

    /// Returns every transition whose source spec the token set satisfies, in
    /// definition order.
    pub fn available_for(&self, current: &[String]) -> Vec<&str> {
        self.transitions
            .iter()
            .filter(|(_, t)| t.from.matches(current))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn has_place(&self, id: &str) -> bool {
        self.place_index.contains_key(id)
    }

    pub fn place(&self, id: &str) -> Option<&Place> {
        self.place_index.get(id).map(|&idx| &self.places[idx].1)
    }

    /// Places in declaration order, back-filled places last.
    pub fn places(&self) -> impl Iterator<Item = (&str, &Place)> {
        self.places.iter().map(|(id, p)| (id.as_str(), p))
    }

    pub fn transition(&self, id: &str) -> Option<&Transition> {
        self.transition_index
            .get(id)
            .map(|&idx| &self.transitions[idx].1)
    }

    /// Transitions in declaration order.
    pub fn transitions(&self) -> impl Iterator<Item = (&str, &Transition)> {
        self.transitions.iter().map(|(id, t)| (id.as_str(), t))
    }

    /// Workflow-level metadata (empty object if none was given).
    pub fn metadata(&self) -> Value {
        match &self.metadata {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        }
    }

    /// Place metadata (empty object if none was given).
    pub fn place_metadata(&self, id: &str) -> Value {
        match self.place(id).map(|p| &p.metadata) {
            Some(Value::Null) | None => Value::Object(Default::default()),
            Some(other) => other.clone(),
        }
    }

    /// Transition metadata (empty object if none was given).
    pub fn transition_metadata(&self, id: &str) -> Value {
        match self.transition(id).map(|t| &t.metadata) {
            Some(Value::Null) | None => Value::Object(Default::default()),
            Some(other) => other.clone(),
        }
    }

    pub fn initial_states(&self) -> Option<&StateSpec> {
        self.initial_states.as_ref()
    }

    /// Returns the initial marking shaped for the definition's mode.
    pub fn initial_marking(&self) -> Option<Marking> {
        let initial = self.initial_states.as_ref()?;
        match self.mode {
            Mode::SingleState => initial.first().map(|s| Marking::Single(s.to_string())),
            Mode::MultiState => Some(Marking::Multi(initial.ids().to_vec())),
        }
    }

    /// Handler names declared in the document for a phase.
    pub fn declared_handlers(&self, event: EventType) -> &[String] {
        self.declared_handlers
            .get(&event)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the raw definition as JSON.
    pub fn to_json(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(&self.raw)?)
    }
}

/// Programmatic construction of a [`Definition`].
#[derive(Debug, Clone)]
pub struct DefinitionBuilder {
    raw: DefinitionRaw,
}

impl DefinitionBuilder {
    pub fn new(name: impl Into<String>, mode: Mode) -> Self {
        Self {
            raw: DefinitionRaw {
                name: name.into(),
                mode,
                audit_trail: AuditTrailSetting::default(),
                metadata: Value::Null,
                state_field: default_state_field(),
                initial_state: None,
                places: Vec::new(),
                transitions: Vec::new(),
                events: BTreeMap::new(),
            },
        }
    }

    pub fn state_field(mut self, field: impl Into<String>) -> Self {
        self.raw.state_field = field.into();
        self
    }

    pub fn audit(mut self, enabled: bool) -> Self {
        self.raw.audit_trail = AuditTrailSetting::Flag(enabled);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.raw.metadata = metadata;
        self
    }

    pub fn add_place(mut self, id: impl Into<String>) -> Self {
        self.raw.places.push((id.into(), Place::default()));
        self
    }

    pub fn add_place_with_metadata(mut self, id: impl Into<String>, metadata: Value) -> Self {
        self.raw.places.push((id.into(), Place { metadata }));
        self
    }

    pub fn add_transition(
        mut self,
        id: impl Into<String>,
        from: impl Into<StateSpec>,
        to: impl Into<StateSpec>,
    ) -> Self {
        self.raw
            .transitions
            .push((id.into(), Transition::new(from, to)));
        self
    }

    pub fn add_transition_with_metadata(
        mut self,
        id: impl Into<String>,
        from: impl Into<StateSpec>,
        to: impl Into<StateSpec>,
        metadata: Value,
    ) -> Self {
        let mut transition = Transition::new(from, to);
        transition.metadata = metadata;
        self.raw.transitions.push((id.into(), transition));
        self
    }

    pub fn set_initial_states(mut self, initial: impl Into<StateSpec>) -> Self {
        self.raw.initial_state = Some(initial.into());
        self
    }

    /// Declares a named handler for a phase.
    pub fn handler(mut self, event: EventType, name: impl Into<String>) -> Self {
        self.raw.events.entry(event).or_default().push(name.into());
        self
    }

    pub fn build(self) -> Result<Definition, CoreError> {
        Definition::from_raw(self.raw)
    }
}
