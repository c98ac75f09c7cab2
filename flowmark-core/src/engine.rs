//! Transition engine - matches markings, runs the lifecycle, updates tokens.

use crate::audit::{AuditSink, MemoryAuditTrail};
use crate::bus::EventBus;
use crate::definition::{Definition, Mode, StateSpec};
use crate::dispatch::{Dispatcher, EventType, Handler, HandlerRegistry, WorkflowEvent};
use crate::entity::{Entity, Marking};
use crate::error::CoreError;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Result of applying a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyResult {
    pub transition: String,
    /// Token set before the transition.
    pub from_states: Vec<String>,
    /// Token set after the transition.
    pub to_states: Vec<String>,
}

/// The transition engine for one definition.
///
/// Holds no per-entity state: entities are passed in by the caller and only
/// their state field is read and written. Calls against different entities
/// may run concurrently through a shared `&Engine`; calls against the same
/// entity must be serialized by the caller.
pub struct Engine<E> {
    definition: Arc<Definition>,

    /// Place -> other targets of the fork transition it belongs to.
    fork_siblings: HashMap<String, Vec<String>>,

    dispatcher: Dispatcher<E>,
}

impl<E: Entity> Engine<E> {
    /// Creates an engine for a definition without named handlers.
    ///
    /// Fails if the definition declares handlers in its `events` block.
    pub fn new(definition: impl Into<Arc<Definition>>) -> Result<Self, CoreError> {
        Self::with_handlers(definition, &HandlerRegistry::new())
    }

    /// Creates an engine, resolving the definition's declared handler names
    /// against `registry`.
    pub fn with_handlers(
        definition: impl Into<Arc<Definition>>,
        registry: &HandlerRegistry<E>,
    ) -> Result<Self, CoreError> {
        let definition = definition.into();
        let mut dispatcher = Dispatcher::new(
            definition.name.clone(),
            definition.audit_enabled,
            Arc::new(MemoryAuditTrail::new()),
        );

        for event in EventType::ALL {
            for name in definition.declared_handlers(event) {
                let handler = registry.get(name).ok_or_else(|| {
                    CoreError::invalid(format!(
                        "{} handler '{}' is not registered",
                        event, name
                    ))
                })?;
                dispatcher.declare(event, handler.clone())?;
            }
        }

        let fork_siblings = build_fork_siblings(&definition);

        Ok(Self {
            definition,
            fork_siblings,
            dispatcher,
        })
    }

    /// Routes audit entries to `sink` instead of the default in-memory trail.
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.dispatcher.set_audit(sink);
        self
    }

    /// Publishes every phase on `bus`.
    pub fn with_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.dispatcher.set_bus(bus);
        self
    }

    /// Registers a handler for a phase, after any declared handlers.
    pub fn on(&mut self, event: EventType, handler: Handler<E>) -> Result<(), CoreError> {
        self.dispatcher.register(event, handler)
    }

    /// Number of handlers (declared and registered) for a phase.
    pub fn handler_count(&self, event: EventType) -> usize {
        self.dispatcher.handler_count(event)
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// Other targets of the fork that `place` belongs to.
    pub fn fork_siblings(&self, place: &str) -> &[String] {
        self.fork_siblings
            .get(place)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Current token set of an entity; a scalar state is a one-element set.
    pub fn marking(&self, entity: &E) -> Vec<String> {
        entity
            .marking(&self.definition.state_field)
            .map(|m| m.tokens())
            .unwrap_or_default()
    }

    /// Writes the initial marking if the entity's state field is empty.
    ///
    /// Returns true if the entity was modified.
    pub fn initialize(&self, entity: &mut E) -> bool {
        let empty = entity
            .marking(&self.definition.state_field)
            .map(|m| m.is_empty())
            .unwrap_or(true);
        if !empty {
            return false;
        }
        match self.definition.initial_marking() {
            Some(marking) => {
                entity.set_marking(&self.definition.state_field, marking);
                true
            }
            None => false,
        }
    }

    /// Transitions whose source spec the entity's marking satisfies.
    pub fn available_transitions(&self, entity: &E) -> Vec<&str> {
        self.definition.available_for(&self.marking(entity))
    }

    /// Transitions available from a single state.
    pub fn available_transitions_from(&self, state: &str) -> Vec<&str> {
        self.definition.available_for(&[state.to_string()])
    }

    /// Checks whether a transition may fire.
    ///
    /// With `trigger_guard`, a structurally valid transition is also run
    /// through the GUARD phase. That check is not written to the audit trail.
    pub fn can_transition(
        &self,
        entity: &E,
        transition: &str,
        trigger_guard: bool,
    ) -> Result<bool, CoreError> {
        let current = self.marking(entity);
        if !self.definition.can_match(&current, transition) {
            return Ok(false);
        }

        if trigger_guard {
            let to = self.target(transition)?;
            let metadata = self.definition.transition_metadata(transition);
            return self.fire(
                EventType::Guard,
                entity,
                transition,
                &current,
                &to,
                &metadata,
                true,
            );
        }

        Ok(true)
    }

    /// Applies a transition, firing every lifecycle phase.
    ///
    /// Errors after the marking was written leave the new marking and the
    /// audit entries already recorded in place.
    pub fn apply(&self, entity: &mut E, transition: &str) -> Result<ApplyResult, CoreError> {
        if !self.can_transition(entity, transition, false)? {
            return Err(CoreError::TransitionNotAllowed {
                transition: transition.to_string(),
                state: self.marking(entity).join(", "),
            });
        }

        let from = self.marking(entity);
        let to = self.target(transition)?;
        let metadata = self.definition.transition_metadata(transition);

        self.fire(EventType::Announce, entity, transition, &from, &to, &metadata, false)?;

        if !self.fire(EventType::Guard, entity, transition, &from, &to, &metadata, false)? {
            tracing::warn!(
                workflow = %self.definition.name,
                entity = %entity.id(),
                transition,
                "transition blocked by guard"
            );
            return Err(CoreError::GuardBlocked {
                transition: transition.to_string(),
            });
        }

        self.fire(EventType::Leave, entity, transition, &from, &to, &metadata, false)?;
        self.fire(EventType::Enter, entity, transition, &from, &to, &metadata, false)?;

        let next = self.next_marking(&from, &to);
        let to_states = next.tokens();
        entity.set_marking(&self.definition.state_field, next);

        tracing::debug!(
            workflow = %self.definition.name,
            entity = %entity.id(),
            transition,
            from = ?from,
            to = ?to_states,
            "marking updated"
        );

        self.fire(EventType::Transition, entity, transition, &from, &to, &metadata, false)?;
        self.fire(EventType::Completed, entity, transition, &from, &to, &metadata, false)?;
        self.fire(EventType::Entered, entity, transition, &from, &to, &metadata, false)?;

        Ok(ApplyResult {
            transition: transition.to_string(),
            from_states: from,
            to_states,
        })
    }

    fn target(&self, transition: &str) -> Result<StateSpec, CoreError> {
        self.definition
            .resolve_target(transition)
            .cloned()
            .ok_or_else(|| CoreError::TransitionNotAllowed {
                transition: transition.to_string(),
                state: String::new(),
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn fire(
        &self,
        event_type: EventType,
        entity: &E,
        transition: &str,
        from: &[String],
        to: &StateSpec,
        metadata: &Value,
        silent: bool,
    ) -> Result<bool, CoreError> {
        let event = WorkflowEvent {
            entity,
            transition,
            from_states: from,
            to_states: to,
            metadata,
        };
        self.dispatcher.fire(event_type, &event, silent)
    }

    /// Computes the marking that results from entering `target`.
    fn next_marking(&self, current: &[String], target: &StateSpec) -> Marking {
        match self.definition.mode {
            // A state machine keeps only the first target.
            Mode::SingleState => {
                Marking::Single(target.first().unwrap_or_default().to_string())
            }
            Mode::MultiState => Marking::Multi(next_tokens(
                &self.definition,
                &self.fork_siblings,
                current,
                target.ids(),
            )),
        }
    }
}

/// Token update for multi-state definitions.
///
/// Drops every current token that is an ancestor of a target or a fork
/// sibling of a target, then appends the targets. Order is first-seen and
/// the result has no duplicates.
fn next_tokens(
    definition: &Definition,
    fork_siblings: &HashMap<String, Vec<String>>,
    current: &[String],
    targets: &[String],
) -> Vec<String> {
    let mut remove = ancestors(definition, targets);
    for target in targets {
        if let Some(siblings) = fork_siblings.get(target) {
            remove.extend(siblings.iter().cloned());
        }
    }

    let mut seen = HashSet::new();
    current
        .iter()
        .filter(|token| !remove.contains(*token))
        .chain(targets.iter())
        .filter(|token| seen.insert(*token))
        .cloned()
        .collect()
}

/// Every place from which some transition chain leads into `targets`.
///
/// Depth-first over transitions whose target contains the visited place;
/// the visited set keeps cyclic graphs finite.
fn ancestors(definition: &Definition, targets: &[String]) -> HashSet<String> {
    let mut found = HashSet::new();
    let mut visited = HashSet::new();
    let mut stack: Vec<&str> = targets.iter().map(String::as_str).rev().collect();

    while let Some(place) = stack.pop() {
        if !visited.insert(place) {
            continue;
        }
        for (_, transition) in definition.transitions() {
            if transition.to.ids().iter().any(|id| id == place) {
                for from in transition.from.ids() {
                    found.insert(from.clone());
                    if !visited.contains(from.as_str()) {
                        stack.push(from.as_str());
                    }
                }
            }
        }
    }

    found
}

/// Builds the fork-sibling table from every transition with several targets.
///
/// A place that is a target of more than one fork keeps the siblings of the
/// last such transition in definition order.
fn build_fork_siblings(definition: &Definition) -> HashMap<String, Vec<String>> {
    let mut table = HashMap::new();
    for (_, transition) in definition.transitions() {
        let targets = transition.to.ids();
        if targets.len() > 1 {
            for target in targets {
                let siblings = targets.iter().filter(|t| *t != target).cloned().collect();
                table.insert(target.clone(), siblings);
            }
        }
    }
    table
}
