//! Lifecycle event dispatch.
//!
//! Every applied transition fires seven phases in a fixed order:
//!
//! 1. `ANNOUNCE`
//! 2. `GUARD` - any guard handler returning `false` blocks the transition
//! 3. `LEAVE`
//! 4. `ENTER`
//!
//! The marking is updated here, then:
//!
//! 5. `TRANSITION`
//! 6. `COMPLETED`
//! 7. `ENTERED`
//!
//! Each phase is written to the audit trail (when enabled for the
//! definition), published on the event bus (when attached), and then passed
//! to the registered handlers.

use crate::audit::{AuditEntry, AuditSink};
use crate::bus::{topics, EventBus, PublishedEvent};
use crate::definition::StateSpec;
use crate::entity::Entity;
use crate::error::{CoreError, HandlerError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "ANNOUNCE", alias = "announce")]
    Announce,
    #[serde(rename = "GUARD", alias = "guard")]
    Guard,
    #[serde(rename = "LEAVE", alias = "leave")]
    Leave,
    #[serde(rename = "ENTER", alias = "enter")]
    Enter,
    #[serde(rename = "TRANSITION", alias = "transition")]
    Transition,
    #[serde(rename = "COMPLETED", alias = "completed")]
    Completed,
    #[serde(rename = "ENTERED", alias = "entered")]
    Entered,
}

impl EventType {
    /// All phases in firing order.
    pub const ALL: [EventType; 7] = [
        EventType::Announce,
        EventType::Guard,
        EventType::Leave,
        EventType::Enter,
        EventType::Transition,
        EventType::Completed,
        EventType::Entered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Announce => "ANNOUNCE",
            EventType::Guard => "GUARD",
            EventType::Leave => "LEAVE",
            EventType::Enter => "ENTER",
            EventType::Transition => "TRANSITION",
            EventType::Completed => "COMPLETED",
            EventType::Entered => "ENTERED",
        }
    }

    /// Lowercase name used in bus topics.
    pub fn topic_key(&self) -> &'static str {
        match self {
            EventType::Announce => "announce",
            EventType::Guard => "guard",
            EventType::Leave => "leave",
            EventType::Enter => "enter",
            EventType::Transition => "transition",
            EventType::Completed => "completed",
            EventType::Entered => "entered",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::invalid(format!("unknown event type '{}'", s)))
    }
}

/// Payload handed to handlers for every phase.
#[derive(Debug)]
pub struct WorkflowEvent<'a, E> {
    pub entity: &'a E,
    pub transition: &'a str,
    /// Token set before the transition.
    pub from_states: &'a [String],
    /// Target spec of the transition.
    pub to_states: &'a StateSpec,
    /// Transition metadata.
    pub metadata: &'a Value,
}

pub type GuardFn<E> =
    Arc<dyn Fn(&WorkflowEvent<'_, E>) -> Result<bool, HandlerError> + Send + Sync>;
pub type ListenerFn<E> =
    Arc<dyn Fn(&WorkflowEvent<'_, E>) -> Result<(), HandlerError> + Send + Sync>;

/// A lifecycle handler. Only guards can veto.
pub enum Handler<E> {
    Guard(GuardFn<E>),
    Listener(ListenerFn<E>),
}

impl<E> Handler<E> {
    pub fn guard<F>(f: F) -> Self
    where
        F: Fn(&WorkflowEvent<'_, E>) -> Result<bool, HandlerError> + Send + Sync + 'static,
    {
        Handler::Guard(Arc::new(f))
    }

    pub fn listener<F>(f: F) -> Self
    where
        F: Fn(&WorkflowEvent<'_, E>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Handler::Listener(Arc::new(f))
    }

    /// Returns true if this handler may be registered for `event`.
    pub fn allowed_for(&self, event: EventType) -> bool {
        match self {
            Handler::Guard(_) => event == EventType::Guard,
            Handler::Listener(_) => true,
        }
    }
}

impl<E> Clone for Handler<E> {
    fn clone(&self) -> Self {
        match self {
            Handler::Guard(f) => Handler::Guard(Arc::clone(f)),
            Handler::Listener(f) => Handler::Listener(Arc::clone(f)),
        }
    }
}

impl<E> fmt::Debug for Handler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Guard(_) => f.write_str("Handler::Guard"),
            Handler::Listener(_) => f.write_str("Handler::Listener"),
        }
    }
}

/// Named handlers that definition documents refer to in their `events` block.
pub struct HandlerRegistry<E> {
    handlers: HashMap<String, Handler<E>>,
}

impl<E> HandlerRegistry<E> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers a handler under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, handler: Handler<E>) -> &mut Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Handler<E>> {
        self.handlers.get(name)
    }
}

impl<E> Default for HandlerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-definition phase dispatcher.
pub(crate) struct Dispatcher<E> {
    workflow: String,
    audit_enabled: bool,
    declared: HashMap<EventType, Vec<Handler<E>>>,
    imperative: HashMap<EventType, Vec<Handler<E>>>,
    audit: Arc<dyn AuditSink>,
    bus: Option<Arc<dyn EventBus>>,
}

impl<E: Entity> Dispatcher<E> {
    pub(crate) fn new(
        workflow: impl Into<String>,
        audit_enabled: bool,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            workflow: workflow.into(),
            audit_enabled,
            declared: HashMap::new(),
            imperative: HashMap::new(),
            audit,
            bus: None,
        }
    }

    pub(crate) fn set_audit(&mut self, audit: Arc<dyn AuditSink>) {
        self.audit = audit;
    }

    pub(crate) fn set_bus(&mut self, bus: Arc<dyn EventBus>) {
        self.bus = Some(bus);
    }

    /// Adds a handler resolved from the definition document.
    pub(crate) fn declare(&mut self, event: EventType, handler: Handler<E>) -> Result<(), CoreError> {
        check_kind(event, &handler)?;
        self.declared.entry(event).or_default().push(handler);
        Ok(())
    }

    /// Adds a handler registered after construction.
    pub(crate) fn register(&mut self, event: EventType, handler: Handler<E>) -> Result<(), CoreError> {
        check_kind(event, &handler)?;
        self.imperative.entry(event).or_default().push(handler);
        Ok(())
    }

    /// Declared handlers first, then imperatively registered ones.
    fn handlers(&self, event: EventType) -> impl Iterator<Item = &Handler<E>> {
        self.declared
            .get(&event)
            .into_iter()
            .flatten()
            .chain(self.imperative.get(&event).into_iter().flatten())
    }

    pub(crate) fn handler_count(&self, event: EventType) -> usize {
        self.handlers(event).count()
    }

    /// Fires one phase. Returns `false` only when a guard vetoes.
    ///
    /// A silent phase is not written to the audit trail.
    pub(crate) fn fire(
        &self,
        event_type: EventType,
        event: &WorkflowEvent<'_, E>,
        silent: bool,
    ) -> Result<bool, CoreError> {
        let entity_id = event.entity.id();

        tracing::debug!(
            workflow = %self.workflow,
            entity = %entity_id,
            transition = event.transition,
            phase = %event_type,
            silent,
            "dispatching phase"
        );

        let entry = AuditEntry::new(
            entity_id.clone(),
            event_type,
            event.transition,
            event.from_states.to_vec(),
            event.to_states.clone(),
            event.metadata.clone(),
        );
        self.audit
            .log_event(&self.workflow, entry, !silent && self.audit_enabled)?;

        if let Some(bus) = &self.bus {
            let published = PublishedEvent {
                workflow: self.workflow.clone(),
                entity_id,
                event_type,
                transition: event.transition.to_string(),
                from_states: event.from_states.to_vec(),
                to_states: event.to_states.clone(),
                metadata: event.metadata.clone(),
            };
            for topic in topics(&self.workflow, event_type, event.transition) {
                bus.publish(&topic, &published);
            }
        }

        for handler in self.handlers(event_type) {
            match handler {
                Handler::Guard(guard) => {
                    let allowed = guard(event).map_err(|source| CoreError::Handler {
                        event: event_type,
                        transition: event.transition.to_string(),
                        source,
                    })?;
                    if !allowed {
                        return Ok(false);
                    }
                }
                Handler::Listener(listener) => {
                    listener(event).map_err(|source| CoreError::Handler {
                        event: event_type,
                        transition: event.transition.to_string(),
                        source,
                    })?;
                }
            }
        }

        Ok(true)
    }
}

fn check_kind<E>(event: EventType, handler: &Handler<E>) -> Result<(), CoreError> {
    if handler.allowed_for(event) {
        Ok(())
    } else {
        Err(CoreError::invalid(format!(
            "guard handlers can only be registered for GUARD, not {}",
            event
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditTrail;
    use parking_lot::Mutex;
    use serde_json::json;

    fn event_fixture() -> (Value, Vec<String>, StateSpec, Value) {
        (
            json!({"id": 1, "state": ["draft"]}),
            vec!["draft".to_string()],
            StateSpec::from("review"),
            json!({}),
        )
    }

    #[test]
    fn test_event_type_parse() {
        assert_eq!("guard".parse::<EventType>().unwrap(), EventType::Guard);
        assert_eq!("ENTERED".parse::<EventType>().unwrap(), EventType::Entered);
        assert!("EXPLODE".parse::<EventType>().is_err());
        assert_eq!(EventType::Completed.topic_key(), "completed");
    }

    #[test]
    fn test_event_type_order() {
        let mut shuffled = vec![EventType::Entered, EventType::Announce, EventType::Leave];
        shuffled.sort();
        assert_eq!(
            shuffled,
            vec![EventType::Announce, EventType::Leave, EventType::Entered]
        );
    }

    #[test]
    fn test_guard_rejected_on_other_phases() {
        let audit = Arc::new(MemoryAuditTrail::new());
        let mut dispatcher: Dispatcher<Value> = Dispatcher::new("wf", false, audit);

        let result = dispatcher.register(EventType::Leave, Handler::guard(|_| Ok(true)));
        assert!(matches!(result, Err(CoreError::InvalidDefinition { .. })));

        dispatcher
            .register(EventType::Guard, Handler::listener(|_| Ok(())))
            .unwrap();
        assert_eq!(dispatcher.handler_count(EventType::Guard), 1);
    }

    #[test]
    fn test_declared_before_imperative() {
        let audit = Arc::new(MemoryAuditTrail::new());
        let mut dispatcher: Dispatcher<Value> = Dispatcher::new("wf", false, audit);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c = calls.clone();
        dispatcher
            .register(
                EventType::Enter,
                Handler::listener(move |_| {
                    c.lock().push("imperative");
                    Ok(())
                }),
            )
            .unwrap();
        let c = calls.clone();
        dispatcher
            .declare(
                EventType::Enter,
                Handler::listener(move |_| {
                    c.lock().push("declared");
                    Ok(())
                }),
            )
            .unwrap();

        let (entity, from, to, metadata) = event_fixture();
        let event = WorkflowEvent {
            entity: &entity,
            transition: "submit",
            from_states: &from,
            to_states: &to,
            metadata: &metadata,
        };
        assert!(dispatcher.fire(EventType::Enter, &event, false).unwrap());
        assert_eq!(*calls.lock(), vec!["declared", "imperative"]);
    }

    #[test]
    fn test_guard_veto_stops_remaining_guards() {
        let audit = Arc::new(MemoryAuditTrail::new());
        let mut dispatcher: Dispatcher<Value> = Dispatcher::new("wf", false, audit);
        let reached = Arc::new(Mutex::new(false));

        dispatcher
            .register(EventType::Guard, Handler::guard(|_| Ok(false)))
            .unwrap();
        let r = reached.clone();
        dispatcher
            .register(
                EventType::Guard,
                Handler::guard(move |_| {
                    *r.lock() = true;
                    Ok(true)
                }),
            )
            .unwrap();

        let (entity, from, to, metadata) = event_fixture();
        let event = WorkflowEvent {
            entity: &entity,
            transition: "submit",
            from_states: &from,
            to_states: &to,
            metadata: &metadata,
        };
        assert!(!dispatcher.fire(EventType::Guard, &event, false).unwrap());
        assert!(!*reached.lock());
    }

    #[test]
    fn test_silent_phase_not_audited() {
        let audit = Arc::new(MemoryAuditTrail::new());
        let dispatcher: Dispatcher<Value> = Dispatcher::new("wf", true, audit.clone());

        let (entity, from, to, metadata) = event_fixture();
        let event = WorkflowEvent {
            entity: &entity,
            transition: "submit",
            from_states: &from,
            to_states: &to,
            metadata: &metadata,
        };
        dispatcher.fire(EventType::Guard, &event, true).unwrap();
        assert!(audit.history("wf", "1").unwrap().is_empty());

        dispatcher.fire(EventType::Guard, &event, false).unwrap();
        let history = audit.history("wf", "1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type, EventType::Guard);
        assert_eq!(history[0].transition, "submit");
    }

    #[test]
    fn test_handler_error_propagates() {
        let audit = Arc::new(MemoryAuditTrail::new());
        let mut dispatcher: Dispatcher<Value> = Dispatcher::new("wf", false, audit);
        dispatcher
            .register(
                EventType::Completed,
                Handler::listener(|_| Err("downstream unavailable".into())),
            )
            .unwrap();

        let (entity, from, to, metadata) = event_fixture();
        let event = WorkflowEvent {
            entity: &entity,
            transition: "submit",
            from_states: &from,
            to_states: &to,
            metadata: &metadata,
        };
        let err = dispatcher
            .fire(EventType::Completed, &event, false)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Handler {
                event: EventType::Completed,
                ..
            }
        ));
    }
}
