//! Structural checks on raw definition documents.

use crate::definition::DefinitionRaw;
use std::collections::HashSet;

/// Reports every transition endpoint that is not a declared place.
///
/// Only the `places` block counts as declared; the back-filling done by
/// [`Definition::from_raw`](crate::Definition::from_raw) is not applied here.
/// Returns one message per offending (transition, place) pair, sources
/// before targets, in document order. An empty result means the document is
/// valid.
pub fn validate(raw: &DefinitionRaw) -> Vec<String> {
    let declared: HashSet<&str> = raw.places.iter().map(|(id, _)| id.as_str()).collect();
    let mut errors = Vec::new();

    for (id, transition) in &raw.transitions {
        for state in transition.from.ids() {
            if !declared.contains(state.as_str()) {
                errors.push(format!(
                    "Transition \"{}\" refers to undefined state \"{}\".",
                    id, state
                ));
            }
        }
        for state in transition.to.ids() {
            if !declared.contains(state.as_str()) {
                errors.push(format!(
                    "Transition \"{}\" results in undefined state \"{}\".",
                    id, state
                ));
            }
        }
    }

    errors
}
