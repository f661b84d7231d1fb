//! Transition resolution and guard evaluation.
//!
//! Resolution is a pure scan over a stage's declared transitions; guard
//! conditions are evaluated afterwards, before any state is touched. A failed
//! guard means the transition never happened.

use crate::context::StageContext;
use crate::core::stage::{Stage, TransitionDef};
use crate::error::TransitionError;
use std::time::Duration;

/// What asked for a transition.
#[derive(Clone, Debug, PartialEq)]
pub enum Trigger {
    /// An application event, matched against `TransitionDef::event`.
    Event(String),
    /// A direct jump request, matched against `TransitionDef::target`.
    Direct(String),
    /// A fired timer, matched against `(target, after)` so a re-declared
    /// stage cannot be hit by a stale timer with a different delay.
    Timer { target: String, after: Duration },
}

/// Find the transition a trigger selects, scanning declaration order.
/// First match wins; `None` is a no-op for the caller, not an error.
pub fn find_transition<'a>(stage: &'a Stage, trigger: &Trigger) -> Option<&'a TransitionDef> {
    stage.transitions.iter().find(|t| match trigger {
        Trigger::Event(event) => t.event.as_deref() == Some(event.as_str()),
        Trigger::Direct(target) => t.target == *target,
        Trigger::Timer { target, after } => t.target == *target && t.after == Some(*after),
    })
}

/// Evaluate a transition's guard condition against the current stage.
///
/// A transition without a condition always passes. `Ok(false)` declines the
/// transition; an error from the condition aborts the attempt as
/// [`TransitionError::ConditionFailed`] with the edge named.
pub async fn evaluate_condition(
    transition: &TransitionDef,
    from: &str,
    event: Option<&str>,
    ctx: StageContext,
) -> Result<bool, TransitionError> {
    match &transition.condition {
        None => Ok(true),
        Some(condition) => {
            condition(ctx)
                .await
                .map_err(|source| TransitionError::ConditionFailed {
                    from: from.to_string(),
                    to: transition.target.clone(),
                    event: event.map(str::to_string),
                    source,
                })
        }
    }
}
