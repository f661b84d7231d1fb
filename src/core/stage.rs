//! Stage and transition definitions.
//!
//! Stages are the named states of the flow; transitions are the directed,
//! event- or time-triggered, optionally condition-gated edges between them.
//! Definitions are plain data plus boxed async callbacks, built once and then
//! owned immutably by the registry.

use crate::context::StageContext;
use crate::error::BoxError;
use crate::middleware::Middleware;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Async predicate gating whether a matched transition is taken.
///
/// Created fresh for each evaluation; an error aborts the attempt, `false`
/// makes it a no-op.
pub type Condition =
    Arc<dyn Fn(StageContext) -> BoxFuture<'static, Result<bool, BoxError>> + Send + Sync>;

/// Async stage lifecycle hook (`on_enter` / `on_exit`).
///
/// Hooks are observers: a hook error is logged and never blocks a transition.
pub type StageHook =
    Arc<dyn Fn(StageContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A directed edge from its owning stage to `target`.
pub struct TransitionDef {
    /// Name of the stage this transition leads to. Must be declared.
    pub target: String,
    /// Event that triggers this transition, if event-triggered.
    pub event: Option<String>,
    /// Delay after stage entry at which this transition fires, if
    /// time-triggered. At most one transition per stage may carry this.
    pub after: Option<Duration>,
    /// Optional guard condition, evaluated before any mutation.
    pub condition: Option<Condition>,
    /// Middleware scoped to this one transition, run after the globals.
    pub middleware: Vec<Arc<dyn Middleware>>,
}

impl TransitionDef {
    /// An event-triggered transition.
    pub fn on(event: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            event: Some(event.into()),
            after: None,
            condition: None,
            middleware: Vec::new(),
        }
    }

    /// A time-triggered transition firing `after` the stage is entered.
    pub fn after(after: Duration, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            event: None,
            after: Some(after),
            condition: None,
            middleware: Vec::new(),
        }
    }

    /// A bare directed edge, matched only by direct `go_to` calls.
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            event: None,
            after: None,
            condition: None,
            middleware: Vec::new(),
        }
    }

    /// Gate this transition behind an async condition.
    pub fn when<F, Fut>(mut self, condition: F) -> Self
    where
        F: Fn(StageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        self.condition = Some(Arc::new(move |ctx| condition(ctx).boxed()));
        self
    }

    /// Attach transition-scoped middleware, run after the global pipeline.
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }
}

impl Clone for TransitionDef {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            event: self.event.clone(),
            after: self.after,
            condition: self.condition.clone(),
            middleware: self.middleware.clone(),
        }
    }
}

impl fmt::Debug for TransitionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionDef")
            .field("target", &self.target)
            .field("event", &self.event)
            .field("after", &self.after)
            .field("condition", &self.condition.as_ref().map(|_| "<fn>"))
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// A named stage with its outgoing transitions and lifecycle hooks.
pub struct Stage {
    /// Unique stage name.
    pub name: String,
    /// Outgoing transitions, scanned in declaration order.
    pub transitions: Vec<TransitionDef>,
    /// Default stage data committed when no payload is supplied.
    pub data: Option<Value>,
    /// Opaque effect reference for rendering layers. Never interpreted here.
    pub effect: Option<String>,
    /// Hook run after this stage is committed.
    pub on_enter: Option<StageHook>,
    /// Hook run before this stage is left.
    pub on_exit: Option<StageHook>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transitions: Vec::new(),
            data: None,
            effect: None,
            on_enter: None,
            on_exit: None,
        }
    }

    /// Set the default stage data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the opaque effect reference.
    pub fn with_effect(mut self, effect: impl Into<String>) -> Self {
        self.effect = Some(effect.into());
        self
    }

    /// Append an outgoing transition. Declaration order is match order.
    pub fn transition(mut self, transition: TransitionDef) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Set the enter hook.
    pub fn on_enter<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(StageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_enter = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    /// Set the exit hook.
    pub fn on_exit<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(StageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_exit = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    /// Transitions carrying a time trigger, in deterministic firing order:
    /// ascending duration, then target name.
    pub(crate) fn timed_transitions(&self) -> Vec<(Duration, &TransitionDef)> {
        let mut timed: Vec<(Duration, &TransitionDef)> = self
            .transitions
            .iter()
            .filter_map(|t| t.after.map(|d| (d, t)))
            .collect();
        timed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.target.cmp(&b.1.target)));
        timed
    }
}

impl Clone for Stage {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            transitions: self.transitions.clone(),
            data: self.data.clone(),
            effect: self.effect.clone(),
            on_enter: self.on_enter.clone(),
            on_exit: self.on_exit.clone(),
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("transitions", &self.transitions)
            .field("data", &self.data)
            .field("effect", &self.effect)
            .field("on_enter", &self.on_enter.as_ref().map(|_| "<hook>"))
            .field("on_exit", &self.on_exit.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fluent_constructors_populate_fields() {
        let stage = Stage::new("checkout")
            .with_data(json!({"cart": []}))
            .with_effect("slide-left")
            .transition(TransitionDef::on("pay", "paid"))
            .transition(TransitionDef::after(Duration::from_millis(300), "expired"));

        assert_eq!(stage.name, "checkout");
        assert_eq!(stage.data, Some(json!({"cart": []})));
        assert_eq!(stage.effect.as_deref(), Some("slide-left"));
        assert_eq!(stage.transitions.len(), 2);
        assert_eq!(stage.transitions[0].event.as_deref(), Some("pay"));
        assert_eq!(
            stage.transitions[1].after,
            Some(Duration::from_millis(300))
        );
    }

    #[test]
    fn timed_transitions_order_by_duration_then_target() {
        let stage = Stage::new("a")
            .transition(TransitionDef::after(Duration::from_millis(200), "z"))
            .transition(TransitionDef::after(Duration::from_millis(100), "c"))
            .transition(TransitionDef::after(Duration::from_millis(100), "b"))
            .transition(TransitionDef::on("go", "ignored"));

        let order: Vec<&str> = stage
            .timed_transitions()
            .iter()
            .map(|(_, t)| t.target.as_str())
            .collect();
        assert_eq!(order, vec!["b", "c", "z"]);
    }

    #[test]
    fn bare_edge_has_no_triggers() {
        let t = TransitionDef::to("done");
        assert!(t.event.is_none());
        assert!(t.after.is_none());
        assert!(t.condition.is_none());
    }

    #[test]
    fn transition_clone_shares_condition() {
        let t = TransitionDef::on("go", "b").when(|_ctx| async { Ok(true) });
        let cloned = t.clone();
        assert!(cloned.condition.is_some());
        assert_eq!(cloned.target, "b");
    }
}
