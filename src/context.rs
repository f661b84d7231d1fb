//! Execution contexts handed to conditions, hooks, middleware, and plugins.
//!
//! Contexts are the only view extension code gets of an in-flight transition
//! or the current stage. `TransitionContext` allows cooperative cancellation
//! and rewriting of the pending transition; `StageContext` carries bound
//! `send`/`go_to` operations so conditions and hooks can re-enter the engine
//! without holding a reference to it.

use crate::core::StageRegistry;
use crate::error::{BoxError, FlowError, TransitionError};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Narrow interface through which contexts re-enter the engine.
///
/// Managers and contexts depend on this port rather than on the engine type,
/// so they only see the operations they are contractually allowed to call.
pub trait EnginePort: Send + Sync {
    /// Dispatch an event, as [`FlowEngine::send`](crate::FlowEngine::send).
    fn send(&self, event: String, data: Option<Value>) -> BoxFuture<'static, Result<bool, FlowError>>;

    /// Jump to a stage, as [`FlowEngine::go_to`](crate::FlowEngine::go_to).
    fn go_to(&self, stage: String, data: Option<Value>)
        -> BoxFuture<'static, Result<bool, FlowError>>;
}

/// Requested rewrite of an in-flight transition.
///
/// Passed to [`TransitionContext::modify`]; `None` fields are left untouched.
#[derive(Debug, Default)]
pub struct TransitionChange {
    pub to: Option<String>,
    pub data: Option<Value>,
}

/// Mutable view of an in-flight transition, threaded through the middleware
/// chain and handed read-only to plugin transition hooks.
pub struct TransitionContext {
    from: String,
    to: String,
    event: Option<String>,
    data: Option<Value>,
    timestamp: DateTime<Utc>,
    registry: Arc<StageRegistry>,
}

impl TransitionContext {
    pub(crate) fn new(
        from: String,
        to: String,
        event: Option<String>,
        data: Option<Value>,
        registry: Arc<StageRegistry>,
    ) -> Self {
        Self {
            from,
            to,
            event,
            data,
            timestamp: Utc::now(),
            registry,
        }
    }

    /// Stage the transition leaves.
    pub fn from(&self) -> &str {
        &self.from
    }

    /// Stage the transition will commit to. Mutable via [`modify`](Self::modify).
    pub fn to(&self) -> &str {
        &self.to
    }

    /// Event that triggered the transition, if any.
    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// Stage data that will be committed. Mutable via [`modify`](Self::modify).
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// When the transition attempt began.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Produce the cancellation sentinel. Middleware aborts the transition by
    /// returning it:
    ///
    /// ```ignore
    /// return Err(ctx.cancel());
    /// ```
    ///
    /// Cancellation is cooperative; it does not interrupt async work already
    /// started outside the pipeline.
    pub fn cancel(&self) -> BoxError {
        Box::new(FlowError::from(TransitionError::Cancelled))
    }

    /// Rewrite the pending target and/or data in place.
    ///
    /// A new target must name a declared stage; otherwise the transition is
    /// rejected with [`TransitionError::UnknownStage`].
    pub fn modify(&mut self, change: TransitionChange) -> Result<(), BoxError> {
        if let Some(to) = change.to {
            if !self.registry.contains(&to) {
                return Err(Box::new(FlowError::from(TransitionError::UnknownStage(to))));
            }
            self.to = to;
        }
        if let Some(data) = change.data {
            self.data = Some(data);
        }
        Ok(())
    }
}

impl fmt::Debug for TransitionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionContext")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("event", &self.event)
            .field("data", &self.data)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Read-only view of the current stage, handed to conditions and stage hooks.
///
/// The bound [`send`](Self::send)/[`go_to`](Self::go_to) operations re-enter
/// the engine; while a transition is in flight they are rejected with
/// [`TransitionError::InProgress`], so hooks that want to chain a transition
/// should spawn it rather than await it inline.
#[derive(Clone)]
pub struct StageContext {
    current: String,
    data: Option<Value>,
    timestamp: DateTime<Utc>,
    port: Arc<dyn EnginePort>,
}

impl StageContext {
    pub(crate) fn new(current: String, data: Option<Value>, port: Arc<dyn EnginePort>) -> Self {
        Self {
            current,
            data,
            timestamp: Utc::now(),
            port,
        }
    }

    /// Name of the current stage.
    pub fn current(&self) -> &str {
        &self.current
    }

    /// Stage data at the time the context was created.
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// When the context was created.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Dispatch an event through the engine this context belongs to.
    pub async fn send(&self, event: &str, data: Option<Value>) -> Result<bool, FlowError> {
        self.port.send(event.to_string(), data).await
    }

    /// Jump to a stage through the engine this context belongs to.
    pub async fn go_to(&self, stage: &str, data: Option<Value>) -> Result<bool, FlowError> {
        self.port.go_to(stage.to_string(), data).await
    }
}

impl fmt::Debug for StageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("current", &self.current)
            .field("data", &self.data)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Stage;
    use futures::FutureExt;
    use serde_json::json;

    struct NullPort;

    impl EnginePort for NullPort {
        fn send(
            &self,
            _event: String,
            _data: Option<Value>,
        ) -> BoxFuture<'static, Result<bool, FlowError>> {
            async { Err(FlowError::from(TransitionError::NotStarted)) }.boxed()
        }

        fn go_to(
            &self,
            _stage: String,
            _data: Option<Value>,
        ) -> BoxFuture<'static, Result<bool, FlowError>> {
            async { Err(FlowError::from(TransitionError::NotStarted)) }.boxed()
        }
    }

    fn registry() -> Arc<StageRegistry> {
        let stages = vec![Stage::new("a"), Stage::new("b")];
        Arc::new(StageRegistry::new("a".to_string(), stages).unwrap())
    }

    #[test]
    fn modify_rewrites_target_and_data() {
        let mut ctx = TransitionContext::new(
            "a".to_string(),
            "b".to_string(),
            Some("go".to_string()),
            None,
            registry(),
        );

        ctx.modify(TransitionChange {
            to: Some("a".to_string()),
            data: Some(json!({"n": 1})),
        })
        .unwrap();

        assert_eq!(ctx.to(), "a");
        assert_eq!(ctx.data(), Some(&json!({"n": 1})));
        assert_eq!(ctx.from(), "a");
        assert_eq!(ctx.event(), Some("go"));
    }

    #[test]
    fn modify_rejects_unknown_target() {
        let mut ctx =
            TransitionContext::new("a".to_string(), "b".to_string(), None, None, registry());

        let err = ctx
            .modify(TransitionChange {
                to: Some("nowhere".to_string()),
                data: None,
            })
            .unwrap_err();

        let flow = err.downcast::<FlowError>().unwrap();
        assert!(matches!(
            *flow,
            FlowError::Transition(TransitionError::UnknownStage(_))
        ));
        assert_eq!(ctx.to(), "b");
    }

    #[test]
    fn cancel_produces_the_sentinel() {
        let ctx = TransitionContext::new("a".to_string(), "b".to_string(), None, None, registry());
        let err = ctx.cancel().downcast::<FlowError>().unwrap();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn stage_context_delegates_to_port() {
        let ctx = StageContext::new("a".to_string(), None, Arc::new(NullPort));
        let err = ctx.send("go", None).await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::Transition(TransitionError::NotStarted)
        ));
        assert_eq!(ctx.current(), "a");
    }
}
