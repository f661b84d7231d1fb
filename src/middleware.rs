//! Middleware pipeline for in-flight transitions.
//!
//! Middleware wrap transition execution in an onion: each receives the
//! mutable [`TransitionContext`] and a [`Next`] continuation. Calling
//! `next.run(ctx)` descends into the rest of the chain; returning `Ok`
//! without calling it skips everything downstream. Aborting the transition
//! itself is explicit, via `Err(ctx.cancel())`.

use crate::context::TransitionContext;
use crate::error::{BoxError, FlowError, MiddlewareError, TransitionError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// A named interceptor around transition execution.
///
/// Implementations decide whether to call `next.run(ctx)`, and may inspect or
/// rewrite the context before and after doing so. Returning
/// `Err(ctx.cancel())` aborts the transition cleanly; any other non-framework
/// error is wrapped as [`MiddlewareError`] naming this middleware.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Unique name, used in error reporting and for removal.
    fn name(&self) -> &str;

    async fn execute(
        &self,
        ctx: &mut TransitionContext,
        next: Next<'_>,
    ) -> Result<(), BoxError>;
}

/// Continuation into the remainder of the chain.
///
/// `Next` is a cheap copyable cursor; a middleware may hold it and call
/// [`run_from`](Next::run_from) to replay a chain suffix, which is how
/// retry-style middleware re-run their downstream.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    index: usize,
}

impl<'a> Next<'a> {
    /// Run the rest of the chain from the current position.
    pub async fn run(self, ctx: &mut TransitionContext) -> Result<(), BoxError> {
        dispatch(self.chain, self.index, ctx).await
    }

    /// Run the chain starting at an explicit position. Positions at or past
    /// the end of the chain reach the innermost step immediately.
    pub async fn run_from(
        self,
        ctx: &mut TransitionContext,
        index: usize,
    ) -> Result<(), BoxError> {
        dispatch(self.chain, index, ctx).await
    }

    /// Position of the next middleware in the chain.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Framework errors pass through unchanged so cancellation and typed
/// transition failures keep their identity; everything else gets attributed
/// to the middleware that raised it.
fn attribute(name: &str, err: BoxError) -> BoxError {
    if err.is::<FlowError>() || err.is::<TransitionError>() || err.is::<MiddlewareError>() {
        err
    } else {
        Box::new(MiddlewareError {
            name: name.to_string(),
            source: err,
        })
    }
}

pub(crate) fn dispatch<'a>(
    chain: &'a [Arc<dyn Middleware>],
    index: usize,
    ctx: &'a mut TransitionContext,
) -> BoxFuture<'a, Result<(), BoxError>> {
    Box::pin(async move {
        match chain.get(index) {
            None => Ok(()),
            Some(middleware) => {
                let next = Next {
                    chain,
                    index: index + 1,
                };
                middleware
                    .execute(ctx, next)
                    .await
                    .map_err(|err| attribute(middleware.name(), err))
            }
        }
    })
}

/// Run `ctx` through the whole chain. The innermost position (past the last
/// middleware) is a successful no-op; the engine commits only after this
/// returns `Ok`.
pub(crate) async fn run_chain(
    chain: &[Arc<dyn Middleware>],
    ctx: &mut TransitionContext,
) -> Result<(), BoxError> {
    dispatch(chain, 0, ctx).await
}

/// Map a pipeline error to the public error type.
pub(crate) fn into_flow_error(err: BoxError) -> FlowError {
    match err.downcast::<FlowError>() {
        Ok(flow) => *flow,
        Err(err) => match err.downcast::<TransitionError>() {
            Ok(transition) => FlowError::Transition(*transition),
            Err(err) => match err.downcast::<MiddlewareError>() {
                Ok(middleware) => FlowError::Middleware(*middleware),
                Err(err) => FlowError::Middleware(MiddlewareError {
                    name: "<pipeline>".to_string(),
                    source: err,
                }),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TransitionChange;
    use crate::core::{Stage, StageRegistry};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn ctx() -> TransitionContext {
        let stages = vec![Stage::new("a"), Stage::new("b"), Stage::new("c")];
        let registry = Arc::new(StageRegistry::new("a".to_string(), stages).unwrap());
        TransitionContext::new("a".to_string(), "b".to_string(), None, None, registry)
    }

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(
            &self,
            ctx: &mut TransitionContext,
            next: Next<'_>,
        ) -> Result<(), BoxError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:before", self.name));
            next.run(ctx).await?;
            self.log.lock().unwrap().push(format!("{}:after", self.name));
            Ok(())
        }
    }

    struct Canceller;

    #[async_trait]
    impl Middleware for Canceller {
        fn name(&self) -> &str {
            "canceller"
        }

        async fn execute(
            &self,
            ctx: &mut TransitionContext,
            _next: Next<'_>,
        ) -> Result<(), BoxError> {
            Err(ctx.cancel())
        }
    }

    struct Faulty;

    #[async_trait]
    impl Middleware for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }

        async fn execute(
            &self,
            _ctx: &mut TransitionContext,
            _next: Next<'_>,
        ) -> Result<(), BoxError> {
            Err("disk full".into())
        }
    }

    struct Rewriter;

    #[async_trait]
    impl Middleware for Rewriter {
        fn name(&self) -> &str {
            "rewriter"
        }

        async fn execute(
            &self,
            ctx: &mut TransitionContext,
            next: Next<'_>,
        ) -> Result<(), BoxError> {
            ctx.modify(TransitionChange {
                to: Some("c".to_string()),
                data: Some(json!({"rewritten": true})),
            })?;
            next.run(ctx).await
        }
    }

    struct Replayer {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Middleware for Replayer {
        fn name(&self) -> &str {
            "replayer"
        }

        async fn execute(
            &self,
            ctx: &mut TransitionContext,
            next: Next<'_>,
        ) -> Result<(), BoxError> {
            let resume = next.index();
            if next.run(ctx).await.is_err() {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                next.run_from(ctx, resume).await
            } else {
                Ok(())
            }
        }
    }

    struct FailOnce {
        failed: AtomicUsize,
    }

    #[async_trait]
    impl Middleware for FailOnce {
        fn name(&self) -> &str {
            "fail-once"
        }

        async fn execute(
            &self,
            ctx: &mut TransitionContext,
            next: Next<'_>,
        ) -> Result<(), BoxError> {
            if self.failed.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err("transient".into());
            }
            next.run(ctx).await
        }
    }

    #[tokio::test]
    async fn chain_runs_in_onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Recorder {
                name: "outer".to_string(),
                log: log.clone(),
            }),
            Arc::new(Recorder {
                name: "inner".to_string(),
                log: log.clone(),
            }),
        ];

        run_chain(&chain, &mut ctx()).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer:before", "inner:before", "inner:after", "outer:after"]
        );
    }

    #[tokio::test]
    async fn empty_chain_is_a_no_op() {
        run_chain(&[], &mut ctx()).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_short_circuits_downstream() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Canceller),
            Arc::new(Recorder {
                name: "unreached".to_string(),
                log: log.clone(),
            }),
        ];

        let err = run_chain(&chain, &mut ctx()).await.unwrap_err();
        assert!(into_flow_error(err).is_cancelled());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unexpected_error_is_attributed() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(Faulty)];
        let err = run_chain(&chain, &mut ctx()).await.unwrap_err();
        match into_flow_error(err) {
            FlowError::Middleware(m) => {
                assert_eq!(m.name, "faulty");
                assert_eq!(m.source.to_string(), "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn rewrite_is_visible_downstream() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(Rewriter)];
        let mut ctx = ctx();
        run_chain(&chain, &mut ctx).await.unwrap();
        assert_eq!(ctx.to(), "c");
        assert_eq!(ctx.data(), Some(&json!({"rewritten": true})));
    }

    #[tokio::test]
    async fn run_from_replays_the_chain_suffix() {
        let replayer = Arc::new(Replayer {
            attempts: AtomicUsize::new(0),
        });
        let chain: Vec<Arc<dyn Middleware>> = vec![
            replayer.clone(),
            Arc::new(FailOnce {
                failed: AtomicUsize::new(0),
            }),
        ];

        run_chain(&chain, &mut ctx()).await.unwrap();
        assert_eq!(replayer.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_calling_next_skips_the_rest() {
        struct Swallow;

        #[async_trait]
        impl Middleware for Swallow {
            fn name(&self) -> &str {
                "swallow"
            }

            async fn execute(
                &self,
                _ctx: &mut TransitionContext,
                _next: Next<'_>,
            ) -> Result<(), BoxError> {
                Ok(())
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Swallow),
            Arc::new(Recorder {
                name: "unreached".to_string(),
                log: log.clone(),
            }),
        ];

        run_chain(&chain, &mut ctx()).await.unwrap();
        assert!(log.lock().unwrap().is_empty());
    }
}
