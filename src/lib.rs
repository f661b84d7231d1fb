//! Flowstage: an embeddable stage-flow engine
//!
//! Flowstage drives an application through named **stages** connected by
//! declared **transitions**. Transitions are triggered by events, elapsed
//! time, or direct jumps, gated by async conditions, and observable and
//! rewritable by middleware and plugins. The engine never renders anything;
//! stages carry opaque `effect` references for whatever layer sits above.
//!
//! # Core Concepts
//!
//! - **Stage**: a named state with ordered outgoing transitions, optional
//!   default data, and async enter/exit hooks
//! - **Transition**: an edge triggered by an event (`on`), a delay (`after`),
//!   or a direct jump, optionally gated by an async condition
//! - **Middleware**: an onion pipeline around each transition that can
//!   cancel or rewrite it before anything commits
//! - **Plugin**: a named extension with declared dependencies, installed in
//!   dependency order, observing lifecycle and transitions
//! - **History**: an append-only record of every stage the flow visited
//!
//! # Example
//!
//! ```rust
//! use flowstage::{FlowEngine, Stage, TransitionDef};
//! use std::time::Duration;
//!
//! let engine = FlowEngine::builder()
//!     .initial("intro")
//!     .stage(
//!         Stage::new("intro")
//!             .transition(TransitionDef::on("skip", "menu"))
//!             .transition(TransitionDef::after(Duration::from_secs(5), "menu")),
//!     )
//!     .stage(Stage::new("menu").with_effect("fade-in"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(engine.current_stage(), "intro");
//! ```
//!
//! Transitions run on a tokio executor: `engine.start().await?`, then
//! `engine.send("skip", None).await?` or `engine.go_to("menu", None).await?`.
//! Both return `Ok(true)` only when a transition actually committed.

pub mod builder;
pub mod context;
pub mod core;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod plugins;
pub mod resolver;
pub mod timers;

// Re-export commonly used types
pub use builder::EngineBuilder;
pub use context::{EnginePort, StageContext, TransitionChange, TransitionContext};
pub use crate::core::{
    EngineState, FlowHistory, FlowState, HistoryEntry, SnapshotError, Stage, StageRegistry,
    TransitionDef,
};
pub use engine::{FlowEngine, SubscriptionId};
pub use error::{
    BoxError, ConfigurationError, FlowError, MiddlewareError, PluginError, TransitionError,
};
pub use middleware::{Middleware, Next};
pub use plugins::{Plugin, PluginHost};
pub use resolver::Trigger;
pub use timers::{RetryPolicy, TimerKey, TimerStateSnapshot};
