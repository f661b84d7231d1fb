//! Error taxonomy for the flow engine.
//!
//! Errors are grouped into four families matching the failure surfaces of the
//! engine: static configuration, transition execution, middleware execution,
//! and plugin lifecycle. `FlowError` is the umbrella type returned by the
//! public API.

use thiserror::Error;

/// Boxed error type for user-supplied callbacks (conditions, middleware,
/// hooks, plugin lifecycle functions).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors in the static configuration, fatal at construction.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("no initial stage specified. Call .initial(name) before .build()")]
    MissingInitialStage,

    #[error("no stages defined. Add at least one stage")]
    NoStages,

    #[error("stage name must not be empty")]
    EmptyStageName,

    #[error("stage '{0}' is declared more than once")]
    DuplicateStage(String),

    #[error("initial stage '{0}' is not declared")]
    UnknownInitialStage(String),

    #[error("stage '{stage}' has a transition to undeclared stage '{target}'")]
    UnknownTarget { stage: String, target: String },

    #[error("stage '{0}' declares more than one timed transition")]
    DuplicateTimer(String),

    #[error("middleware '{0}' is already registered")]
    DuplicateMiddleware(String),

    /// Plugin graph problems detected at construction (missing or circular
    /// dependencies among the configured plugins).
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// Errors raised while attempting a transition.
///
/// Guard failures and cancellations leave the flow state at the
/// pre-transition stage.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("engine is not started")]
    NotStarted,

    #[error("transition already in progress")]
    InProgress,

    #[error("Transition cancelled")]
    Cancelled,

    #[error("no stage named '{0}'")]
    UnknownStage(String),

    #[error("condition for '{from}' -> '{to}' failed: {source}")]
    ConditionFailed {
        from: String,
        to: String,
        event: Option<String>,
        #[source]
        source: BoxError,
    },
}

/// An unexpected error raised inside a middleware's `execute`, naming the
/// offending middleware. Cancellation and already-typed framework errors are
/// never wrapped into this.
#[derive(Debug, Error)]
#[error("middleware '{name}' failed: {source}")]
pub struct MiddlewareError {
    pub name: String,
    #[source]
    pub source: BoxError,
}

/// Plugin registration, lifecycle, and hook failures.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin name must not be empty")]
    EmptyName,

    #[error("plugin '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("plugin '{0}' is not registered")]
    NotRegistered(String),

    #[error("plugin '{plugin}' depends on unregistered plugin '{dependency}'")]
    MissingDependency { plugin: String, dependency: String },

    #[error("circular plugin dependency involving '{0}'")]
    CircularDependency(String),

    #[error("plugin '{plugin}' is still required by '{dependent}'")]
    StillRequired { plugin: String, dependent: String },

    #[error("plugin '{plugin}' failed to install: {source}")]
    InstallFailed {
        plugin: String,
        #[source]
        source: BoxError,
    },

    #[error("plugin '{plugin}' failed to uninstall: {source}")]
    UninstallFailed {
        plugin: String,
        #[source]
        source: BoxError,
    },

    #[error("plugin '{plugin}' hook '{hook}' failed: {source}")]
    HookFailed {
        plugin: String,
        hook: &'static str,
        #[source]
        source: BoxError,
    },
}

/// Umbrella error returned by the engine's public operations.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Middleware(#[from] MiddlewareError),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl FlowError {
    /// True for the cancellation sentinel produced by
    /// [`TransitionContext::cancel`](crate::context::TransitionContext::cancel).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FlowError::Transition(TransitionError::Cancelled))
    }
}
