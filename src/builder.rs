//! Builder for constructing engines.

use crate::core::{Stage, StageRegistry};
use crate::engine::FlowEngine;
use crate::error::ConfigurationError;
use crate::middleware::Middleware;
use crate::plugins::{Plugin, PluginHost};
use crate::timers::RetryPolicy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for constructing a [`FlowEngine`] with a fluent API.
///
/// All configuration is validated in [`build`](Self::build): stage names,
/// transition targets, timer multiplicity, middleware name uniqueness, and
/// the plugin dependency graph. A built engine is valid by construction.
///
/// # Example
///
/// ```rust
/// use flowstage::{FlowEngine, Stage, TransitionDef};
///
/// let engine = FlowEngine::builder()
///     .initial("intro")
///     .stage(Stage::new("intro").transition(TransitionDef::on("done", "menu")))
///     .stage(Stage::new("menu"))
///     .build()
///     .unwrap();
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    initial: Option<String>,
    stages: Vec<Stage>,
    plugins: Vec<Arc<dyn Plugin>>,
    middleware: Vec<Arc<dyn Middleware>>,
    effects: HashMap<String, Value>,
    retry_policy: RetryPolicy,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial stage (required).
    pub fn initial(mut self, name: impl Into<String>) -> Self {
        self.initial = Some(name.into());
        self
    }

    /// Add a stage.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Add multiple stages at once.
    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Register a plugin. Dependencies may be registered in any order
    /// within the builder.
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Append a global middleware. Order of addition is execution order.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Register a named effect definition. Opaque to the engine.
    pub fn effect(mut self, name: impl Into<String>, definition: Value) -> Self {
        self.effects.insert(name.into(), definition);
        self
    }

    /// Override the timer retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> Result<FlowEngine, ConfigurationError> {
        let initial = self.initial.ok_or(ConfigurationError::MissingInitialStage)?;
        let registry = StageRegistry::new(initial, self.stages)?;

        for (i, middleware) in self.middleware.iter().enumerate() {
            if self.middleware[..i]
                .iter()
                .any(|m| m.name() == middleware.name())
            {
                return Err(ConfigurationError::DuplicateMiddleware(
                    middleware.name().to_string(),
                ));
            }
        }

        let mut plugins = PluginHost::new();
        plugins.register_many(self.plugins)?;

        Ok(FlowEngine::from_parts(
            registry,
            plugins,
            self.middleware,
            self.effects,
            self.retry_policy,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TransitionContext;
    use crate::error::{BoxError, PluginError};
    use crate::middleware::Next;
    use async_trait::async_trait;
    use serde_json::json;

    struct NamedMiddleware(&'static str);

    #[async_trait]
    impl Middleware for NamedMiddleware {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(
            &self,
            ctx: &mut TransitionContext,
            next: Next<'_>,
        ) -> Result<(), BoxError> {
            next.run(ctx).await
        }
    }

    struct NamedPlugin {
        name: &'static str,
        deps: Vec<String>,
    }

    #[async_trait]
    impl Plugin for NamedPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn dependencies(&self) -> Vec<String> {
            self.deps.clone()
        }
    }

    #[test]
    fn build_requires_initial_stage() {
        let result = EngineBuilder::new().stage(Stage::new("a")).build();
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingInitialStage)
        ));
    }

    #[test]
    fn build_requires_stages() {
        let result = EngineBuilder::new().initial("a").build();
        assert!(matches!(result, Err(ConfigurationError::NoStages)));
    }

    #[test]
    fn build_rejects_duplicate_middleware_names() {
        let result = EngineBuilder::new()
            .initial("a")
            .stage(Stage::new("a"))
            .middleware(Arc::new(NamedMiddleware("audit")))
            .middleware(Arc::new(NamedMiddleware("audit")))
            .build();
        assert!(matches!(
            result,
            Err(ConfigurationError::DuplicateMiddleware(name)) if name == "audit"
        ));
    }

    #[test]
    fn build_rejects_cyclic_plugins() {
        let result = EngineBuilder::new()
            .initial("a")
            .stage(Stage::new("a"))
            .plugin(Arc::new(NamedPlugin {
                name: "p1",
                deps: vec!["p2".to_string()],
            }))
            .plugin(Arc::new(NamedPlugin {
                name: "p2",
                deps: vec!["p1".to_string()],
            }))
            .build();
        assert!(matches!(
            result,
            Err(ConfigurationError::Plugin(PluginError::CircularDependency(_)))
        ));
    }

    #[test]
    fn fluent_api_builds_engine() {
        let engine = EngineBuilder::new()
            .initial("a")
            .stages(vec![Stage::new("a"), Stage::new("b")])
            .middleware(Arc::new(NamedMiddleware("audit")))
            .plugin(Arc::new(NamedPlugin {
                name: "base",
                deps: Vec::new(),
            }))
            .effect("fade", json!({"duration_ms": 200}))
            .build()
            .unwrap();

        assert_eq!(engine.current_stage(), "a");
        assert!(!engine.is_running());
        assert_eq!(engine.effect("fade"), Some(&json!({"duration_ms": 200})));
    }
}
