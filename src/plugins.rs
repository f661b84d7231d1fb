//! Plugin trait and registration host.
//!
//! Plugins are named extensions with declared dependencies on other plugins.
//! The host validates registration, keeps a dependency-respecting order for
//! lifecycle and hook dispatch, and refuses removals that would strand a
//! dependent. Hook failures are isolated: they are logged and never abort a
//! transition.

use crate::context::{StageContext, TransitionContext};
use crate::error::{BoxError, PluginError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// A named engine extension.
///
/// Lifecycle: `install` runs when the engine starts (or immediately when the
/// plugin is added to a running engine), `uninstall` when the engine stops or
/// the plugin is removed. The transition and stage hooks observe flow
/// activity in dependency order; every hook defaults to a no-op.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique, non-empty plugin name.
    fn name(&self) -> &str;

    /// Plugin version, for diagnostics only.
    fn version(&self) -> &str {
        "0.0.0"
    }

    /// Names of plugins that must be installed before this one.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    async fn install(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn uninstall(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Observes a transition that passed its guard and the middleware
    /// pipeline, before anything is committed.
    async fn before_transition(&self, _ctx: &TransitionContext) -> Result<(), BoxError> {
        Ok(())
    }

    /// Observes a committed transition.
    async fn after_transition(&self, _ctx: &TransitionContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_stage_enter(&self, _ctx: &StageContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_stage_exit(&self, _ctx: &StageContext) -> Result<(), BoxError> {
        Ok(())
    }
}

struct RegisteredPlugin {
    plugin: Arc<dyn Plugin>,
    installed: bool,
}

/// Registry of plugins with a cached dependency order.
///
/// The host is synchronous record-keeping only; callers take ordered
/// snapshots and run the async lifecycle and hooks on those, so no lock ever
/// spans an await.
#[derive(Default)]
pub struct PluginHost {
    plugins: Vec<RegisteredPlugin>,
    /// Install order: dependencies before dependents. Rebuilt on every
    /// registration change.
    order: Vec<String>,
}

impl PluginHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a batch of plugins at construction time.
    ///
    /// Dependencies may resolve anywhere within the batch plus the already
    /// registered set; ordering and cycle detection run once at the end.
    pub fn register_many(&mut self, plugins: Vec<Arc<dyn Plugin>>) -> Result<(), PluginError> {
        for plugin in plugins {
            self.validate_name(plugin.name())?;
            self.plugins.push(RegisteredPlugin {
                plugin,
                installed: false,
            });
        }
        self.rebuild_order()
    }

    /// Register a single plugin at runtime. Its dependencies must already be
    /// registered.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        self.validate_name(plugin.name())?;
        for dependency in plugin.dependencies() {
            if !self.contains(&dependency) {
                return Err(PluginError::MissingDependency {
                    plugin: plugin.name().to_string(),
                    dependency,
                });
            }
        }
        self.plugins.push(RegisteredPlugin {
            plugin,
            installed: false,
        });
        self.rebuild_order()
    }

    /// Remove a plugin nothing else depends on.
    pub fn remove(&mut self, name: &str) -> Result<Arc<dyn Plugin>, PluginError> {
        let index = self
            .plugins
            .iter()
            .position(|r| r.plugin.name() == name)
            .ok_or_else(|| PluginError::NotRegistered(name.to_string()))?;

        for other in &self.plugins {
            if other.plugin.name() != name
                && other.plugin.dependencies().iter().any(|d| d == name)
            {
                return Err(PluginError::StillRequired {
                    plugin: name.to_string(),
                    dependent: other.plugin.name().to_string(),
                });
            }
        }

        let removed = self.plugins.remove(index).plugin;
        // Removing a node cannot introduce a cycle.
        self.order.retain(|n| n != name);
        Ok(removed)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.iter().any(|r| r.plugin.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .iter()
            .find(|r| r.plugin.name() == name)
            .map(|r| r.plugin.clone())
    }

    pub fn mark_installed(&mut self, name: &str, installed: bool) {
        if let Some(r) = self.plugins.iter_mut().find(|r| r.plugin.name() == name) {
            r.installed = installed;
        }
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.plugins
            .iter()
            .any(|r| r.plugin.name() == name && r.installed)
    }

    /// All registered plugins in install order (dependencies first).
    pub fn ordered(&self) -> Vec<Arc<dyn Plugin>> {
        self.order
            .iter()
            .filter_map(|name| self.get(name))
            .collect()
    }

    /// Installed plugins in install order, the set hooks dispatch over.
    pub fn installed_ordered(&self) -> Vec<Arc<dyn Plugin>> {
        self.order
            .iter()
            .filter(|name| self.is_installed(name))
            .filter_map(|name| self.get(name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    fn validate_name(&self, name: &str) -> Result<(), PluginError> {
        if name.is_empty() {
            return Err(PluginError::EmptyName);
        }
        if self.contains(name) {
            return Err(PluginError::AlreadyRegistered(name.to_string()));
        }
        Ok(())
    }

    /// Recompute the install order: iterative depth-first walk over the
    /// dependency edges with an explicit stack. A back edge into the
    /// in-progress set is a cycle.
    fn rebuild_order(&mut self) -> Result<(), PluginError> {
        enum Frame {
            Enter(String),
            Exit(String),
        }

        let deps: HashMap<String, Vec<String>> = self
            .plugins
            .iter()
            .map(|r| (r.plugin.name().to_string(), r.plugin.dependencies()))
            .collect();

        for (plugin, dependencies) in &deps {
            for dependency in dependencies {
                if !deps.contains_key(dependency) {
                    return Err(PluginError::MissingDependency {
                        plugin: plugin.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        let mut order = Vec::with_capacity(deps.len());
        let mut visited: HashSet<String> = HashSet::new();
        let mut visiting: HashSet<String> = HashSet::new();

        // Roots in registration order so independent plugins keep a stable,
        // predictable ordering.
        for root in self.plugins.iter().map(|r| r.plugin.name().to_string()) {
            if visited.contains(&root) {
                continue;
            }
            let mut stack = vec![Frame::Enter(root)];
            while let Some(frame) = stack.pop() {
                match frame {
                    Frame::Enter(name) => {
                        if visited.contains(&name) {
                            continue;
                        }
                        if !visiting.insert(name.clone()) {
                            return Err(PluginError::CircularDependency(name));
                        }
                        stack.push(Frame::Exit(name.clone()));
                        if let Some(dependencies) = deps.get(&name) {
                            for dependency in dependencies.iter().rev() {
                                if visiting.contains(dependency) {
                                    return Err(PluginError::CircularDependency(
                                        dependency.clone(),
                                    ));
                                }
                                if !visited.contains(dependency) {
                                    stack.push(Frame::Enter(dependency.clone()));
                                }
                            }
                        }
                    }
                    Frame::Exit(name) => {
                        visiting.remove(&name);
                        visited.insert(name.clone());
                        order.push(name);
                    }
                }
            }
        }

        self.order = order;
        Ok(())
    }
}

/// Run `before_transition` across installed plugins, isolating failures.
pub(crate) async fn run_before_transition(plugins: &[Arc<dyn Plugin>], ctx: &TransitionContext) {
    for plugin in plugins {
        if let Err(source) = plugin.before_transition(ctx).await {
            log_hook_failure(plugin.name(), "before_transition", source);
        }
    }
}

/// Run `after_transition` across installed plugins, isolating failures.
pub(crate) async fn run_after_transition(plugins: &[Arc<dyn Plugin>], ctx: &TransitionContext) {
    for plugin in plugins {
        if let Err(source) = plugin.after_transition(ctx).await {
            log_hook_failure(plugin.name(), "after_transition", source);
        }
    }
}

/// Run `on_stage_enter` across installed plugins, isolating failures.
pub(crate) async fn run_stage_enter(plugins: &[Arc<dyn Plugin>], ctx: &StageContext) {
    for plugin in plugins {
        if let Err(source) = plugin.on_stage_enter(ctx).await {
            log_hook_failure(plugin.name(), "on_stage_enter", source);
        }
    }
}

/// Run `on_stage_exit` across installed plugins, isolating failures.
pub(crate) async fn run_stage_exit(plugins: &[Arc<dyn Plugin>], ctx: &StageContext) {
    for plugin in plugins {
        if let Err(source) = plugin.on_stage_exit(ctx).await {
            log_hook_failure(plugin.name(), "on_stage_exit", source);
        }
    }
}

fn log_hook_failure(plugin: &str, hook: &'static str, source: BoxError) {
    let err = PluginError::HookFailed {
        plugin: plugin.to_string(),
        hook,
        source,
    };
    warn!(plugin, hook, error = %err, "plugin hook failed");
}
