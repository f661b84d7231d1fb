//! Engine facade and lifecycle coordination.
//!
//! `FlowEngine` is a cheaply cloneable handle over shared engine internals.
//! It owns the single mutable `FlowState`, serializes lifecycle changes, and
//! guarantees at most one in-flight transition with an atomic flag that is
//! cleared on every exit path. Timer delay tasks hold only a weak handle, so
//! dropping the last engine clone tears the timers down with it.

use crate::builder::EngineBuilder;
use crate::context::{EnginePort, StageContext, TransitionContext};
use crate::core::stage::StageHook;
use crate::core::{EngineState, FlowHistory, FlowState, StageRegistry};
use crate::error::{FlowError, PluginError, TransitionError};
use crate::middleware::{self, Middleware};
use crate::plugins::{self, Plugin, PluginHost};
use crate::resolver::{self, Trigger};
use crate::timers::{RetryPolicy, TimerKey, TimerScheduler, TimerStateSnapshot};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PHASE_IDLE: u8 = 0;
const PHASE_RUNNING: u8 = 1;

type SubscriberFn = Arc<dyn Fn(&str, Option<&Value>) + Send + Sync>;

/// Handle returned by [`FlowEngine::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionId(u64);

pub(crate) struct EngineInner {
    registry: Arc<StageRegistry>,
    state: Mutex<FlowState>,
    middleware: Mutex<Vec<Arc<dyn Middleware>>>,
    plugins: Mutex<PluginHost>,
    timers: TimerScheduler,
    effects: HashMap<String, Value>,
    phase: AtomicU8,
    /// The sole concurrency guard: true exactly while a transition (or a
    /// stage-data update) is executing.
    transitioning: AtomicBool,
    /// Serializes start/stop/reset against each other.
    lifecycle: tokio::sync::Mutex<()>,
    subscribers: Mutex<Vec<(u64, SubscriberFn)>>,
    next_subscriber: AtomicU64,
}

/// Outcome of a single timer firing attempt.
enum FireOutcome {
    /// The transition path ran to completion (committed or declined).
    Fired,
    /// The timer no longer applies; dropped without retrying.
    Discarded,
    /// The transition attempt errored; eligible for retry.
    Failed,
}

/// RAII guard over the in-flight flag. Dropping it on any path, including
/// panics and early returns, releases the engine for the next transition.
struct TransitionGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Weak engine handle held by spawned timer tasks.
#[derive(Clone)]
struct WeakEngine {
    inner: Weak<EngineInner>,
}

impl WeakEngine {
    fn upgrade(&self) -> Option<FlowEngine> {
        self.inner.upgrade().map(|inner| FlowEngine { inner })
    }
}

/// Port through which contexts re-enter the engine without keeping it alive.
struct PortHandle {
    inner: Weak<EngineInner>,
}

impl EnginePort for PortHandle {
    fn send(
        &self,
        event: String,
        data: Option<Value>,
    ) -> BoxFuture<'static, Result<bool, FlowError>> {
        let weak = self.inner.clone();
        async move {
            match weak.upgrade() {
                Some(inner) => FlowEngine { inner }.send(event, data).await,
                None => Err(FlowError::Transition(TransitionError::NotStarted)),
            }
        }
        .boxed()
    }

    fn go_to(
        &self,
        stage: String,
        data: Option<Value>,
    ) -> BoxFuture<'static, Result<bool, FlowError>> {
        let weak = self.inner.clone();
        async move {
            match weak.upgrade() {
                Some(inner) => FlowEngine { inner }.go_to(stage, data).await,
                None => Err(FlowError::Transition(TransitionError::NotStarted)),
            }
        }
        .boxed()
    }
}

/// The stage-flow engine.
///
/// Clones share one engine. Construct through [`FlowEngine::builder`], then
/// [`start`](Self::start) it; transitions are driven with
/// [`send`](Self::send) and [`go_to`](Self::go_to), both of which return
/// `Ok(true)` only when a transition actually committed.
#[derive(Clone)]
pub struct FlowEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl FlowEngine {
    /// Start building an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub(crate) fn from_parts(
        registry: StageRegistry,
        plugins: PluginHost,
        middleware: Vec<Arc<dyn Middleware>>,
        effects: HashMap<String, Value>,
        policy: RetryPolicy,
    ) -> Self {
        let initial = registry.initial().to_string();
        Self {
            inner: Arc::new(EngineInner {
                registry: Arc::new(registry),
                state: Mutex::new(FlowState::new(initial)),
                middleware: Mutex::new(middleware),
                plugins: Mutex::new(plugins),
                timers: TimerScheduler::new(policy),
                effects,
                phase: AtomicU8::new(PHASE_IDLE),
                transitioning: AtomicBool::new(false),
                lifecycle: tokio::sync::Mutex::new(()),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    // ---- lifecycle ----------------------------------------------------

    /// Start the engine: install plugins in dependency order, run the
    /// current stage's enter hooks, notify subscribers, arm timers.
    ///
    /// Idempotent while running. A plugin install failure rolls back the
    /// plugins installed by this call and leaves the engine stopped.
    pub async fn start(&self) -> Result<(), FlowError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.is_running() {
            return Ok(());
        }

        let ordered = self.lock_plugins().ordered();
        let mut installed_now: Vec<Arc<dyn Plugin>> = Vec::new();
        for plugin in &ordered {
            if self.lock_plugins().is_installed(plugin.name()) {
                continue;
            }
            match plugin.install().await {
                Ok(()) => {
                    self.lock_plugins().mark_installed(plugin.name(), true);
                    installed_now.push(plugin.clone());
                }
                Err(source) => {
                    for undone in installed_now.iter().rev() {
                        if let Err(err) = undone.uninstall().await {
                            warn!(plugin = undone.name(), error = %err, "rollback uninstall failed");
                        }
                        self.lock_plugins().mark_installed(undone.name(), false);
                    }
                    return Err(PluginError::InstallFailed {
                        plugin: plugin.name().to_string(),
                        source,
                    }
                    .into());
                }
            }
        }

        self.inner.phase.store(PHASE_RUNNING, Ordering::SeqCst);

        let (current, data) = self.current_snapshot();
        let ctx = StageContext::new(current.clone(), data.clone(), self.port());
        if let Some(stage) = self.inner.registry.get(&current) {
            self.run_stage_hook(&stage.on_enter, "on_enter", ctx.clone())
                .await;
        }
        plugins::run_stage_enter(&self.installed_plugins(), &ctx).await;
        self.arm_stage(&current);
        self.notify(&current, data.as_ref());

        info!(stage = %current, "engine started");
        Ok(())
    }

    /// Stop the engine: tear down timers, run the current stage's exit
    /// hooks, uninstall plugins in reverse dependency order.
    ///
    /// Idempotent while stopped. Uninstall failures are logged and do not
    /// keep the engine running.
    pub async fn stop(&self) -> Result<(), FlowError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if !self.is_running() {
            return Ok(());
        }

        self.inner.timers.clear_all();

        let (current, data) = self.current_snapshot();
        let ctx = StageContext::new(current.clone(), data, self.port());
        if let Some(stage) = self.inner.registry.get(&current) {
            self.run_stage_hook(&stage.on_exit, "on_exit", ctx.clone())
                .await;
        }
        let installed = self.installed_plugins();
        plugins::run_stage_exit(&installed, &ctx).await;

        for plugin in installed.iter().rev() {
            if let Err(err) = plugin.uninstall().await {
                warn!(plugin = plugin.name(), error = %err, "uninstall failed");
            }
            self.lock_plugins().mark_installed(plugin.name(), false);
            self.lock_state().plugin_state.remove(plugin.name());
        }

        self.inner.phase.store(PHASE_IDLE, Ordering::SeqCst);
        info!(stage = %current, "engine stopped");
        Ok(())
    }

    /// Return the flow to its initial stage with history, data, and plugin
    /// state cleared. A running engine is stopped first and restarted after.
    pub async fn reset(&self) -> Result<(), FlowError> {
        let was_running = self.is_running();
        if was_running {
            self.stop().await?;
        }
        {
            let mut state = self.lock_state();
            let initial = self.inner.registry.initial().to_string();
            state.reset(&initial);
        }
        info!("engine reset");
        if was_running {
            self.start().await?;
        }
        Ok(())
    }

    /// Whether the engine is between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.inner.phase.load(Ordering::SeqCst) == PHASE_RUNNING
    }

    // ---- transitions --------------------------------------------------

    /// Dispatch an event against the current stage.
    ///
    /// `Ok(true)` when a transition committed; `Ok(false)` when no declared
    /// transition matches the event or its condition declined. Rejected with
    /// [`TransitionError::InProgress`] while another transition is running.
    pub async fn send(
        &self,
        event: impl Into<String>,
        data: Option<Value>,
    ) -> Result<bool, FlowError> {
        self.ensure_running()?;
        let _guard = self.begin_transition()?;
        self.execute_transition(Trigger::Event(event.into()), data)
            .await
    }

    /// Jump directly to a stage.
    ///
    /// When the current stage declares a transition to the target, that
    /// transition is used and its condition is honored. Otherwise an
    /// implicit, ungated transition is synthesized, provided the target is a
    /// declared stage.
    pub async fn go_to(
        &self,
        stage: impl Into<String>,
        data: Option<Value>,
    ) -> Result<bool, FlowError> {
        self.ensure_running()?;
        let _guard = self.begin_transition()?;
        self.execute_transition(Trigger::Direct(stage.into()), data)
            .await
    }

    /// Replace the current stage's data without transitioning. Subscribers
    /// are notified. Rejected while a transition is in flight.
    pub fn set_stage_data(&self, data: Option<Value>) -> Result<(), FlowError> {
        self.ensure_running()?;
        let _guard = self.begin_transition()?;
        let current = {
            let mut state = self.lock_state();
            state.data = data.clone();
            state.current.clone()
        };
        self.notify(&current, data.as_ref());
        Ok(())
    }

    /// Runs with the transition guard already held by the caller.
    async fn execute_transition(
        &self,
        trigger: Trigger,
        provided: Option<Value>,
    ) -> Result<bool, FlowError> {
        let (from, from_data) = self.current_snapshot();
        let registry = self.inner.registry.clone();
        let stage = registry
            .get(&from)
            .ok_or_else(|| TransitionError::UnknownStage(from.clone()))?;

        let event = match &trigger {
            Trigger::Event(event) => Some(event.clone()),
            _ => None,
        };

        let transition = match resolver::find_transition(stage, &trigger) {
            Some(found) => found.clone(),
            None => match &trigger {
                // Unmatched events and stale timers are no-ops.
                Trigger::Event(_) | Trigger::Timer { .. } => return Ok(false),
                // A direct jump with no declared edge is synthesized, gated
                // only on the target existing.
                Trigger::Direct(target) => {
                    if !registry.contains(target) {
                        return Err(TransitionError::UnknownStage(target.clone()).into());
                    }
                    crate::core::TransitionDef::to(target.clone())
                }
            },
        };

        let guard_ctx = StageContext::new(from.clone(), from_data.clone(), self.port());
        if !resolver::evaluate_condition(&transition, &from, event.as_deref(), guard_ctx).await? {
            debug!(from = %from, to = %transition.target, "condition declined transition");
            return Ok(false);
        }

        let target_default = registry.get(&transition.target).and_then(|s| s.data.clone());
        let data = provided.or(target_default);
        let mut ctx = TransitionContext::new(
            from.clone(),
            transition.target.clone(),
            event,
            data,
            registry.clone(),
        );

        let chain: Vec<Arc<dyn Middleware>> = {
            let global = self.lock_middleware();
            global
                .iter()
                .cloned()
                .chain(transition.middleware.iter().cloned())
                .collect()
        };
        middleware::run_chain(&chain, &mut ctx)
            .await
            .map_err(middleware::into_flow_error)?;

        let installed = self.installed_plugins();
        plugins::run_before_transition(&installed, &ctx).await;

        // Exit phase for the stage being left.
        let exit_ctx = StageContext::new(from.clone(), from_data, self.port());
        self.run_stage_hook(&stage.on_exit, "on_exit", exit_ctx.clone())
            .await;
        plugins::run_stage_exit(&installed, &exit_ctx).await;
        self.inner.timers.clear_stage(&from);

        // Commit. The target is re-read from the context since middleware
        // may have rewritten it; `modify` already validated it exists.
        let to = ctx.to().to_string();
        let committed = ctx.data().cloned();
        self.lock_state().commit(to.clone(), committed.clone());
        debug!(from = %from, to = %to, "transition committed");

        let enter_ctx = StageContext::new(to.clone(), committed.clone(), self.port());
        if let Some(new_stage) = registry.get(&to) {
            self.run_stage_hook(&new_stage.on_enter, "on_enter", enter_ctx.clone())
                .await;
        }
        plugins::run_stage_enter(&installed, &enter_ctx).await;
        plugins::run_after_transition(&installed, &ctx).await;

        self.arm_stage(&to);
        self.notify(&to, committed.as_ref());
        Ok(true)
    }

    // ---- timers -------------------------------------------------------

    /// Freeze the current stage's timers.
    pub fn pause_timers(&self) {
        let (current, _) = self.current_snapshot();
        self.inner.timers.pause_stage(&current);
    }

    /// Unfreeze the current stage's timers, continuing from where they were
    /// paused.
    pub fn resume_timers(&self) {
        let (current, _) = self.current_snapshot();
        let resumed = self.inner.timers.resume_stage(&current);
        self.spawn_all(resumed);
    }

    /// Restart the current stage's timers from their full declared delays.
    pub fn reset_timers(&self) {
        let (current, _) = self.current_snapshot();
        let reset = self.inner.timers.reset_stage(&current);
        self.spawn_all(reset);
    }

    /// Smallest remaining delay among the current stage's timers.
    pub fn timer_remaining(&self) -> Option<Duration> {
        let (current, _) = self.current_snapshot();
        self.inner.timers.remaining_for_stage(&current)
    }

    /// True when the current stage has timers and all of them are paused.
    pub fn timers_paused(&self) -> bool {
        let (current, _) = self.current_snapshot();
        self.inner.timers.stage_paused(&current)
    }

    /// Cancel the current stage's timer into `target`. Returns whether a
    /// timer was cancelled.
    pub fn cancel_timer(&self, target: &str) -> bool {
        let (current, _) = self.current_snapshot();
        self.inner.timers.cancel(&current, target)
    }

    /// Capture all live timers for persistence.
    pub fn serialize_timer_state(&self) -> TimerStateSnapshot {
        self.inner.timers.snapshot()
    }

    /// Re-arm the current stage's timers from a snapshot, deducting the
    /// wall-clock time elapsed since it was taken. Timers the snapshot holds
    /// for other stages are ignored.
    pub fn restore_timer_state(&self, snapshot: &TimerStateSnapshot) {
        let (current, _) = self.current_snapshot();
        let respawn = self.inner.timers.restore_into(&current, snapshot);
        self.spawn_all(respawn);
    }

    fn arm_stage(&self, stage_name: &str) {
        if let Some(stage) = self.inner.registry.get(stage_name) {
            let planned = self.inner.timers.plan_stage(stage);
            self.spawn_all(planned);
        }
    }

    fn spawn_all(&self, planned: Vec<(TimerKey, Duration)>) {
        for (key, delay) in planned {
            let handle = self.spawn_timer(key.clone(), delay);
            self.inner.timers.attach_handle(&key, handle);
        }
    }

    /// One task per armed timer: sleep, fire, and on failure loop with
    /// bounded backoff. The task holds only a weak engine handle.
    fn spawn_timer(&self, key: TimerKey, delay: Duration) -> JoinHandle<()> {
        let weak = WeakEngine {
            inner: Arc::downgrade(&self.inner),
        };
        let policy = self.inner.timers.policy();
        tokio::spawn(async move {
            let mut delay = delay;
            loop {
                tokio::time::sleep(delay).await;
                let engine = match weak.upgrade() {
                    Some(engine) => engine,
                    None => return,
                };
                match engine.fire_timer(&key).await {
                    FireOutcome::Fired | FireOutcome::Discarded => return,
                    FireOutcome::Failed => {
                        let attempt = match engine.inner.timers.note_retry(&key) {
                            Some(attempt) => attempt,
                            None => return,
                        };
                        if attempt > policy.max_retries {
                            engine.abandon_timer(&key, attempt);
                            return;
                        }
                        delay = policy.backoff(attempt);
                        warn!(
                            stage = %key.stage,
                            target = %key.target,
                            attempt,
                            retry_in_ms = delay.as_millis() as u64,
                            "timer transition failed, retrying"
                        );
                    }
                }
            }
        })
    }

    async fn fire_timer(&self, key: &TimerKey) -> FireOutcome {
        if !self.is_running() || !self.inner.timers.is_armed(key) {
            return FireOutcome::Discarded;
        }
        {
            let state = self.lock_state();
            if state.current != key.stage {
                drop(state);
                self.inner.timers.remove(key);
                return FireOutcome::Discarded;
            }
        }

        let guard = match self.begin_transition() {
            Ok(guard) => guard,
            // A timer landing mid-transition is stale by definition.
            Err(TransitionError::InProgress) => {
                self.inner.timers.remove(key);
                return FireOutcome::Discarded;
            }
            Err(_) => return FireOutcome::Discarded,
        };
        let _guard = guard;

        let trigger = Trigger::Timer {
            target: key.target.clone(),
            after: key.duration,
        };
        match self.execute_transition(trigger, None).await {
            Ok(_) => {
                self.inner.timers.remove(key);
                FireOutcome::Fired
            }
            Err(err) => {
                warn!(stage = %key.stage, target = %key.target, error = %err, "timer fire errored");
                FireOutcome::Failed
            }
        }
    }

    fn abandon_timer(&self, key: &TimerKey, attempts: u32) {
        self.inner.timers.remove(key);
        warn!(
            stage = %key.stage,
            target = %key.target,
            attempts,
            "timer abandoned after exhausting retries"
        );
    }

    // ---- middleware ---------------------------------------------------

    /// Append a global middleware. Names must be unique.
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) -> Result<(), FlowError> {
        let mut global = self.lock_middleware_mut();
        if global.iter().any(|m| m.name() == middleware.name()) {
            return Err(crate::error::ConfigurationError::DuplicateMiddleware(
                middleware.name().to_string(),
            )
            .into());
        }
        global.push(middleware);
        Ok(())
    }

    /// Remove a global middleware by name. Returns whether one was removed.
    pub fn remove_middleware(&self, name: &str) -> bool {
        let mut global = self.lock_middleware_mut();
        let before = global.len();
        global.retain(|m| m.name() != name);
        global.len() != before
    }

    // ---- plugins ------------------------------------------------------

    /// Register a plugin. On a running engine its `install` hook runs
    /// immediately; failure rolls the registration back.
    pub async fn install_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<(), FlowError> {
        let name = plugin.name().to_string();
        self.lock_plugins().register(plugin.clone())?;

        if self.is_running() {
            if let Err(source) = plugin.install().await {
                // Nothing can depend on it yet, so removal cannot fail with
                // a dependency error.
                let _ = self.lock_plugins().remove(&name);
                return Err(PluginError::InstallFailed {
                    plugin: name,
                    source,
                }
                .into());
            }
            self.lock_plugins().mark_installed(&name, true);
        }
        Ok(())
    }

    /// Remove a plugin nothing else depends on, running its `uninstall`
    /// hook when it was installed. Any state stored for the plugin is
    /// discarded.
    pub async fn uninstall_plugin(&self, name: &str) -> Result<(), FlowError> {
        let was_installed = self.lock_plugins().is_installed(name);
        let plugin = self.lock_plugins().remove(name)?;
        self.lock_state().plugin_state.remove(name);
        if was_installed {
            plugin
                .uninstall()
                .await
                .map_err(|source| PluginError::UninstallFailed {
                    plugin: name.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// State stored for a plugin, if any.
    pub fn plugin_state(&self, name: &str) -> Option<Value> {
        self.lock_state().plugin_state.get(name).cloned()
    }

    /// Store state for a registered plugin.
    pub fn set_plugin_state(&self, name: &str, value: Value) -> Result<(), FlowError> {
        if !self.lock_plugins().contains(name) {
            return Err(PluginError::NotRegistered(name.to_string()).into());
        }
        self.lock_state()
            .plugin_state
            .insert(name.to_string(), value);
        Ok(())
    }

    // ---- observation --------------------------------------------------

    /// Subscribe to stage changes. The callback runs after every commit,
    /// after a stage-data update, and on start, with the stage name and its
    /// data.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str, Option<&Value>) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.lock_subscribers().push((id, Arc::new(callback)));
        SubscriptionId(id)
    }

    /// Drop a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock_subscribers();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id.0);
        subscribers.len() != before
    }

    /// Name of the stage the flow is currently in.
    pub fn current_stage(&self) -> String {
        self.lock_state().current.clone()
    }

    /// Data committed with the current stage.
    pub fn current_data(&self) -> Option<Value> {
        self.lock_state().data.clone()
    }

    /// Copy of the visit history.
    pub fn history(&self) -> FlowHistory {
        self.lock_state().history.clone()
    }

    /// Versioned, serializable snapshot of the flow state.
    pub fn state(&self) -> EngineState {
        let state = self.lock_state();
        EngineState::capture(self.inner.registry.initial(), &state)
    }

    /// Opaque effect reference declared on a stage.
    pub fn stage_effect(&self, stage: &str) -> Option<String> {
        self.inner.registry.get(stage).and_then(|s| s.effect.clone())
    }

    /// Named effect definition from the effects registry. The engine never
    /// interprets these; they exist for rendering layers.
    pub fn effect(&self, name: &str) -> Option<&Value> {
        self.inner.effects.get(name)
    }

    // ---- internals ----------------------------------------------------

    fn ensure_running(&self) -> Result<(), TransitionError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(TransitionError::NotStarted)
        }
    }

    fn begin_transition(&self) -> Result<TransitionGuard<'_>, TransitionError> {
        self.inner
            .transitioning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| TransitionGuard {
                flag: &self.inner.transitioning,
            })
            .map_err(|_| TransitionError::InProgress)
    }

    fn port(&self) -> Arc<dyn EnginePort> {
        Arc::new(PortHandle {
            inner: Arc::downgrade(&self.inner),
        })
    }

    async fn run_stage_hook(&self, hook: &Option<StageHook>, which: &'static str, ctx: StageContext) {
        if let Some(hook) = hook {
            let stage = ctx.current().to_string();
            if let Err(err) = hook(ctx).await {
                warn!(stage = %stage, hook = which, error = %err, "stage hook failed");
            }
        }
    }

    fn notify(&self, stage: &str, data: Option<&Value>) {
        let callbacks: Vec<SubscriberFn> = self
            .lock_subscribers()
            .iter()
            .map(|(_, f)| f.clone())
            .collect();
        for callback in callbacks {
            callback(stage, data);
        }
    }

    fn current_snapshot(&self) -> (String, Option<Value>) {
        let state = self.lock_state();
        (state.current.clone(), state.data.clone())
    }

    fn installed_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.lock_plugins().installed_ordered()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FlowState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_plugins(&self) -> std::sync::MutexGuard<'_, PluginHost> {
        self.inner
            .plugins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_middleware(&self) -> Vec<Arc<dyn Middleware>> {
        self.inner
            .middleware
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_middleware_mut(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn Middleware>>> {
        self.inner
            .middleware
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<(u64, SubscriberFn)>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("current", &self.current_stage())
            .field("running", &self.is_running())
            .finish()
    }
}
