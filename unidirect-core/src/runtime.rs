//! The runtime loop
//!
//! A [`Runtime`] owns the draft state, the published state, the action queue,
//! the effect registry and the running subscriptions. Every mutation happens
//! on whichever task owns the runtime.
//!
//! One outer dispatch is one *cycle*:
//! 1. Reduce queued actions in order, launching each reduction's effects right
//!    away. Actions those effects produce synchronously join the queue.
//! 2. Once the queue is empty, reconcile subscriptions against the draft.
//!    Anything they produce synchronously is drained the same way.
//! 3. Publish the draft exactly once.
//!
//! Dispatches made while a cycle is draining (from a reducer, an effect's run
//! function or a subscription's run function) only enqueue. Dispatches from
//! anywhere else travel through the inbox and become their own cycle.

use std::borrow::Cow;
use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::Application;
use crate::effect::Effect;
use crate::error::{Result, RuntimeError};
use crate::reducer::{Middleware, Reducer, ReducerAdapter};
use crate::registry::EffectRegistry;
use crate::subscriptions::{SubKey, Subscription, SubscriptionKey, SubscriptionSet};
use crate::task::{Inbox, Message, ReadySink, Source};
use crate::view::StateView;
use crate::Action;

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RuntimeId(u64);

impl RuntimeId {
    fn next() -> Self {
        Self(NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed))
    }
}

thread_local! {
    // The runtime currently draining on this thread, if any
    static DRAINING: Cell<Option<RuntimeId>> = const { Cell::new(None) };
}

/// Marks the current thread as draining `id` until dropped.
struct DrainGuard {
    previous: Option<RuntimeId>,
}

impl DrainGuard {
    fn enter(id: RuntimeId) -> Self {
        let previous = DRAINING.with(|draining| draining.replace(Some(id)));
        Self { previous }
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|draining| draining.set(self.previous));
    }
}

fn is_draining(id: RuntimeId) -> bool {
    DRAINING.with(|draining| draining.get() == Some(id))
}

fn report_closed(err: RuntimeError) {
    tracing::error!(error = %err, "Dispatch after teardown");
    debug_assert!(false, "dispatch after teardown: {err}");
}

/// Configuration for a [`Runtime`].
///
/// Per-action logging is middleware, see
/// [`LoggingMiddleware`](crate::LoggingMiddleware).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Name recorded on every cycle span and lifecycle log line.
    pub name: Cow<'static, str>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: Cow::Borrowed("runtime"),
        }
    }
}

impl RuntimeConfig {
    /// Set the runtime name.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }
}

/// The cycle's FIFO queue together with the receiving end of nested
/// dispatches.
///
/// Nested dispatches are merged before anything is appended or taken, so
/// every action sits in the order it was produced, whether it was dispatched
/// or yielded by a stream.
struct ActionQueue<A> {
    pending: VecDeque<A>,
    nested: mpsc::UnboundedReceiver<A>,
}

impl<A> ActionQueue<A> {
    fn new(nested: mpsc::UnboundedReceiver<A>) -> Self {
        Self {
            pending: VecDeque::new(),
            nested,
        }
    }

    fn collect_nested(&mut self) {
        while let Ok(action) = self.nested.try_recv() {
            self.pending.push_back(action);
        }
    }

    fn push_back(&mut self, action: A) {
        self.collect_nested();
        self.pending.push_back(action);
    }

    fn pop_front(&mut self) -> Option<A> {
        self.collect_nested();
        self.pending.pop_front()
    }

    fn is_empty(&mut self) -> bool {
        self.collect_nested();
        self.pending.is_empty()
    }

    fn close(&mut self) {
        self.nested.close();
    }
}

impl<A> ReadySink<A> for ActionQueue<A> {
    fn push_ready(&mut self, action: A) {
        self.push_back(action);
    }
}

/// Cloneable handle for sending actions to a runtime from any thread.
///
/// Called while the runtime is draining on the same thread, `dispatch` is a
/// nested call: the action joins the running cycle. From anywhere else it is
/// an outer dispatch that the runtime turns into a new cycle.
pub struct Dispatcher<A> {
    runtime: RuntimeId,
    inbox: Inbox<A>,
    nested: mpsc::UnboundedSender<A>,
}

impl<A> Clone for Dispatcher<A> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime,
            inbox: self.inbox.clone(),
            nested: self.nested.clone(),
        }
    }
}

impl<A> fmt::Debug for Dispatcher<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("runtime", &self.runtime.0)
            .field("closed", &self.inbox.is_closed())
            .finish()
    }
}

impl<A: Action> Dispatcher<A> {
    /// Send an action to the runtime.
    ///
    /// Dispatching after the runtime was torn down is a bug in the caller:
    /// it is logged and panics in debug builds.
    pub fn dispatch(&self, action: A) {
        if let Err(err) = self.try_dispatch(action) {
            report_closed(err);
        }
    }

    /// Send an action, returning [`RuntimeError::Closed`] if the runtime is gone.
    pub fn try_dispatch(&self, action: A) -> Result<()> {
        let delivered = if is_draining(self.runtime) {
            self.nested.send(action).is_ok()
        } else {
            self.inbox.send(Message::Dispatch(action)).is_ok()
        };

        if delivered {
            Ok(())
        } else {
            Err(RuntimeError::Closed)
        }
    }

    /// Whether the runtime has been torn down.
    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }

    /// A handle for a narrower action type that is embedded into `A` by `f`.
    ///
    /// ```ignore
    /// let settings: Pullback<SettingsAction> = dispatcher.pullback(AppAction::Settings);
    /// settings.dispatch(SettingsAction::ToggleDarkMode);
    /// ```
    pub fn pullback<B, F>(&self, f: F) -> Pullback<B>
    where
        B: 'static,
        F: Fn(B) -> A + Send + Sync + 'static,
    {
        let dispatcher = self.clone();
        Pullback {
            send: Arc::new(move |action| dispatcher.try_dispatch(f(action))),
        }
    }
}

/// A [`Dispatcher`] seen through an action embedding.
pub struct Pullback<B> {
    send: Arc<dyn Fn(B) -> Result<()> + Send + Sync>,
}

impl<B> Clone for Pullback<B> {
    fn clone(&self) -> Self {
        Self {
            send: Arc::clone(&self.send),
        }
    }
}

impl<B> fmt::Debug for Pullback<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pullback").finish_non_exhaustive()
    }
}

impl<B: 'static> Pullback<B> {
    /// Send an action; see [`Dispatcher::dispatch`].
    pub fn dispatch(&self, action: B) {
        if let Err(err) = self.try_dispatch(action) {
            report_closed(err);
        }
    }

    /// Send an action; see [`Dispatcher::try_dispatch`].
    pub fn try_dispatch(&self, action: B) -> Result<()> {
        (self.send)(action)
    }

    /// Narrow further.
    pub fn pullback<C, F>(&self, f: F) -> Pullback<C>
    where
        C: 'static,
        F: Fn(C) -> B + Send + Sync + 'static,
    {
        let send = Arc::clone(&self.send);
        Pullback {
            send: Arc::new(move |action| send(f(action))),
        }
    }
}

/// The unidirectional runtime loop.
///
/// # Type Parameters
///
/// - `S`: state, cloned once per cycle when it is published
/// - `A`: action type
/// - `Env`: environment shared with effects and subscriptions
/// - `K`: subscription key type
///
/// Most applications use [`start`] and talk to the spawned loop through a
/// [`RuntimeHandle`]. Driving a `Runtime` by hand is useful in tests, see
/// [`Runtime::process_pending`] and [`Runtime::step`].
pub struct Runtime<S, A: Action, Env, K = SubKey> {
    id: RuntimeId,
    config: RuntimeConfig,
    draft: S,
    published: watch::Sender<S>,
    queue: ActionQueue<A>,
    cycles: u64,
    adapter: ReducerAdapter<S, A, Env>,
    subscriptions_fn: Box<dyn Fn(&S) -> Vec<Subscription<A, Env, K>> + Send>,
    registry: EffectRegistry<A>,
    subscriptions: SubscriptionSet<A, K>,
    env: Arc<Env>,
    inbox_tx: Inbox<A>,
    inbox_rx: mpsc::UnboundedReceiver<Message<A>>,
    nested_tx: mpsc::UnboundedSender<A>,
}

impl<S, A, Env, K> Runtime<S, A, Env, K>
where
    S: Clone + Send + Sync + 'static,
    A: Action,
    Env: Send + Sync + 'static,
    K: SubscriptionKey,
{
    /// Create a runtime. Nothing runs until [`boot`](Self::boot) or the first
    /// dispatch.
    pub fn new<R, F>(initial_state: S, reducer: R, subscriptions: F, env: impl Into<Arc<Env>>) -> Self
    where
        R: Reducer<S, A, Env> + 'static,
        F: Fn(&S) -> Vec<Subscription<A, Env, K>> + Send + 'static,
    {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (nested_tx, nested_rx) = mpsc::unbounded_channel();
        let (published, _) = watch::channel(initial_state.clone());

        Self {
            id: RuntimeId::next(),
            config: RuntimeConfig::default(),
            draft: initial_state,
            published,
            queue: ActionQueue::new(nested_rx),
            cycles: 0,
            adapter: ReducerAdapter::new(reducer),
            subscriptions_fn: Box::new(subscriptions),
            registry: EffectRegistry::new(inbox_tx.clone()),
            subscriptions: SubscriptionSet::new(inbox_tx.clone()),
            env: env.into(),
            inbox_tx,
            inbox_rx,
            nested_tx,
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Add middleware around every reduction.
    pub fn with_middleware<M: Middleware<A> + 'static>(mut self, middleware: M) -> Self {
        self.adapter.add_middleware(middleware);
        self
    }

    /// Run the bootstrap cycle: launch `initial_effects`, drain what they
    /// produce synchronously, reconcile subscriptions and publish.
    pub fn boot(&mut self, initial_effects: Vec<Effect<A, Env>>) {
        tracing::debug!(
            runtime = %self.config.name,
            effects = initial_effects.len(),
            "Runtime booting"
        );
        self.cycle(initial_effects);
    }

    /// Outer dispatch on the runtime's own context. Runs a full cycle before
    /// returning.
    pub fn dispatch(&mut self, action: A) {
        self.queue.push_back(action);
        self.cycle(Vec::new());
    }

    /// A handle that can dispatch from anywhere.
    pub fn dispatcher(&self) -> Dispatcher<A> {
        Dispatcher {
            runtime: self.id,
            inbox: self.inbox_tx.clone(),
            nested: self.nested_tx.clone(),
        }
    }

    /// Current state. Outside a cycle this is also the published state.
    pub fn state(&self) -> &S {
        &self.draft
    }

    /// Receiver notified once per completed cycle.
    pub fn subscribe_state(&self) -> watch::Receiver<S> {
        self.published.subscribe()
    }

    /// Number of completed cycles (and so of publications).
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Running effects.
    pub fn registry(&self) -> &EffectRegistry<A> {
        &self.registry
    }

    /// Running subscriptions.
    pub fn subscriptions(&self) -> &SubscriptionSet<A, K> {
        &self.subscriptions
    }

    /// The shared environment.
    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// The active configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Handle every message already waiting in the inbox. Returns how many
    /// were handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.inbox_rx.try_recv() {
            self.handle(message);
            handled += 1;
        }
        handled
    }

    /// Wait for the next inbox message and handle it.
    pub async fn step(&mut self) {
        if let Some(message) = self.inbox_rx.recv().await {
            self.handle(message);
        }
    }

    /// Receive and handle inbox messages until `shutdown` is cancelled, then
    /// cancel every effect and subscription.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::debug!(runtime = %self.config.name, "Runtime started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                message = self.inbox_rx.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
            }
        }

        self.teardown();
    }

    /// Spawn [`run`](Self::run) onto the current tokio runtime.
    pub fn spawn(self) -> RuntimeHandle<S, A> {
        let dispatcher = self.dispatcher();
        let state = self.published.subscribe();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.run(shutdown.clone()));

        RuntimeHandle {
            dispatcher,
            state,
            shutdown,
            task: Some(task),
        }
    }

    fn teardown(&mut self) {
        self.inbox_rx.close();
        self.queue.close();
        let effects = self.registry.len();
        let subscriptions = self.subscriptions.len();
        self.registry.cancel_all();
        self.subscriptions.cancel_all();
        tracing::debug!(
            runtime = %self.config.name,
            effects,
            subscriptions,
            "Runtime stopped"
        );
    }

    fn handle(&mut self, message: Message<A>) {
        match message {
            Message::Dispatch(action) => self.dispatch(action),
            Message::Emit { source, action } => {
                let live = match source {
                    Source::Effect(id) => self.registry.is_running(id),
                    Source::Subscription(id) => self.subscriptions.is_live(id),
                };
                if live {
                    self.dispatch(action);
                } else {
                    tracing::trace!(?source, action = %action.name(), "Discarding output of a cancelled source");
                }
            }
            Message::Completed(id) => self.registry.complete(id),
        }
    }

    fn cycle(&mut self, effects: Vec<Effect<A, Env>>) {
        let _draining = DrainGuard::enter(self.id);
        let span = tracing::trace_span!("cycle", runtime = %self.config.name, cycle = self.cycles + 1);
        let _entered = span.enter();

        for effect in effects {
            self.launch(effect);
        }

        let mut reduced = 0;
        loop {
            reduced += self.drain();

            let requested = (self.subscriptions_fn)(&self.draft);
            let outcome = self
                .subscriptions
                .reconcile(requested, &self.env, &mut self.queue);
            if !outcome.is_unchanged() {
                tracing::trace!(
                    stopped = outcome.stopped,
                    started = outcome.started,
                    "Subscriptions reconciled"
                );
            }

            if self.queue.is_empty() {
                break;
            }
        }

        self.cycles += 1;
        self.published.send_replace(self.draft.clone());
        tracing::trace!(reduced, running = self.registry.len(), "State published");
    }

    /// Reduce until the queue is empty. Returns the number of reductions.
    fn drain(&mut self) -> usize {
        let mut reduced = 0;
        while let Some(action) = self.queue.pop_front() {
            let effects = self.adapter.apply(&mut self.draft, action);
            reduced += 1;

            // Nested dispatches from the reducer come before its effects' output
            self.queue.collect_nested();
            for effect in effects {
                self.launch(effect);
            }
        }
        reduced
    }

    fn launch(&mut self, effect: Effect<A, Env>) {
        self.registry
            .launch(effect, Arc::clone(&self.env), &mut self.queue);
        // Dispatches made after the last synchronous item
        self.queue.collect_nested();
    }
}

/// Handle to a runtime spawned with [`start`] or [`Runtime::spawn`].
///
/// Dropping the handle shuts the runtime down.
pub struct RuntimeHandle<S, A> {
    dispatcher: Dispatcher<A>,
    state: watch::Receiver<S>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<S, A> fmt::Debug for RuntimeHandle<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("runtime", &self.dispatcher.runtime.0)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl<S: Clone, A: Action> RuntimeHandle<S, A> {
    /// Send an action to the runtime.
    pub fn dispatch(&self, action: A) {
        self.dispatcher.dispatch(action);
    }

    /// Send an action, returning [`RuntimeError::Closed`] if the runtime is gone.
    pub fn try_dispatch(&self, action: A) -> Result<()> {
        self.dispatcher.try_dispatch(action)
    }

    /// A dispatcher for handing to other tasks.
    pub fn dispatcher(&self) -> Dispatcher<A> {
        self.dispatcher.clone()
    }

    /// Snapshot of the last published state.
    pub fn current_state(&self) -> S {
        self.state.borrow().clone()
    }

    /// Receiver notified once per completed cycle after this call.
    pub fn state_changes(&self) -> watch::Receiver<S> {
        let mut changes = self.state.clone();
        changes.borrow_and_update();
        changes
    }

    /// A view of the part of the state `project` selects, starting at
    /// `initial`.
    ///
    /// Cycles whose state projects to `None` do not change or wake the view.
    pub fn filter_map<T, F>(&self, initial: T, project: F) -> StateView<S, T>
    where
        F: Fn(&S) -> Option<T> + Send + Sync + 'static,
    {
        StateView::new(self.state_changes(), initial, project)
    }

    /// Stop the runtime and wait for it to cancel its effects and
    /// subscriptions.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "Runtime task failed");
            }
        }
    }
}

impl<S, A> Drop for RuntimeHandle<S, A> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Subscriptions function for runtimes that never subscribe to anything.
pub fn no_subscriptions<S, A, Env>(_state: &S) -> Vec<Subscription<A, Env>> {
    Vec::new()
}

/// Create a runtime, run its bootstrap cycle and spawn it on the current
/// tokio runtime.
///
/// # Example
///
/// ```ignore
/// let handle = start(
///     AppState::default(),
///     vec![Effect::future(|env: Arc<Env>| async move { Action::Loaded(env.api.fetch().await) })],
///     reducer,
///     subscriptions,
///     Env::live(),
/// );
/// handle.dispatch(Action::Refresh);
/// ```
pub fn start<S, A, Env, K, R, F>(
    initial_state: S,
    initial_effects: Vec<Effect<A, Env>>,
    reducer: R,
    subscriptions: F,
    env: impl Into<Arc<Env>>,
) -> RuntimeHandle<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: Action,
    Env: Send + Sync + 'static,
    K: SubscriptionKey,
    R: Reducer<S, A, Env> + 'static,
    F: Fn(&S) -> Vec<Subscription<A, Env, K>> + Send + 'static,
{
    let mut runtime = Runtime::new(initial_state, reducer, subscriptions, env);
    runtime.boot(initial_effects);
    runtime.spawn()
}

/// [`start`] for a state type implementing [`Application`].
pub fn start_application<App: Application>(
    app: App,
    env: impl Into<Arc<App::Env>>,
) -> RuntimeHandle<App, App::Action> {
    let initial_effects = app.initial_effects();
    start(
        app,
        initial_effects,
        |app: &mut App, action: App::Action| app.reduce(action),
        |app: &App| app.subscriptions(),
        env,
    )
}
