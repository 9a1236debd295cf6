//! Declarative subscriptions and their reconciliation
//!
//! Subscriptions are long-lived sources of actions such as timers, intervals
//! and external streams. The application does not start or stop them
//! imperatively. After every cycle the runtime asks it which subscriptions the
//! current state wants and reconciles that set against what is running:
//!
//! - running keys that are no longer requested are cancelled
//! - requested keys that are not running are started
//! - keys present in both are left alone (never restarted)
//!
//! # Example
//!
//! ```ignore
//! use unidirect::subscriptions::{SubKey, Subscription};
//! use std::time::Duration;
//!
//! fn subscriptions(state: &AppState) -> Vec<Subscription<Action, Env>> {
//!     let mut subs = vec![];
//!     if state.animating {
//!         // Tick every 100ms for animations
//!         subs.push(Subscription::interval("tick", Duration::from_millis(100), || Action::Tick));
//!     }
//!     if let Some(room) = &state.room {
//!         // Same room across cycles => same key => the stream keeps running
//!         subs.push(Subscription::stream(
//!             SubKey::with_input("room", room),
//!             move |env: Arc<Env>| env.chat.messages(room.clone()).map(Action::DidReceive),
//!         ));
//!     }
//!     subs
//! }
//! ```

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;

use crate::task::{
    poll_ready, spawn_forwarder, Inbox, ReadySink, Source, SubscriptionId, TaskHandle,
};

/// Types usable as subscription equality keys.
///
/// Implemented automatically for anything hashable, comparable, cloneable and
/// debuggable. An application enum combining a source tag and its input works
/// well; [`SubKey`] is the ready-made default.
pub trait SubscriptionKey: Hash + Eq + Clone + Debug + Send + 'static {}

impl<T> SubscriptionKey for T where T: Hash + Eq + Clone + Debug + Send + 'static {}

/// Default subscription key: a source tag plus an optional input value.
///
/// Two keys are equal when both the source and the input are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubKey {
    source: Cow<'static, str>,
    input: Option<String>,
}

impl SubKey {
    /// Create a key with no input.
    pub fn new(source: impl Into<Cow<'static, str>>) -> Self {
        Self {
            source: source.into(),
            input: None,
        }
    }

    /// Create a key combining a source tag with an input value.
    ///
    /// The input is compared by its `Display` rendering, so
    /// `with_input("room", 7)` and `with_input("room", "7")` are the same key.
    /// Use a custom [`SubscriptionKey`] type when inputs of different types
    /// must stay distinct.
    pub fn with_input(source: impl Into<Cow<'static, str>>, input: impl ToString) -> Self {
        Self {
            source: source.into(),
            input: Some(input.to_string()),
        }
    }

    /// Get the source tag.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Get the input, if any.
    pub fn input(&self) -> Option<&str> {
        self.input.as_deref()
    }
}

impl fmt::Display for SubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.input {
            Some(input) => write!(f, "{}({})", self.source, input),
            None => f.write_str(&self.source),
        }
    }
}

impl From<&'static str> for SubKey {
    fn from(s: &'static str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SubKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Shortest period accepted by [`Subscription::interval`] and
/// [`Subscription::interval_immediate`].
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

// Ticks every `period`, the first one a full period after the call.
// `period` must be non-zero, tokio panics otherwise.
fn ticks(period: Duration) -> IntervalStream {
    let start = tokio::time::Instant::now() + period;
    IntervalStream::new(tokio::time::interval_at(start, period))
}

type SubRunFn<A, Env> =
    Arc<dyn Fn(Arc<Env>, CancellationToken) -> BoxStream<'static, A> + Send + Sync>;

/// A key-identified, long-lived source of actions.
///
/// The run function is invoked each time the key is started. It receives the
/// environment and a token that is cancelled when the subscription is stopped.
pub struct Subscription<A, Env, K = SubKey> {
    key: K,
    run: SubRunFn<A, Env>,
}

impl<A, Env, K: Debug> Debug for Subscription<A, Env, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .finish()
    }
}

impl<A, Env, K> Clone for Subscription<A, Env, K>
where
    K: Clone,
{
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            run: Arc::clone(&self.run),
        }
    }
}

impl<A, Env, K> Subscription<A, Env, K>
where
    A: Send + 'static,
    Env: Send + Sync + 'static,
    K: SubscriptionKey,
{
    /// Create a subscription from a raw run function.
    pub fn new<F>(key: impl Into<K>, run: F) -> Self
    where
        F: Fn(Arc<Env>, CancellationToken) -> BoxStream<'static, A> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            run: Arc::new(run),
        }
    }

    /// Forward every item of a stream built from the environment.
    ///
    /// # Example
    ///
    /// ```ignore
    /// // Forward file watcher events
    /// Subscription::stream("files", |env: Arc<Env>| {
    ///     env.watcher.events().map(|e| Action::FileChanged(e.path))
    /// });
    /// ```
    pub fn stream<F, St>(key: impl Into<K>, f: F) -> Self
    where
        F: Fn(Arc<Env>) -> St + Send + Sync + 'static,
        St: Stream<Item = A> + Send + 'static,
    {
        Self::new(key, move |env, _| f(env).boxed())
    }

    /// Emit an action at fixed intervals, starting one period after start.
    ///
    /// A zero `period` is raised to [`MIN_PERIOD`].
    ///
    /// # Example
    ///
    /// ```ignore
    /// // Auto-refresh every 5 minutes
    /// Subscription::interval("refresh", Duration::from_secs(300), || Action::DataFetch);
    /// ```
    pub fn interval<F>(key: impl Into<K>, period: Duration, action_fn: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        let action_fn = Arc::new(action_fn);
        let period = period.max(MIN_PERIOD);
        Self::new(key, move |_, _| {
            let action_fn = Arc::clone(&action_fn);
            ticks(period).map(move |_| action_fn()).boxed()
        })
    }

    /// Emit an action immediately on start, then at fixed intervals.
    ///
    /// A zero `period` is raised to [`MIN_PERIOD`].
    pub fn interval_immediate<F>(key: impl Into<K>, period: Duration, action_fn: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        let action_fn = Arc::new(action_fn);
        let period = period.max(MIN_PERIOD);
        Self::new(key, move |_, _| {
            let action_fn = Arc::clone(&action_fn);
            let first = futures::stream::once({
                let action_fn = Arc::clone(&action_fn);
                async move { action_fn() }
            });
            let rest = ticks(period).map(move |_| action_fn());
            first.chain(rest).boxed()
        })
    }

    /// Transform every produced action, keeping the key.
    pub fn map<B, F>(self, f: F) -> Subscription<B, Env, K>
    where
        B: Send + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        let run = self.run;
        let f = Arc::new(f);
        Subscription {
            key: self.key,
            run: Arc::new(move |env, token| {
                let f = Arc::clone(&f);
                run(env, token).map(move |a| f(a)).boxed()
            }),
        }
    }
}

impl<A, Env, K> Subscription<A, Env, K> {
    /// The subscription's equality key.
    pub fn key(&self) -> &K {
        &self.key
    }

    pub(crate) fn start(&self, env: Arc<Env>, token: CancellationToken) -> BoxStream<'static, A> {
        (self.run)(env, token)
    }
}

struct Running {
    id: SubscriptionId,
    handle: Option<TaskHandle>,
}

impl Running {
    fn cancel(self) {
        if let Some(handle) = self.handle {
            handle.cancel();
        }
    }
}

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Number of subscriptions cancelled.
    pub stopped: usize,
    /// Number of subscriptions started.
    pub started: usize,
}

impl ReconcileOutcome {
    /// Returns true if nothing was started or stopped.
    pub fn is_unchanged(&self) -> bool {
        self.started == 0 && self.stopped == 0
    }
}

/// The set of running subscriptions, one instance per distinct key.
///
/// # Type Parameters
///
/// - `A`: The action type subscriptions produce
/// - `K`: The equality key type
pub struct SubscriptionSet<A, K = SubKey> {
    running: HashMap<K, Running>,
    live: HashSet<SubscriptionId>,
    next_id: u64,
    inbox: Inbox<A>,
}

impl<A, K> SubscriptionSet<A, K>
where
    A: Send + 'static,
    K: SubscriptionKey,
{
    pub(crate) fn new(inbox: Inbox<A>) -> Self {
        Self {
            running: HashMap::new(),
            live: HashSet::new(),
            next_id: 0,
            inbox,
        }
    }

    /// Bring the running set in line with `requested`.
    ///
    /// Every running key missing from `requested` is cancelled before any new
    /// key is started. Keys present in both are untouched; their run function
    /// is not invoked again. Duplicate keys within `requested` start once.
    /// Actions a new subscription produces synchronously are pushed to `ready`.
    pub(crate) fn reconcile<Env>(
        &mut self,
        requested: Vec<Subscription<A, Env, K>>,
        env: &Arc<Env>,
        ready: &mut impl ReadySink<A>,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        let mut seen = HashSet::new();
        let requested: Vec<_> = requested
            .into_iter()
            .filter(|sub| seen.insert(sub.key.clone()))
            .collect();

        let stale: Vec<K> = self
            .running
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(running) = self.running.remove(&key) {
                self.live.remove(&running.id);
                running.cancel();
                outcome.stopped += 1;
                tracing::debug!(key = ?key, "Subscription stopped");
            }
        }

        for sub in requested {
            if self.running.contains_key(&sub.key) {
                continue;
            }
            self.start(sub, env, ready);
            outcome.started += 1;
        }

        outcome
    }

    fn start<Env>(
        &mut self,
        sub: Subscription<A, Env, K>,
        env: &Arc<Env>,
        ready: &mut impl ReadySink<A>,
    ) {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let token = CancellationToken::new();
        let stream = sub.start(Arc::clone(env), token.clone());
        let handle = poll_ready(stream, ready).map(|rest| {
            spawn_forwarder(Source::Subscription(id), rest, token, self.inbox.clone())
        });

        tracing::debug!(key = ?sub.key, id = id.0, "Subscription started");
        self.live.insert(id);
        self.running.insert(sub.key, Running { id, handle });
    }

    /// Whether actions from this subscription instance may still be delivered.
    pub(crate) fn is_live(&self, id: SubscriptionId) -> bool {
        self.live.contains(&id)
    }

    /// Cancel all subscriptions.
    ///
    /// Used on shutdown.
    pub fn cancel_all(&mut self) {
        self.live.clear();
        for (_, running) in self.running.drain() {
            running.cancel();
        }
    }

    /// Check if a subscription with the given key is active.
    pub fn is_active(&self, key: &K) -> bool {
        self.running.contains_key(key)
    }

    /// Get the number of active subscriptions.
    pub fn len(&self) -> usize {
        self.running.len()
    }

    /// Check if there are no active subscriptions.
    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Get the keys of all active subscriptions.
    pub fn active_keys(&self) -> impl Iterator<Item = &K> {
        self.running.keys()
    }
}

impl<A, K> Drop for SubscriptionSet<A, K> {
    fn drop(&mut self) {
        for (_, running) in self.running.drain() {
            running.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Message;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Clone, Debug, PartialEq)]
    enum TestAction {
        Tick,
        Value(usize),
    }

    struct Env;

    type Set = SubscriptionSet<TestAction>;

    fn set() -> (Set, mpsc::UnboundedReceiver<Message<TestAction>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SubscriptionSet::new(tx), rx)
    }

    fn counting(key: &'static str, starts: Arc<AtomicUsize>) -> Subscription<TestAction, Env> {
        Subscription::new(key, move |_, _| {
            starts.fetch_add(1, Ordering::SeqCst);
            futures::stream::pending().boxed()
        })
    }

    #[test]
    fn test_sub_key() {
        let k1 = SubKey::new("test");
        let k2 = SubKey::from("test");
        let k3: SubKey = "test".into();

        assert_eq!(k1, k2);
        assert_eq!(k2, k3);
        assert_eq!(k1.source(), "test");
        assert_eq!(k1.input(), None);

        // Inputs compare by their rendering, not their type
        let a = SubKey::with_input("room", 7);
        let b = SubKey::with_input("room", "7");
        let c = SubKey::with_input("room", 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, SubKey::new("room"));
        assert_eq!(a.to_string(), "room(7)");
    }

    #[tokio::test]
    async fn test_equal_keys_are_not_restarted() {
        let (mut subs, _rx) = set();
        let env = Arc::new(Env);
        let mut ready = VecDeque::new();
        let starts = Arc::new(AtomicUsize::new(0));

        let outcome = subs.reconcile(vec![counting("feed", starts.clone())], &env, &mut ready);
        assert_eq!(outcome, ReconcileOutcome { stopped: 0, started: 1 });

        // A freshly built subscription with the same key is "the same"
        let outcome = subs.reconcile(vec![counting("feed", starts.clone())], &env, &mut ready);
        assert!(outcome.is_unchanged());

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(subs.is_active(&SubKey::new("feed")));
    }

    #[tokio::test]
    async fn test_reordering_is_not_a_change() {
        let (mut subs, _rx) = set();
        let env = Arc::new(Env);
        let mut ready = VecDeque::new();
        let starts = Arc::new(AtomicUsize::new(0));

        subs.reconcile(
            vec![counting("a", starts.clone()), counting("b", starts.clone())],
            &env,
            &mut ready,
        );
        let outcome = subs.reconcile(
            vec![counting("b", starts.clone()), counting("a", starts.clone())],
            &env,
            &mut ready,
        );

        assert!(outcome.is_unchanged());
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_duplicate_requested_keys_start_once() {
        let (mut subs, _rx) = set();
        let env = Arc::new(Env);
        let mut ready = VecDeque::new();
        let starts = Arc::new(AtomicUsize::new(0));

        subs.reconcile(
            vec![counting("a", starts.clone()), counting("a", starts.clone())],
            &env,
            &mut ready,
        );

        assert_eq!(subs.len(), 1);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_cancelled_before_new_started() {
        let (mut subs, _rx) = set();
        let env = Arc::new(Env);
        let mut ready = VecDeque::new();

        let old_token: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
        let slot = old_token.clone();
        let old: Subscription<TestAction, Env> = Subscription::new("old", move |_, token| {
            *slot.lock().expect("lock") = Some(token);
            futures::stream::pending().boxed()
        });
        subs.reconcile(vec![old], &env, &mut ready);

        let observed: Arc<Mutex<Option<bool>>> = Arc::new(Mutex::new(None));
        let seen = observed.clone();
        let new: Subscription<TestAction, Env> = Subscription::new("new", move |_, _| {
            let cancelled = old_token
                .lock()
                .expect("lock")
                .as_ref()
                .map(CancellationToken::is_cancelled);
            *seen.lock().expect("lock") = cancelled;
            futures::stream::pending().boxed()
        });
        let outcome = subs.reconcile(vec![new], &env, &mut ready);

        assert_eq!(outcome, ReconcileOutcome { stopped: 1, started: 1 });
        assert_eq!(*observed.lock().expect("lock"), Some(true));
        assert!(!subs.is_active(&SubKey::new("old")));
        assert!(subs.is_active(&SubKey::new("new")));
    }

    #[tokio::test]
    async fn test_synchronous_items_land_in_ready_queue() {
        let (mut subs, _rx) = set();
        let env = Arc::new(Env);
        let mut ready = VecDeque::new();

        let sub: Subscription<TestAction, Env> = Subscription::stream("values", |_| {
            futures::stream::iter(vec![TestAction::Value(1), TestAction::Value(2)])
        });
        subs.reconcile(vec![sub], &env, &mut ready);

        assert_eq!(
            ready,
            VecDeque::from(vec![TestAction::Value(1), TestAction::Value(2)])
        );
        // A finished stream still occupies its key, so it is not restarted
        assert!(subs.is_active(&SubKey::new("values")));
    }

    #[tokio::test]
    async fn test_interval_emits_through_inbox() {
        let (mut subs, mut rx) = set();
        let env = Arc::new(Env);
        let mut ready = VecDeque::new();

        let sub: Subscription<TestAction, Env> =
            Subscription::interval("tick", Duration::from_millis(20), || TestAction::Tick);
        subs.reconcile(vec![sub], &env, &mut ready);
        assert!(ready.is_empty());

        let msg = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        match msg {
            Message::Emit { source: Source::Subscription(id), action } => {
                assert_eq!(action, TestAction::Tick);
                assert!(subs.is_live(id));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_interval_immediate_emits_on_start() {
        let (mut subs, _rx) = set();
        let env = Arc::new(Env);
        let mut ready = VecDeque::new();

        let sub: Subscription<TestAction, Env> =
            Subscription::interval_immediate("tick", Duration::from_secs(60), || TestAction::Tick);
        subs.reconcile(vec![sub], &env, &mut ready);

        assert_eq!(ready, VecDeque::from(vec![TestAction::Tick]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_interval_is_clamped() {
        let (mut subs, mut rx) = set();
        let env = Arc::new(Env);
        let mut ready = VecDeque::new();

        let immediate: Subscription<TestAction, Env> =
            Subscription::interval_immediate("now", Duration::ZERO, || TestAction::Value(0));
        let ticking: Subscription<TestAction, Env> =
            Subscription::interval("tick", Duration::ZERO, || TestAction::Tick);
        let outcome = subs.reconcile(vec![immediate, ticking], &env, &mut ready);

        assert_eq!(outcome.started, 2);
        assert_eq!(ready, VecDeque::from(vec![TestAction::Value(0)]));

        let before = tokio::time::Instant::now();
        let msg = tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert!(matches!(msg, Message::Emit { .. }));
        assert!(before.elapsed() >= MIN_PERIOD);
    }

    #[tokio::test]
    async fn test_removed_key_stops_delivery() {
        let (mut subs, mut rx) = set();
        let env = Arc::new(Env);
        let mut ready = VecDeque::new();

        let sub: Subscription<TestAction, Env> =
            Subscription::interval("tick", Duration::from_millis(10), || TestAction::Tick);
        subs.reconcile(vec![sub], &env, &mut ready);

        let _ = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;

        let outcome = subs.reconcile(vec![], &env, &mut ready);
        assert_eq!(outcome.stopped, 1);
        assert!(subs.is_empty());

        // Clear anything delivered before the cancel
        while rx.try_recv().is_ok() {}

        let result = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(result.is_err(), "should timeout - no more ticks");
    }

    #[tokio::test]
    async fn test_custom_key_type() {
        #[derive(Clone, Debug, PartialEq, Eq, Hash)]
        enum Key {
            Clock,
            Feed(u32),
        }

        let (tx, _rx) = mpsc::unbounded_channel::<Message<TestAction>>();
        let mut subs: SubscriptionSet<TestAction, Key> = SubscriptionSet::new(tx);
        let env = Arc::new(Env);
        let mut ready = VecDeque::new();

        let clock: Subscription<TestAction, Env, Key> =
            Subscription::stream(Key::Clock, |_| futures::stream::pending());
        let feed: Subscription<TestAction, Env, Key> =
            Subscription::stream(Key::Feed(1), |_| futures::stream::pending());
        subs.reconcile(vec![clock, feed], &env, &mut ready);
        assert_eq!(subs.len(), 2);

        let feed2: Subscription<TestAction, Env, Key> =
            Subscription::stream(Key::Feed(2), |_| futures::stream::pending());
        let outcome = subs.reconcile(vec![feed2], &env, &mut ready);
        assert_eq!(outcome, ReconcileOutcome { stopped: 2, started: 1 });
        assert!(subs.is_active(&Key::Feed(2)));
    }

    #[tokio::test]
    async fn test_map_keeps_key() {
        let sub: Subscription<usize, Env> =
            Subscription::stream("n", |_| futures::stream::iter(vec![1usize, 2]));
        let mapped = sub.map(TestAction::Value);
        assert_eq!(mapped.key(), &SubKey::new("n"));

        let (mut subs, _rx) = set();
        let mut ready = VecDeque::new();
        subs.reconcile(vec![mapped], &Arc::new(Env), &mut ready);
        assert_eq!(
            ready,
            VecDeque::from(vec![TestAction::Value(1), TestAction::Value(2)])
        );
    }
}
