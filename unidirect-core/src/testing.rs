//! Test utilities for unidirect applications
//!
//! - [`TestHarness`]: drives a [`Runtime`] by hand and records every action it
//!   reduces
//! - Assertion macros for verifying recorded actions
//! - Time control helpers (with the `testing-time` feature)
//!
//! # Example
//!
//! ```ignore
//! use unidirect::testing::TestHarness;
//! use unidirect::{assert_emitted, Runtime};
//!
//! let runtime = Runtime::new(AppState::default(), reducer, subscriptions, Env::mock());
//! let mut harness = TestHarness::start(runtime, vec![]);
//!
//! harness.dispatch(Action::Refresh);
//! harness.step().await;
//!
//! let actions = harness.drain_emitted();
//! assert_emitted!(actions, Action::DidRefresh(_));
//! ```

use std::time::Duration;

use tokio::sync::mpsc;

use crate::effect::{Effect, EffectId};
use crate::reducer::Middleware;
use crate::runtime::Runtime;
use crate::subscriptions::{SubKey, SubscriptionKey};
use crate::Action;

/// Middleware that forwards a copy of every reduced action to a channel.
#[derive(Debug)]
struct Recorder<A> {
    tx: mpsc::UnboundedSender<A>,
}

impl<A: Action> Middleware<A> for Recorder<A> {
    fn before(&mut self, action: &A) {
        let _ = self.tx.send(action.clone());
    }

    fn after(&mut self, _action: &A, _effects: &[EffectId]) {}
}

/// Test harness around a [`Runtime`].
///
/// Nothing runs in the background: inbox messages (effect outputs,
/// subscription ticks, dispatches from other tasks) are only handled when the
/// test calls [`settle`](Self::settle), [`step`](Self::step) or
/// [`advance`](Self::advance). That keeps the order of events under the
/// test's control.
///
/// # Type Parameters
///
/// - `S`: The state type
/// - `A`: The action type (must implement [`Action`])
/// - `Env`: The environment type
/// - `K`: The subscription key type
pub struct TestHarness<S, A: Action, Env, K = SubKey> {
    runtime: Runtime<S, A, Env, K>,
    rx: mpsc::UnboundedReceiver<A>,
}

impl<S, A, Env, K> TestHarness<S, A, Env, K>
where
    S: Clone + Send + Sync + 'static,
    A: Action,
    Env: Send + Sync + 'static,
    K: SubscriptionKey,
{
    /// Attach a recorder to `runtime` and run its bootstrap cycle.
    pub fn start(runtime: Runtime<S, A, Env, K>, initial_effects: Vec<Effect<A, Env>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut runtime = runtime.with_middleware(Recorder { tx });
        runtime.boot(initial_effects);
        Self { runtime, rx }
    }

    /// Dispatch an action and run its cycle.
    pub fn dispatch(&mut self, action: A) {
        self.runtime.dispatch(action);
    }

    /// Current state.
    pub fn state(&self) -> &S {
        self.runtime.state()
    }

    /// The runtime under test.
    pub fn runtime(&self) -> &Runtime<S, A, Env, K> {
        &self.runtime
    }

    /// Mutable access to the runtime under test.
    pub fn runtime_mut(&mut self) -> &mut Runtime<S, A, Env, K> {
        &mut self.runtime
    }

    /// Handle everything already waiting in the inbox.
    pub fn settle(&mut self) -> usize {
        self.runtime.process_pending()
    }

    /// Wait for the next inbox message and handle it.
    pub async fn step(&mut self) {
        self.runtime.step().await;
    }

    /// Let `duration` pass, then handle whatever arrived.
    ///
    /// Meant for tests with paused time, where the sleep completes instantly.
    pub async fn advance(&mut self, duration: Duration) -> usize {
        tokio::time::sleep(duration).await;
        tokio::task::yield_now().await;
        self.settle()
    }

    /// Drain every action reduced since the last drain, in reduction order.
    pub fn drain_emitted(&mut self) -> Vec<A> {
        let mut actions = Vec::new();
        while let Ok(action) = self.rx.try_recv() {
            actions.push(action);
        }
        actions
    }

    /// Check if any actions were reduced since the last drain.
    pub fn has_emitted(&mut self) -> bool {
        !self.drain_emitted().is_empty()
    }
}

/// Pause tokio time for the current runtime.
#[cfg(feature = "testing-time")]
pub fn pause_time() {
    tokio::time::pause();
}

/// Resume tokio time after [`pause_time`].
#[cfg(feature = "testing-time")]
pub fn resume_time() {
    tokio::time::resume();
}

/// Advance paused tokio time by `duration`.
#[cfg(feature = "testing-time")]
pub async fn advance_time(duration: Duration) {
    tokio::time::advance(duration).await;
}

/// Assert that a specific action was emitted.
///
/// # Example
///
/// ```ignore
/// use unidirect::assert_emitted;
///
/// let actions = harness.drain_emitted();
/// assert_emitted!(actions, Action::Increment);
/// assert_emitted!(actions, Action::SetValue(42));
/// ```
#[macro_export]
macro_rules! assert_emitted {
    ($actions:expr, $pattern:pat $(if $guard:expr)?) => {
        assert!(
            $actions.iter().any(|a| matches!(a, $pattern $(if $guard)?)),
            "Expected action matching `{}` to be emitted, but got: {:?}",
            stringify!($pattern),
            $actions
        );
    };
}

/// Assert that a specific action was NOT emitted.
///
/// # Example
///
/// ```ignore
/// use unidirect::assert_not_emitted;
///
/// let actions = harness.drain_emitted();
/// assert_not_emitted!(actions, Action::Quit);
/// ```
#[macro_export]
macro_rules! assert_not_emitted {
    ($actions:expr, $pattern:pat $(if $guard:expr)?) => {
        assert!(
            !$actions.iter().any(|a| matches!(a, $pattern $(if $guard)?)),
            "Expected action matching `{}` NOT to be emitted, but it was: {:?}",
            stringify!($pattern),
            $actions
        );
    };
}

/// Find and return the first action matching a pattern.
///
/// # Example
///
/// ```ignore
/// use unidirect::find_emitted;
///
/// let actions = harness.drain_emitted();
/// if let Some(Action::SetValue(v)) = find_emitted!(actions, Action::SetValue(_)) {
///     assert_eq!(*v, 42);
/// }
/// ```
#[macro_export]
macro_rules! find_emitted {
    ($actions:expr, $pattern:pat $(if $guard:expr)?) => {
        $actions.iter().find(|a| matches!(a, $pattern $(if $guard)?))
    };
}

/// Count how many actions match a pattern.
///
/// # Example
///
/// ```ignore
/// use unidirect::count_emitted;
///
/// let actions = harness.drain_emitted();
/// assert_eq!(count_emitted!(actions, Action::Tick), 3);
/// ```
#[macro_export]
macro_rules! count_emitted {
    ($actions:expr, $pattern:pat $(if $guard:expr)?) => {
        $actions.iter().filter(|a| matches!(a, $pattern $(if $guard)?)).count()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::no_subscriptions;

    #[derive(Clone, Debug, PartialEq)]
    enum TestAction {
        Foo,
        Bar(i32),
        Later,
    }

    impl Action for TestAction {
        fn name(&self) -> &'static str {
            match self {
                TestAction::Foo => "Foo",
                TestAction::Bar(_) => "Bar",
                TestAction::Later => "Later",
            }
        }
    }

    fn reducer(state: &mut Vec<i32>, action: TestAction) -> Vec<Effect<TestAction, ()>> {
        match action {
            TestAction::Foo => vec![Effect::just(TestAction::Bar(42))],
            TestAction::Bar(n) => {
                state.push(n);
                vec![]
            }
            TestAction::Later => vec![Effect::delayed(Duration::from_millis(50), |_| async {
                TestAction::Bar(7)
            })],
        }
    }

    fn harness() -> TestHarness<Vec<i32>, TestAction, ()> {
        TestHarness::start(Runtime::new(Vec::new(), reducer, no_subscriptions, ()), vec![])
    }

    #[tokio::test]
    async fn test_harness_records_reduced_actions() {
        let mut harness = harness();

        harness.dispatch(TestAction::Foo);

        let actions = harness.drain_emitted();
        assert_eq!(actions, vec![TestAction::Foo, TestAction::Bar(42)]);
        assert_eq!(harness.state(), &vec![42]);

        // Drain again should be empty
        assert!(!harness.has_emitted());
    }

    #[tokio::test]
    async fn test_harness_records_initial_effects() {
        let mut harness = TestHarness::start(
            Runtime::new(Vec::new(), reducer, no_subscriptions, ()),
            vec![Effect::just(TestAction::Bar(1))],
        );
        assert_eq!(harness.drain_emitted(), vec![TestAction::Bar(1)]);
        assert_eq!(harness.runtime().cycles(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_harness_advance_delivers_async_output() {
        let mut harness = harness();

        harness.dispatch(TestAction::Later);
        assert_eq!(harness.drain_emitted(), vec![TestAction::Later]);

        harness.advance(Duration::from_millis(60)).await;
        assert_eq!(harness.drain_emitted(), vec![TestAction::Bar(7)]);
        assert_eq!(harness.state(), &vec![7]);
    }

    #[test]
    fn test_assert_macros() {
        let actions = vec![TestAction::Foo, TestAction::Bar(42)];

        assert_emitted!(actions, TestAction::Foo);
        assert_emitted!(actions, TestAction::Bar(42));
        assert_emitted!(actions, TestAction::Bar(n) if *n > 40);

        assert_not_emitted!(actions, TestAction::Bar(99));
        assert_not_emitted!(actions, TestAction::Later);

        let found = find_emitted!(actions, TestAction::Bar(_));
        assert_eq!(found, Some(&TestAction::Bar(42)));

        let count = count_emitted!(actions, TestAction::Bar(_));
        assert_eq!(count, 1);
    }
}
