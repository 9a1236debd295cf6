//! Effects: one-shot, cancellable units of asynchronous work
//!
//! A reducer never performs I/O itself. Instead it returns [`Effect`] values
//! describing the work, and the runtime launches them. Every effect produces a
//! stream of actions and then completes; the runtime feeds those actions back
//! into the reducer.
//!
//! # Overview
//!
//! ```ignore
//! fn reducer(state: &mut AppState, action: AppAction) -> Vec<Effect<AppAction, Env>> {
//!     match action {
//!         AppAction::Load => {
//!             state.loading = true;
//!             vec![Effect::fallible(
//!                 |env: Arc<Env>| async move { env.api.fetch().await },
//!                 AppAction::DidLoad,
//!             )
//!             .track(&mut state.load_effect)]
//!         }
//!         AppAction::CancelLoad => {
//!             state.loading = false;
//!             vec![Effect::cancel_tracked(&mut state.load_effect)]
//!         }
//!         AppAction::DidLoad(result) => {
//!             state.loading = false;
//!             state.load_effect = None;
//!             state.data = result.ok();
//!             vec![]
//!         }
//!     }
//! }
//! ```
//!
//! Effects have no failure channel. Fallible work is folded into an action
//! before it reaches the runtime, which is what [`Effect::fallible`] does.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a launched effect for later cancellation.
///
/// Ids are generated fresh when the effect is constructed, so the reducer can
/// store one in state (see [`Effect::track`]) and cancel it from a later
/// action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectId(Uuid);

impl EffectId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Access to effect cancellation from inside a running effect.
///
/// The runtime's effect registry implements this. It is handed to every
/// effect's run function, which lets [`Effect::cancel`] express cancellation
/// as an ordinary effect value.
pub trait EffectManager {
    /// Cancel the effect registered under `id`. Unknown ids are ignored.
    fn cancel_effect(&mut self, id: EffectId);
}

type RunFn<A, Env> =
    Box<dyn FnOnce(&mut dyn EffectManager, Arc<Env>) -> BoxStream<'static, A> + Send>;

/// A declarative description of asynchronous work that yields actions.
///
/// # Type Parameters
///
/// - `A`: the action type the effect produces
/// - `Env`: the environment supplying the real asynchronous capabilities
pub struct Effect<A, Env> {
    id: EffectId,
    run: RunFn<A, Env>,
}

impl<A, Env> fmt::Debug for Effect<A, Env> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect").field("id", &self.id).finish()
    }
}

impl<A, Env> Effect<A, Env>
where
    A: Send + 'static,
    Env: Send + Sync + 'static,
{
    /// Create an effect from a raw run function.
    ///
    /// Most code wants one of the narrower constructors; this one exists for
    /// effects that need the [`EffectManager`].
    pub fn new<F>(run: F) -> Self
    where
        F: FnOnce(&mut dyn EffectManager, Arc<Env>) -> BoxStream<'static, A> + Send + 'static,
    {
        Self {
            id: EffectId::new(),
            run: Box::new(run),
        }
    }

    /// An effect that completes immediately without producing anything.
    pub fn none() -> Self {
        Self::new(|_, _| stream::empty().boxed())
    }

    /// An effect that synchronously produces a single action.
    pub fn just(action: A) -> Self {
        Self::new(move |_, _| stream::once(async move { action }).boxed())
    }

    /// An effect that synchronously produces the given actions in order.
    pub fn from_actions(actions: Vec<A>) -> Self {
        Self::new(move |_, _| stream::iter(actions).boxed())
    }

    /// An effect backed by an arbitrary stream built from the environment.
    pub fn stream<F, St>(f: F) -> Self
    where
        F: FnOnce(Arc<Env>) -> St + Send + 'static,
        St: Stream<Item = A> + Send + 'static,
    {
        Self::new(move |_, env| f(env).boxed())
    }

    /// An effect backed by a future producing exactly one action.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Arc<Env>) -> Fut + Send + 'static,
        Fut: Future<Output = A> + Send + 'static,
    {
        Self::new(move |_, env| stream::once(f(env)).boxed())
    }

    /// An effect backed by a fallible future.
    ///
    /// Both outcomes are handed to `map`, which folds them into an action.
    ///
    /// # Example
    ///
    /// ```ignore
    /// Effect::fallible(
    ///     move |env: Arc<Env>| async move { env.weather.fetch(city).await },
    ///     Action::WeatherDidLoad, // fn(Result<Weather, ApiError>) -> Action
    /// )
    /// ```
    pub fn fallible<F, Fut, T, E, M>(f: F, map: M) -> Self
    where
        F: FnOnce(Arc<Env>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        M: FnOnce(Result<T, E>) -> A + Send + 'static,
    {
        Self::future(move |env| {
            let fut = f(env);
            async move { map(fut.await) }
        })
    }

    /// Call a capability stored in the environment with an input and map
    /// every output into an action.
    ///
    /// `capability` selects the field, e.g. `|env| &*env.search`.
    pub fn call<Cap, I, St, O, M>(capability: fn(&Env) -> &Cap, input: I, map: M) -> Self
    where
        Cap: Fn(I) -> St + ?Sized + 'static,
        I: Send + 'static,
        St: Stream<Item = O> + Send + 'static,
        M: FnMut(O) -> A + Send + 'static,
    {
        Self::new(move |_, env| capability(&env)(input).map(map).boxed())
    }

    /// Run a future after `delay`.
    ///
    /// Combine with [`track`](Self::track) and [`cancel_tracked`](Self::cancel_tracked)
    /// to build a debounce: cancel the pending effect and start a new one on
    /// every input.
    pub fn delayed<F, Fut>(delay: Duration, f: F) -> Self
    where
        F: FnOnce(Arc<Env>) -> Fut + Send + 'static,
        Fut: Future<Output = A> + Send + 'static,
    {
        Self::future(move |env| async move {
            tokio::time::sleep(delay).await;
            f(env).await
        })
    }

    /// An effect that cancels another effect, then completes immediately.
    ///
    /// Cancelling an id that already completed (or was never launched) is a
    /// no-op.
    pub fn cancel(id: EffectId) -> Self {
        Self::new(move |manager, _| {
            manager.cancel_effect(id);
            stream::empty().boxed()
        })
    }

    /// Cancel the effect tracked in `slot` and clear the slot.
    ///
    /// If the slot is empty this returns [`Effect::none`].
    pub fn cancel_tracked(slot: &mut Option<EffectId>) -> Self {
        match slot.take() {
            Some(id) => Self::cancel(id),
            None => Self::none(),
        }
    }

    /// Record this effect's id into `slot` so a later action can cancel it.
    pub fn track(self, slot: &mut Option<EffectId>) -> Self {
        *slot = Some(self.id);
        self
    }

    /// Transform every produced action, keeping the id.
    ///
    /// Useful when a child reducer's effects are lifted into a parent action type.
    pub fn map<B, F>(self, f: F) -> Effect<B, Env>
    where
        B: Send + 'static,
        F: FnMut(A) -> B + Send + 'static,
    {
        let run = self.run;
        Effect {
            id: self.id,
            run: Box::new(move |manager, env| run(manager, env).map(f).boxed()),
        }
    }
}

impl<A, Env> Effect<A, Env> {
    /// The effect's id.
    pub fn id(&self) -> EffectId {
        self.id
    }

    /// Start the effect, producing its action stream.
    pub(crate) fn run(self, manager: &mut dyn EffectManager, env: Arc<Env>) -> BoxStream<'static, A> {
        (self.run)(manager, env)
    }
}
