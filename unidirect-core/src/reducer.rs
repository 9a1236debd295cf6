//! Reducers and the adapter the runtime drives them through

use crate::effect::{Effect, EffectId};
use crate::Action;

/// A reducer that applies an action to state and requests effects.
///
/// The reducer must be total and must not perform side effects beyond
/// mutating `state`. Anything asynchronous or fallible belongs in a returned
/// [`Effect`].
///
/// Implemented for every `FnMut(&mut S, A) -> Vec<Effect<A, Env>>`, so a plain
/// function works:
///
/// ```ignore
/// fn reducer(state: &mut AppState, action: Action) -> Vec<Effect<Action, Env>> {
///     match action {
///         Action::Increment => {
///             state.counter += 1;
///             vec![]
///         }
///     }
/// }
/// ```
pub trait Reducer<S, A, Env>: Send {
    /// Apply `action` to `state`, returning newly requested effects.
    fn reduce(&mut self, state: &mut S, action: A) -> Vec<Effect<A, Env>>;
}

impl<S, A, Env, F> Reducer<S, A, Env> for F
where
    F: FnMut(&mut S, A) -> Vec<Effect<A, Env>> + Send,
{
    fn reduce(&mut self, state: &mut S, action: A) -> Vec<Effect<A, Env>> {
        self(state, action)
    }
}

/// Middleware trait for observing reductions
///
/// Implement this trait to add logging, metrics, or test recording around
/// every action the runtime reduces.
pub trait Middleware<A: Action>: Send {
    /// Called before the action is handed to the reducer
    fn before(&mut self, action: &A);

    /// Called after the reducer returned, with the ids of the effects it
    /// requested, in launch order
    fn after(&mut self, action: &A, effects: &[EffectId]);
}

/// A no-op middleware that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMiddleware;

impl<A: Action> Middleware<A> for NoopMiddleware {
    fn before(&mut self, _action: &A) {}
    fn after(&mut self, _action: &A, _effects: &[EffectId]) {}
}

/// Logs every reduced action at debug level.
///
/// By default one line per action with the number of effects it requested.
/// [`verbose`](Self::verbose) also logs before the reducer runs and lists the
/// requested effect ids, which is what you want when tracing a cancellation.
#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware {
    /// Log the action before it is reduced
    pub log_before: bool,
    /// Include the requested effect ids in the after line
    pub log_effect_ids: bool,
}

impl LoggingMiddleware {
    /// One line per reduced action.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log before and after every reduction, with effect ids.
    pub fn verbose() -> Self {
        Self {
            log_before: true,
            log_effect_ids: true,
        }
    }
}

impl<A: Action> Middleware<A> for LoggingMiddleware {
    fn before(&mut self, action: &A) {
        if self.log_before {
            tracing::debug!(action = %action.name(), "Reducing action");
        }
    }

    fn after(&mut self, action: &A, effects: &[EffectId]) {
        if self.log_effect_ids && !effects.is_empty() {
            tracing::debug!(action = %action.name(), effects = ?effects, "Action reduced");
        } else {
            tracing::debug!(action = %action.name(), effects = effects.len(), "Action reduced");
        }
    }
}

/// Compose multiple middleware into a single middleware
pub struct ComposedMiddleware<A: Action> {
    middlewares: Vec<Box<dyn Middleware<A>>>,
}

impl<A: Action> std::fmt::Debug for ComposedMiddleware<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedMiddleware")
            .field("middlewares_count", &self.middlewares.len())
            .finish()
    }
}

impl<A: Action> Default for ComposedMiddleware<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Action> ComposedMiddleware<A> {
    /// Create a new composed middleware
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Add a middleware to the composition
    pub fn add<M: Middleware<A> + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Box::new(middleware));
    }

    /// Number of composed middleware
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Whether nothing has been added
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

impl<A: Action> Middleware<A> for ComposedMiddleware<A> {
    fn before(&mut self, action: &A) {
        for middleware in &mut self.middlewares {
            middleware.before(action);
        }
    }

    fn after(&mut self, action: &A, effects: &[EffectId]) {
        // Reverse order, so the first middleware wraps all the others
        for middleware in self.middlewares.iter_mut().rev() {
            middleware.after(action, effects);
        }
    }
}

/// Runs the application reducer against the draft state, with middleware
/// hooks around every reduction.
pub(crate) struct ReducerAdapter<S, A: Action, Env> {
    reducer: Box<dyn Reducer<S, A, Env>>,
    middleware: ComposedMiddleware<A>,
}

impl<S, A: Action, Env> ReducerAdapter<S, A, Env> {
    pub(crate) fn new(reducer: impl Reducer<S, A, Env> + 'static) -> Self {
        Self {
            reducer: Box::new(reducer),
            middleware: ComposedMiddleware::new(),
        }
    }

    pub(crate) fn add_middleware<M: Middleware<A> + 'static>(&mut self, middleware: M) {
        self.middleware.add(middleware);
    }

    /// Apply one action to the draft state.
    pub(crate) fn apply(&mut self, draft: &mut S, action: A) -> Vec<Effect<A, Env>> {
        if self.middleware.is_empty() {
            return self.reducer.reduce(draft, action);
        }

        self.middleware.before(&action);
        let effects = self.reducer.reduce(draft, action.clone());
        let ids: Vec<EffectId> = effects.iter().map(Effect::id).collect();
        self.middleware.after(&action, &ids);
        effects
    }
}
