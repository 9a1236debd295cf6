//! Applications whose state carries its own behaviour

use crate::effect::Effect;
use crate::subscriptions::Subscription;
use crate::Action;

/// A state type that knows how to reduce actions and which subscriptions it
/// wants.
///
/// This is an alternative to passing a reducer and a subscriptions function
/// separately. Start one with [`start_application`](crate::start_application).
///
/// ```ignore
/// #[derive(Clone, Default)]
/// struct Counter {
///     count: i64,
///     ticking: bool,
/// }
///
/// impl Application for Counter {
///     type Action = CounterAction;
///     type Env = ();
///
///     fn reduce(&mut self, action: CounterAction) -> Vec<Effect<CounterAction, ()>> {
///         match action {
///             CounterAction::Tick => self.count += 1,
///             CounterAction::Toggle => self.ticking = !self.ticking,
///         }
///         vec![]
///     }
///
///     fn subscriptions(&self) -> Vec<Subscription<CounterAction, ()>> {
///         if self.ticking {
///             vec![Subscription::interval("tick", Duration::from_secs(1), || CounterAction::Tick)]
///         } else {
///             vec![]
///         }
///     }
/// }
/// ```
pub trait Application: Clone + Send + Sync + 'static {
    /// Actions this application reacts to.
    type Action: Action;
    /// Shared capabilities handed to effects and subscriptions.
    type Env: Send + Sync + 'static;

    /// Apply an action to `self`.
    fn reduce(&mut self, action: Self::Action) -> Vec<Effect<Self::Action, Self::Env>>;

    /// Subscriptions that should be running for the current state.
    fn subscriptions(&self) -> Vec<Subscription<Self::Action, Self::Env>> {
        Vec::new()
    }

    /// Effects launched once, before the first action.
    fn initial_effects(&self) -> Vec<Effect<Self::Action, Self::Env>> {
        Vec::new()
    }
}
