//! Core runtime for unidirect
//!
//! This crate provides a unidirectional state runtime in the Redux/Elm
//! tradition: state is changed only by reducing actions, side effects are
//! values returned by the reducer, and long-lived event sources are declared
//! as a function of state.
//!
//! # Core Concepts
//!
//! - **Action**: an event value driving one state transition
//! - **Reducer**: applies an action to state and returns [`Effect`]s
//! - **Effect**: a cancellable async operation producing actions, then completing
//! - **Subscription**: a keyed, long-lived action source, started and stopped
//!   as the state asks for it
//! - **Runtime**: the loop that owns the state and drives all of the above
//!
//! # Basic Example
//!
//! ```ignore
//! use unidirect_core::prelude::*;
//!
//! #[derive(Clone, Debug)]
//! enum Action {
//!     Search(String),
//!     DidSearch(Vec<String>),
//! }
//!
//! #[derive(Clone, Default)]
//! struct AppState {
//!     results: Vec<String>,
//!     pending: Option<EffectId>,
//! }
//!
//! fn reducer(state: &mut AppState, action: Action) -> Vec<Effect<Action, Env>> {
//!     match action {
//!         Action::Search(query) => vec![
//!             Effect::cancel_tracked(&mut state.pending),
//!             Effect::call(|env: &Env| &*env.search, query, Action::DidSearch)
//!                 .track(&mut state.pending),
//!         ],
//!         Action::DidSearch(results) => {
//!             state.pending = None;
//!             state.results = results;
//!             vec![]
//!         }
//!     }
//! }
//!
//! let handle = start(AppState::default(), vec![], reducer, no_subscriptions, Env::live());
//! handle.dispatch(Action::Search("rust".into()));
//! ```

pub mod action;
pub mod application;
pub mod effect;
pub mod error;
pub mod reducer;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod subscriptions;
mod task;
pub mod testing;
pub mod view;

// Core trait exports
pub use action::Action;
pub use application::Application;

// Effect exports
pub use effect::{Effect, EffectId, EffectManager};
pub use registry::EffectRegistry;

// Error exports
pub use error::{Result, RuntimeError};

// Reducer exports
pub use reducer::{ComposedMiddleware, LoggingMiddleware, Middleware, NoopMiddleware, Reducer};

// Subscription exports
pub use retry::RetryConfig;
pub use subscriptions::{ReconcileOutcome, SubKey, Subscription, SubscriptionKey, SubscriptionSet};

// Runtime exports
pub use runtime::{
    no_subscriptions, start, start_application, Dispatcher, Pullback, Runtime, RuntimeConfig,
    RuntimeHandle,
};

// View exports
pub use view::StateView;

// Testing exports
pub use testing::TestHarness;

#[cfg(feature = "testing-time")]
pub use testing::{advance_time, pause_time, resume_time};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::Action;
    pub use crate::application::Application;
    pub use crate::effect::{Effect, EffectId};
    pub use crate::error::RuntimeError;
    pub use crate::reducer::{
        ComposedMiddleware, LoggingMiddleware, Middleware, NoopMiddleware, Reducer,
    };
    pub use crate::retry::RetryConfig;
    pub use crate::runtime::{
        no_subscriptions, start, start_application, Dispatcher, Runtime, RuntimeConfig,
        RuntimeHandle,
    };
    pub use crate::subscriptions::{SubKey, Subscription};
    pub use crate::view::StateView;
}
