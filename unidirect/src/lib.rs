//! unidirect: a unidirectional state runtime for async Rust
//!
//! Like Redux/Elm, but on tokio. All state changes happen by reducing
//! actions; side effects are values the reducer returns; long-lived sources
//! are declared from state and started or stopped as it changes.
//!
//! # Example
//! ```ignore
//! use std::time::Duration;
//! use unidirect::prelude::*;
//!
//! #[derive(Action, Clone, Debug)]
//! enum ClockAction {
//!     Toggle,
//!     Tick,
//! }
//!
//! #[derive(Clone, Default)]
//! struct Clock {
//!     running: bool,
//!     ticks: u64,
//! }
//!
//! fn reducer(state: &mut Clock, action: ClockAction) -> Vec<Effect<ClockAction, ()>> {
//!     match action {
//!         ClockAction::Toggle => state.running = !state.running,
//!         ClockAction::Tick => state.ticks += 1,
//!     }
//!     vec![]
//! }
//!
//! fn subscriptions(state: &Clock) -> Vec<Subscription<ClockAction, ()>> {
//!     if state.running {
//!         vec![Subscription::interval("clock", Duration::from_secs(1), || ClockAction::Tick)]
//!     } else {
//!         vec![]
//!     }
//! }
//!
//! let handle = start(Clock::default(), vec![], reducer, subscriptions, ());
//! handle.dispatch(ClockAction::Toggle);
//! ```

// Re-export everything from core
pub use unidirect_core::*;

// Re-export derive macros
pub use unidirect_macros::Action;

/// Prelude for convenient imports
pub mod prelude {
    // Traits
    pub use unidirect_core::{Action, Application, Middleware, Reducer};

    // Derive macros
    pub use unidirect_macros::Action;

    // Effects and subscriptions
    pub use unidirect_core::{Effect, EffectId, RetryConfig, SubKey, Subscription};

    // Runtime
    pub use unidirect_core::{
        no_subscriptions, start, start_application, Dispatcher, Runtime, RuntimeConfig,
        RuntimeError, RuntimeHandle, StateView,
    };

    // Middleware
    pub use unidirect_core::{ComposedMiddleware, LoggingMiddleware, NoopMiddleware};
}
