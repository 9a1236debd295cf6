//! Action trait for type-safe state transitions

use std::fmt::Debug;

/// Marker trait for actions that can be dispatched to a runtime
///
/// Actions describe something that happened. They should be:
/// - Clone: Actions may be logged, recorded by test harnesses, or replayed
/// - Debug: For debugging and logging
/// - Send + 'static: Effects produce actions on other threads
///
/// Use `#[derive(Action)]` from `unidirect-macros` to auto-implement this trait.
pub trait Action: Clone + Debug + Send + 'static {
    /// Get the action name for logging and filtering
    fn name(&self) -> &'static str;
}

