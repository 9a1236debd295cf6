//! Projected views of the published state
//!
//! A [`StateView`] follows the runtime's state-change channel through a
//! partial projection. Cycles whose state projects to `None` leave the view
//! untouched and do not wake it; a `Some` replaces the current value.
//!
//! ```ignore
//! // Only wake the settings screen while a profile is loaded
//! let mut profile = handle.filter_map(Profile::default(), |s: &AppState| s.profile.clone());
//! while profile.changed().await.is_ok() {
//!     render(profile.current());
//! }
//! ```

use std::fmt;

use tokio::sync::watch;

use crate::error::{Result, RuntimeError};

type Projection<S, T> = Box<dyn Fn(&S) -> Option<T> + Send + Sync>;

/// A sub-state view that changes only when its projection yields a value.
pub struct StateView<S, T> {
    source: watch::Receiver<S>,
    project: Projection<S, T>,
    current: T,
}

impl<S, T: fmt::Debug> fmt::Debug for StateView<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateView")
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl<S, T> StateView<S, T> {
    /// Follow `source` from its next change on, starting at `initial`.
    ///
    /// Publications `source` has already seen are not replayed.
    pub fn new<F>(source: watch::Receiver<S>, initial: T, project: F) -> Self
    where
        F: Fn(&S) -> Option<T> + Send + Sync + 'static,
    {
        Self {
            source,
            project: Box::new(project),
            current: initial,
        }
    }

    /// The last projected value.
    pub fn current(&self) -> &T {
        &self.current
    }

    /// Apply a publication that arrived since the last check, if any.
    ///
    /// Returns whether the view changed. Fails with [`RuntimeError::Closed`]
    /// once the runtime is gone.
    pub fn refresh(&mut self) -> Result<bool> {
        if !self.source.has_changed().map_err(|_| RuntimeError::Closed)? {
            return Ok(false);
        }
        Ok(self.apply_latest())
    }

    /// Wait until a publication projects to a value.
    pub async fn changed(&mut self) -> Result<()> {
        loop {
            self.source
                .changed()
                .await
                .map_err(|_| RuntimeError::Closed)?;
            if self.apply_latest() {
                return Ok(());
            }
        }
    }

    fn apply_latest(&mut self) -> bool {
        let projected = (self.project)(&self.source.borrow_and_update());
        match projected {
            Some(value) => {
                self.current = value;
                true
            }
            None => false,
        }
    }
}
