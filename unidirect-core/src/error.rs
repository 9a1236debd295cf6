//! Error types for runtime misuse
//!
//! Effects cannot fail, so nothing in here describes a domain failure. These
//! variants describe lifetime bugs in the host application: something held on
//! to a dispatcher longer than the runtime it points at, or an effect id was
//! registered twice.

use crate::effect::EffectId;

/// Errors surfaced by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// The runtime was torn down and can no longer accept actions.
    #[error("runtime has been shut down; an effect or subscription outlived its owner")]
    Closed,

    /// An effect id was registered while another handle with the same id was live.
    #[error("effect {0} is already registered")]
    DuplicateEffect(EffectId),
}

/// Result alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
