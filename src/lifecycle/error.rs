//! Lifecycle-specific error types.

use thiserror::Error;

use super::coordinator::LifecyclePhase;
use crate::error::ComposeError;

/// Errors raised while driving the lifecycle state machine.
///
/// Only start-phase failures appear here: ready-hook failures degrade health
/// without erroring, and shutdown-hook failures are logged and swallowed.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A start hook failed; started modules have been rolled back.
    #[error("start hook failed for module '{module}': {cause}")]
    StartHookFailed {
        module: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("invalid lifecycle transition: {from} -> {attempted}")]
    InvalidTransition {
        from: LifecyclePhase,
        attempted: LifecyclePhase,
    },

    #[error(transparent)]
    Compose(#[from] ComposeError),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
