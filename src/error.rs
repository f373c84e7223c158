//! Error taxonomy for the run.
//!
//! Spawn errors are per-command outcomes and never abort the run by
//! themselves; configuration and terminal errors fail fast.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    /// Allocating the pty pair or spawning the child failed.
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    /// Invalid CLI flags or config file contents.
    #[error("configuration error: {0}")]
    Config(String),

    /// Initializing or restoring the terminal failed.
    #[error("terminal error: {0}")]
    Terminal(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
