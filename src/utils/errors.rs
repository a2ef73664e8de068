// src/utils/errors.rs
//! Engine error types
//!
//! Validation and spawn errors are returned synchronously to the caller of
//! `create_session`. Timeout and idle terminations are ordinary lifecycle
//! outcomes recorded on the session, not errors.

use std::path::PathBuf;

use thiserror::Error;

/// Engine-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the container lifecycle core
#[derive(Debug, Error)]
pub enum EngineError {
    /// A requested host path is not covered by the mount allowlist.
    /// Fatal to session creation, never downgraded.
    #[error("mount rejected: '{0}' is not covered by the mount allowlist")]
    MountRejected(PathBuf),

    /// The concurrency gate did not free a slot within the caller's deadline
    #[error("admission timed out waiting for container capacity")]
    AdmissionTimeout,

    /// The container process failed to start
    #[error("container spawn failed: {0}")]
    SpawnFailed(String),

    /// No session with the given id is known to the manager
    #[error("unknown session: {0}")]
    SessionNotFound(String),

    /// IPC artifact could not be written or read
    #[error("IPC failure: {0}")]
    IpcFailed(String),

    /// Configuration could not be resolved
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
