//! Error types for the transfer engine.
//!
//! `EngineError` covers job-level problems that prevent a job from being set
//! up or driven. File-level failures are `TransferError`s: they carry a
//! [`FailureKind`] and are resolved through the retry protocol, then recorded
//! on the file's report rather than surfaced as `EngineError`.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

/// Errors that prevent a job from being created or run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// `start()` was called on a job that already left `NotStarted`
    #[error("job {id} has already been started")]
    AlreadyStarted { id: uuid::Uuid },

    /// Configuration values are inconsistent
    #[error("invalid job configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The destination of a job must be an existing directory
    #[error("destination is not a directory: {path}")]
    DestinationNotADirectory { path: String },

    /// The worker thread could not be spawned
    #[error("failed to spawn job worker")]
    WorkerSpawn {
        #[source]
        source: io::Error,
    },

    /// The worker thread panicked before finishing
    #[error("job worker panicked")]
    WorkerPanicked,
}

/// Why a copy attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The source could not be opened for reading
    OpeningSource,
    /// The destination could not be opened (or created) for writing
    OpeningDestination,
    /// I/O failed while bytes were being moved
    Transferring,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::OpeningSource => write!(f, "cannot read file"),
            FailureKind::OpeningDestination => write!(f, "cannot write file"),
            FailureKind::Transferring => write!(f, "error while transferring"),
        }
    }
}

/// A classified failure of one copy attempt.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {source}")]
pub struct TransferError {
    pub kind: FailureKind,
    #[source]
    pub source: io::Error,
}

impl TransferError {
    pub fn new(kind: FailureKind, source: io::Error) -> Self {
        TransferError { kind, source }
    }

    pub fn opening_source(source: io::Error) -> Self {
        Self::new(FailureKind::OpeningSource, source)
    }

    pub fn opening_destination(source: io::Error) -> Self {
        Self::new(FailureKind::OpeningDestination, source)
    }

    pub fn transferring(source: io::Error) -> Self {
        Self::new(FailureKind::Transferring, source)
    }

    /// OS error code of the underlying I/O error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}
