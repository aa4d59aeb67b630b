//! Error types for taskmill.
//!
//! The crate keeps leaf error enums next to the types that produce them
//! (`SetError` and friends live with the handoff, `ConfigError` with the
//! configuration) and converts them into the crate-wide [`Error`] at API
//! boundaries. Errors are explicit and typed; there are no stringly-typed
//! errors and no panics on expected failure paths.

use core::fmt;
use std::sync::Arc;

use crate::config::ConfigError;
use crate::future::handoff::{SetError, TryTakeError, WaitError};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A deadline elapsed before the operation could finish.
    DeadlineExceeded,
    /// The other half of a handoff is gone (or the outcome was already
    /// consumed).
    HandoffClosed,
    /// No outcome is available yet (would block).
    HandoffEmpty,
    /// The handoff outcome was already set.
    AlreadyCompleted,
    /// A submitted task failed (panicked or reported a failure).
    TaskFailed,
    /// Invalid configuration (bad value, bad env var).
    Config,
    /// Internal engine error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns true if this error is a timeout condition.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }

    /// Returns true if this error means the operation can be retried once
    /// the outcome becomes available.
    #[must_use]
    pub const fn is_would_block(&self) -> bool {
        matches!(self, Self::HandoffEmpty)
    }
}

/// The main error type for taskmill operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns true if this error is a timeout condition.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        self.kind.is_timeout()
    }

    /// Creates an internal error (engine bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::new(ErrorKind::Config)
            .with_message(e.to_string())
            .with_source(e)
    }
}

impl From<WaitError> for Error {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::Timeout => Self::new(ErrorKind::DeadlineExceeded),
            WaitError::Disconnected => Self::new(ErrorKind::HandoffClosed),
            WaitError::Failed(failure) => {
                Self::new(ErrorKind::TaskFailed).with_message(failure.to_string())
            }
        }
    }
}

impl From<TryTakeError> for Error {
    fn from(e: TryTakeError) -> Self {
        match e {
            TryTakeError::Empty => Self::new(ErrorKind::HandoffEmpty),
            TryTakeError::Disconnected => Self::new(ErrorKind::HandoffClosed),
            TryTakeError::Failed(failure) => {
                Self::new(ErrorKind::TaskFailed).with_message(failure.to_string())
            }
        }
    }
}

impl<T> From<SetError<T>> for Error {
    fn from(e: SetError<T>) -> Self {
        match e {
            SetError::AlreadyCompleted(_) => Self::new(ErrorKind::AlreadyCompleted),
            SetError::Disconnected(_) => Self::new(ErrorKind::HandoffClosed),
        }
    }
}

/// A specialized Result type for taskmill operations.
pub type Result<T> = core::result::Result<T, Error>;
