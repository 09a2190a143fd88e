//! Unified error handling for lroctl-core
//!
//! Pollers report failures as [`PollError`], classified as transient, not-found,
//! or fatal. The waiter turns every terminal state into a [`WaitError`] variant
//! carrying the operation name, and exposes the classification through
//! [`WaitError::kind`] and the CLI exit code through [`WaitError::exit_code`].
//!
//! # Example
//!
//! ```rust
//! use lroctl_core::{ErrorKind, PollError, WaitError};
//!
//! let err = WaitError::FatalPoll {
//!     operation: "operation-123".to_string(),
//!     source: PollError::fatal("permission denied"),
//! };
//! assert_eq!(err.kind(), ErrorKind::FatalPollFailure);
//! assert_eq!(err.exit_code(), 1);
//! assert!(!err.is_retryable());
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::operation::OperationErrorInfo;

/// Error classification kinds
///
/// These are kinds rather than types: several [`WaitError`] variants can map
/// onto the same kind, and [`PollError`] maps onto the two poll kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The server reported `done=true` with a non-empty error
    OperationError,
    /// The retry clock ran out before the operation finished
    TimeoutError,
    /// The caller aborted while waiting
    CancelledError,
    /// Transient transport or protocol fault, subject to retry
    PollFailure,
    /// Non-retryable fault (auth, malformed response, exhausted retry budget)
    FatalPollFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::OperationError => "OperationError",
            ErrorKind::TimeoutError => "TimeoutError",
            ErrorKind::CancelledError => "CancelledError",
            ErrorKind::PollFailure => "PollFailure",
            ErrorKind::FatalPollFailure => "FatalPollFailure",
        };
        f.write_str(name)
    }
}

/// How a single poll failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollErrorKind {
    /// Worth another try (network blip, 5xx, 429, per-RPC budget elapsed)
    Transient,
    /// The operation is not visible yet; transient only for the first polls
    NotFound,
    /// Retrying cannot help
    Fatal,
}

/// Error returned by a poller's remote calls
#[derive(Error, Debug)]
#[error("{message}")]
pub struct PollError {
    kind: PollErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl PollError {
    pub fn new(kind: PollErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// A failure the engine should retry
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(PollErrorKind::Transient, message)
    }

    /// A failure the engine must surface immediately
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(PollErrorKind::Fatal, message)
    }

    /// The operation (or its target) could not be found
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(PollErrorKind::NotFound, message)
    }

    /// Classify an HTTP status code
    ///
    /// 404 is `NotFound`; 408, 429 and 5xx are `Transient`; everything else
    /// (auth failures, malformed requests) is `Fatal`.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            404 => PollErrorKind::NotFound,
            408 | 429 | 500..=599 => PollErrorKind::Transient,
            _ => PollErrorKind::Fatal,
        };
        Self::new(kind, format!("HTTP {}: {}", status, message.into()))
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> PollErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind == PollErrorKind::Transient
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == PollErrorKind::NotFound
    }

    /// Reclassify as fatal, keeping message and source
    pub(crate) fn into_fatal(mut self) -> Self {
        self.kind = PollErrorKind::Fatal;
        self
    }
}

/// Why the waiter gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutReason {
    /// Wall-clock deadline reached
    Deadline,
    /// `max_attempts` retrials used up
    MaxAttempts(u32),
}

/// Terminal failure of a waiter run
#[derive(Error, Debug)]
pub enum WaitError {
    /// Operation finished with a server-reported error
    #[error("Operation [{operation}] failed: {error}")]
    Operation {
        operation: String,
        error: OperationErrorInfo,
    },

    /// Operation did not finish before the schedule ran out
    #[error("{}", timeout_message(operation, *max_wait, *elapsed, *reason))]
    Timeout {
        operation: String,
        max_wait: Duration,
        /// Time actually spent waiting
        elapsed: Duration,
        reason: TimeoutReason,
        attempts: u32,
    },

    /// Caller cancelled while waiting
    #[error("Aborted by ctrl-c while waiting for operation [{operation}]")]
    Cancelled { operation: String },

    /// Poll failure that could not (or could no longer) be retried
    #[error("Failed to poll operation [{operation}]: {source}")]
    FatalPoll {
        operation: String,
        #[source]
        source: PollError,
    },

    /// Operation reference could not be parsed
    #[error("Invalid operation reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// Invalid schedule or configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

fn timeout_message(
    operation: &str,
    max_wait: Duration,
    elapsed: Duration,
    reason: TimeoutReason,
) -> String {
    match reason {
        TimeoutReason::MaxAttempts(retrials) => format!(
            "Operation [{}] has not finished in {} seconds after max {} retrials",
            operation,
            elapsed.as_secs(),
            retrials
        ),
        TimeoutReason::Deadline => format!(
            "Operation [{}] has not finished in {} seconds. The operation may still be \
             underway remotely and may still succeed; check its state with a describe command.",
            operation,
            max_wait.as_secs()
        ),
    }
}

/// Result type alias for waiter operations
pub type Result<T> = std::result::Result<T, WaitError>;

impl WaitError {
    /// Classification of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            WaitError::Operation { .. } => ErrorKind::OperationError,
            WaitError::Timeout { .. } => ErrorKind::TimeoutError,
            WaitError::Cancelled { .. } => ErrorKind::CancelledError,
            WaitError::FatalPoll { .. }
            | WaitError::InvalidReference { .. }
            | WaitError::Config(_) => ErrorKind::FatalPollFailure,
        }
    }

    /// Process exit code for this error
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::OperationError => 1,
            ErrorKind::TimeoutError => 2,
            ErrorKind::CancelledError => 130,
            ErrorKind::PollFailure | ErrorKind::FatalPollFailure => 1,
        }
    }

    /// Operation name this error refers to, if any
    pub fn operation(&self) -> Option<&str> {
        match self {
            WaitError::Operation { operation, .. }
            | WaitError::Timeout { operation, .. }
            | WaitError::Cancelled { operation }
            | WaitError::FatalPoll { operation, .. } => Some(operation),
            WaitError::InvalidReference { .. } | WaitError::Config(_) => None,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WaitError::Cancelled { .. })
    }

    #[must_use]
    pub fn is_operation_error(&self) -> bool {
        matches!(self, WaitError::Operation { .. })
    }

    /// Returns true if waiting again might succeed
    ///
    /// A timed-out operation may still be running remotely, so a fresh wait is
    /// reasonable. Server-reported errors and fatal poll failures are final.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }
}
