//! Error types

use crate::descriptor::ConnectionDescriptor;
use crate::protocol::ErrorFields;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level I/O failure
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration or connection parameters
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Server rejected the login
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Unexpected or malformed protocol traffic
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server rejected a statement
    #[error("{0}")]
    Sql(ErrorFields),

    /// Server closed the connection
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Connection is not idle
    #[error("connection busy: {0}")]
    ConnectionBusy(String),

    /// Illegal connection state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// An operation did not finish within its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// No candidate produced a session
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// A resolved session rejected a statement
    #[error(transparent)]
    Statement(#[from] StatementError),

    /// Switching the OS identity failed
    #[error(transparent)]
    Escalation(#[from] EscalationError),
}

impl Error {
    /// Classify a failed connection attempt.
    ///
    /// Anything the server said "no" to counts as an authentication failure;
    /// anything that prevented talking to a server at all counts as unreachable.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::Authentication(_) | Error::Sql(_) => FailureKind::AuthFailed,
            Error::Timeout(_) => FailureKind::Timeout,
            Error::Io(e) if e.kind() == io::ErrorKind::TimedOut => FailureKind::Timeout,
            Error::Escalation(EscalationError::Timeout(_)) => FailureKind::Timeout,
            Error::Escalation(_) => FailureKind::AuthFailed,
            _ => FailureKind::Unreachable,
        }
    }
}

/// Why a single candidate did not yield a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Server reachable but the login was refused
    AuthFailed,
    /// Nothing accepted the connection
    Unreachable,
    /// The attempt exceeded the connect timeout
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::AuthFailed => write!(f, "authentication failed"),
            FailureKind::Unreachable => write!(f, "unreachable"),
            FailureKind::Timeout => write!(f, "timed out"),
        }
    }
}

/// Ledger entry for one failed candidate
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    /// Candidate that was tried
    pub descriptor: ConnectionDescriptor,
    /// Final classification of the attempt
    pub kind: FailureKind,
    /// Reason reported by the direct attempt
    pub detail: String,
    /// Reason reported by the escalated attempt, if one was made
    pub escalation: Option<String>,
}

impl fmt::Display for FailedAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.descriptor, self.kind, self.detail)?;
        if let Some(ref escalation) = self.escalation {
            write!(f, "; as service account: {}", escalation)?;
        }
        Ok(())
    }
}

/// Every candidate failed
#[derive(Debug, Clone, Error)]
pub struct ResolutionError {
    /// One entry per candidate, in the order they were tried
    pub attempts: Vec<FailedAttempt>,
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "could not connect to PostgreSQL as superuser ({} candidate(s) tried)",
            self.attempts.len()
        )?;
        for (i, attempt) in self.attempts.iter().enumerate() {
            write!(f, "\n  {}. {}", i + 1, attempt)?;
        }
        write!(
            f,
            "\nConsider providing non-standard connection parameters (host, port, user, database)."
        )
    }
}

/// A resolved session rejected a statement
#[derive(Debug, Error)]
#[error("statement failed: {source}")]
pub struct StatementError {
    /// The statement as submitted
    pub statement: String,
    /// Underlying error, unchanged
    pub source: Box<Error>,
}

impl StatementError {
    pub(crate) fn new(statement: &str, source: Error) -> Self {
        Self {
            statement: statement.to_string(),
            source: Box::new(source),
        }
    }
}

/// Switching the OS identity to the service account failed
#[derive(Debug, Error)]
pub enum EscalationError {
    /// The privilege-switch program is not installed
    #[error("`{program}` not found, cannot act as `{account}`")]
    Unavailable {
        /// Program that was looked up
        program: String,
        /// Target account
        account: String,
    },

    /// The subprocess could not be started
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// OS error
        #[source]
        source: io::Error,
    },

    /// The OS wants a credential and none was supplied
    #[error("acting as `{account}` requires a password")]
    CredentialRequired {
        /// Target account
        account: String,
    },

    /// The OS refused the identity switch
    #[error("not allowed to act as `{account}`: {reason}")]
    Rejected {
        /// Target account
        account: String,
        /// Message reported by the privilege-switch program
        reason: String,
    },

    /// The escalated command did not finish in time
    #[error("escalated command timed out after {0:?}")]
    Timeout(Duration),
}
