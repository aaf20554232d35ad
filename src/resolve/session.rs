//! Resolved sessions

use super::driver::DriverConnection;
use crate::connection::QueryResult;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{EscalationError, FailedAttempt, FailureKind, StatementError};
use crate::escalate::{psql, Escalator};
use crate::prompt::Secret;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How a session talks to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Driver connection as the descriptor's user
    Direct,
    /// `psql` run as the service account, one process per statement
    Escalated,
}

impl Strategy {
    /// Lowercase name, used as metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Escalated => "escalated",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of trying one candidate
#[derive(Debug)]
pub enum ProbeResult {
    /// The candidate produced a session
    Connected(Session),
    /// A server answered and refused the login
    AuthFailed(FailedAttempt),
    /// Nothing accepted the connection
    Unreachable(FailedAttempt),
    /// The attempt ran out of time
    Timeout(FailedAttempt),
}

impl ProbeResult {
    pub(crate) fn failed(attempt: FailedAttempt) -> Self {
        match attempt.kind {
            FailureKind::AuthFailed => ProbeResult::AuthFailed(attempt),
            FailureKind::Unreachable => ProbeResult::Unreachable(attempt),
            FailureKind::Timeout => ProbeResult::Timeout(attempt),
        }
    }

    /// The session, or the ledger entry explaining why there is none
    pub fn into_result(self) -> std::result::Result<Session, FailedAttempt> {
        match self {
            ProbeResult::Connected(session) => Ok(session),
            ProbeResult::AuthFailed(attempt)
            | ProbeResult::Unreachable(attempt)
            | ProbeResult::Timeout(attempt) => Err(attempt),
        }
    }
}

enum Backend {
    Direct(Box<dyn DriverConnection>),
    Escalated {
        escalator: Arc<dyn Escalator>,
        account: String,
        credential: Option<Secret>,
        timeout: Duration,
    },
}

/// An administrative session bound to one successful descriptor
///
/// Statements run one at a time in autocommit mode. A session is owned by one
/// caller; close it when done.
pub struct Session {
    descriptor: ConnectionDescriptor,
    backend: Backend,
}

impl Session {
    pub(crate) fn direct(descriptor: ConnectionDescriptor, conn: Box<dyn DriverConnection>) -> Self {
        Self {
            descriptor,
            backend: Backend::Direct(conn),
        }
    }

    pub(crate) fn escalated(
        descriptor: ConnectionDescriptor,
        escalator: Arc<dyn Escalator>,
        account: String,
        credential: Option<Secret>,
        timeout: Duration,
    ) -> Self {
        Self {
            descriptor,
            backend: Backend::Escalated {
                escalator,
                account,
                credential,
                timeout,
            },
        }
    }

    /// Descriptor the session was resolved with
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Strategy the session uses
    pub fn strategy(&self) -> Strategy {
        match self.backend {
            Backend::Direct(_) => Strategy::Direct,
            Backend::Escalated { .. } => Strategy::Escalated,
        }
    }

    /// Execute one statement
    ///
    /// Failures are returned as-is, wrapped with the statement; nothing is retried.
    pub async fn execute(&mut self, statement: &str) -> std::result::Result<QueryResult, StatementError> {
        let strategy = self.strategy();
        let result = match self.backend {
            Backend::Direct(ref mut conn) => conn.execute(statement).await,
            Backend::Escalated {
                ref escalator,
                ref account,
                ref credential,
                timeout,
            } => {
                let invocation = psql::statement(&self.descriptor, statement);
                match tokio::time::timeout(
                    timeout,
                    escalator.run_as(account, &invocation, credential.as_ref()),
                )
                .await
                {
                    Err(_) => Err(Error::Escalation(EscalationError::Timeout(timeout))),
                    Ok(Err(e)) => Err(Error::Escalation(e)),
                    Ok(Ok(output)) if output.success() => Ok(psql::parse_rows(&output.stdout)),
                    Ok(Ok(output)) => Err(psql::failure(&output, false)),
                }
            }
        };

        let outcome = if result.is_ok() {
            crate::metrics::labels::OUTCOME_SUCCESS
        } else {
            crate::metrics::labels::OUTCOME_FAILURE
        };
        crate::metrics::counters::statement_executed(strategy.as_str(), outcome);

        result.map_err(|e| {
            tracing::debug!(%strategy, error = %e, "statement failed");
            StatementError::new(statement, e)
        })
    }

    /// Close the session
    pub async fn close(self) -> Result<()> {
        match self.backend {
            Backend::Direct(conn) => conn.close().await,
            Backend::Escalated { .. } => Ok(()),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("descriptor", &self.descriptor)
            .field("strategy", &self.strategy())
            .finish()
    }
}
