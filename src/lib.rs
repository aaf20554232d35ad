//! pgsu: connect to an existing PostgreSQL cluster as the superuser and execute SQL.
//!
//! The caller supplies as much or as little of the connection as it knows (a
//! [`ConnectionHint`]); [`Resolver`] derives an ordered list of candidate
//! descriptors from the hint and the local environment, tries them one after the
//! other, falls back to running `psql` as the database service account through
//! `sudo` when a local candidate rejects a direct login, and hands back the first
//! [`Session`] that works.
//!
//! ```no_run
//! # async fn example() -> pgsu::Result<()> {
//! use pgsu::{ConnectionHint, Resolver};
//!
//! let mut resolver = Resolver::new();
//! let mut session = resolver.resolve(&ConnectionHint::default()).await?;
//!
//! let result = session.execute("CREATE USER app WITH PASSWORD 'secret'").await?;
//! println!("{:?}", result.command);
//! session.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Note that PostgreSQL refuses to drop the database a session is connected to.
//! Sessions default to [`DEFAULT_DATABASE`] (`template1`), which always exists.

#![warn(missing_docs)]

pub mod auth;
pub mod connection;
pub mod descriptor;
pub mod error;
pub mod escalate;
pub mod metrics;
pub mod probe;
pub mod prompt;
pub mod protocol;
pub mod resolve;

pub use connection::QueryResult;
pub use descriptor::{
    ConnectionDescriptor, ConnectionHint, Endpoint, DEFAULT_DATABASE, DEFAULT_HOST, DEFAULT_PORT,
    DEFAULT_USER,
};
pub use error::{
    Error, EscalationError, FailedAttempt, FailureKind, ResolutionError, Result, StatementError,
};
pub use escalate::{Escalator, SudoEscalator};
pub use probe::{propose, Environment, EnvironmentSnapshot, HostEnvironment};
pub use prompt::{NoPrompt, Secret, SecretPrompt, SetupFallback, TerminalPrompt};
pub use resolve::{
    Driver, DriverConnection, ProbeResult, Resolver, ResolverConfig, Session, Strategy,
    WireDriver,
};
