//! Connection descriptors and hints
//!
//! A [`ConnectionHint`] is whatever the caller knows about the cluster; every field
//! is optional. A [`ConnectionDescriptor`] is a complete set of parameters the
//! resolver can try. Hosts follow the libpq convention: a value starting with `/`
//! names the directory holding the server's Unix socket.

mod connection_string;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Conventional TCP host
pub const DEFAULT_HOST: &str = "localhost";

/// Conventional server port
pub const DEFAULT_PORT: u16 = 5432;

/// Conventional superuser role
pub const DEFAULT_USER: &str = "postgres";

/// Database sessions connect to unless told otherwise.
///
/// `template1` exists in every cluster and, unlike `template0`, accepts
/// connections. PostgreSQL will not drop the database a session is connected to,
/// so callers that want to drop a database must not connect to it.
pub const DEFAULT_DATABASE: &str = "template1";

/// Caller-supplied, possibly partial connection parameters
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHint {
    /// Host name, IP address or socket directory
    pub host: Option<String>,
    /// Server port
    pub port: Option<u16>,
    /// Database role
    pub user: Option<String>,
    /// Password for the role
    pub password: Option<String>,
    /// Database to connect to
    pub database: Option<String>,
}

impl ConnectionHint {
    /// Set host (name, address, or absolute socket directory)
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set database role
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set database
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Whether the caller opted out of guessing: host, port, user and database are all set
    pub fn is_fully_specified(&self) -> bool {
        self.host.is_some() && self.port.is_some() && self.user.is_some() && self.database.is_some()
    }

    /// The hint as a candidate, if it is fully specified
    pub fn as_candidate(&self) -> Option<ConnectionDescriptor> {
        if !self.is_fully_specified() {
            return None;
        }
        Some(ConnectionDescriptor {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone()?,
            password: self.password.clone(),
            database: self.database.clone()?,
        })
    }
}

/// Where a descriptor points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket file
    Socket(PathBuf),
    /// TCP host and port
    Tcp {
        /// Host name or address
        host: String,
        /// Port
        port: u16,
    },
}

/// A complete set of connection parameters
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Host name, IP address or socket directory (`None` means [`DEFAULT_HOST`])
    pub host: Option<String>,
    /// Server port (`None` means [`DEFAULT_PORT`])
    pub port: Option<u16>,
    /// Database role
    pub user: String,
    /// Password for the role
    pub password: Option<String>,
    /// Database to connect to
    pub database: String,
}

impl ConnectionDescriptor {
    /// Create a descriptor for `user` on `database` with default host and port
    pub fn new(user: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: None,
            port: None,
            user: user.into(),
            password: None,
            database: database.into(),
        }
    }

    /// Set host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Effective port
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Socket directory, when the host names one
    pub fn socket_dir(&self) -> Option<&str> {
        self.host.as_deref().filter(|h| h.starts_with('/'))
    }

    /// Resolve the transport endpoint
    pub fn endpoint(&self) -> Endpoint {
        let port = self.effective_port();
        match self.socket_dir() {
            Some(dir) => Endpoint::Socket(socket_path(dir, port)),
            None => Endpoint::Tcp {
                host: self.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port,
            },
        }
    }

    /// Whether the server is on this machine (socket or loopback)
    pub fn is_local(&self) -> bool {
        match self.endpoint() {
            Endpoint::Socket(_) => true,
            Endpoint::Tcp { host, .. } => {
                matches!(host.as_str(), "localhost" | "127.0.0.1" | "::1")
            }
        }
    }

    /// Convert back into a hint carrying every field
    pub fn to_hint(&self) -> ConnectionHint {
        ConnectionHint {
            host: self.host.clone(),
            port: self.port,
            user: Some(self.user.clone()),
            password: self.password.clone(),
            database: Some(self.database.clone()),
        }
    }
}

/// Path of the server socket inside `dir` for `port`
pub fn socket_path(dir: &str, port: u16) -> PathBuf {
    PathBuf::from(format!("{}/.s.PGSQL.{}", dir.trim_end_matches('/'), port))
}

// Passwords never reach logs or error messages.
impl fmt::Debug for ConnectionHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("database", &self.database)
            .finish()
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("database", &self.database)
            .finish()
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user)?;
        if self.password.is_some() {
            write!(f, ":********")?;
        }
        match self.endpoint() {
            Endpoint::Socket(path) => write!(f, "@{}", path.display())?,
            Endpoint::Tcp { host, port } => write!(f, "@{}:{}", host, port)?,
        }
        write!(f, "/{}", self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_fully_specified() {
        let hint = ConnectionHint::default()
            .host("db.internal")
            .port(5433)
            .user("admin")
            .database("postgres");
        assert!(hint.is_fully_specified());

        let candidate = hint.as_candidate().unwrap();
        assert_eq!(candidate.host.as_deref(), Some("db.internal"));
        assert_eq!(candidate.port, Some(5433));
        assert_eq!(candidate.password, None);
        assert_eq!(candidate.to_hint(), hint);
    }

    #[test]
    fn test_hint_partial_is_not_a_candidate() {
        let hint = ConnectionHint::default().host("localhost").port(5432);
        assert!(!hint.is_fully_specified());
        assert!(hint.as_candidate().is_none());
    }

    #[test]
    fn test_endpoint_socket() {
        let desc = ConnectionDescriptor::new("postgres", DEFAULT_DATABASE)
            .host("/var/run/postgresql/")
            .port(5433);
        assert_eq!(
            desc.endpoint(),
            Endpoint::Socket(PathBuf::from("/var/run/postgresql/.s.PGSQL.5433"))
        );
        assert!(desc.is_local());
    }

    #[test]
    fn test_endpoint_tcp_defaults() {
        let desc = ConnectionDescriptor::new("postgres", DEFAULT_DATABASE);
        assert_eq!(
            desc.endpoint(),
            Endpoint::Tcp {
                host: "localhost".into(),
                port: 5432
            }
        );
        assert!(desc.is_local());
    }

    #[test]
    fn test_remote_host_is_not_local() {
        let desc = ConnectionDescriptor::new("postgres", DEFAULT_DATABASE).host("10.0.0.7");
        assert!(!desc.is_local());
    }

    #[test]
    fn test_display_redacts_password() {
        let desc = ConnectionDescriptor::new("postgres", "template1")
            .host("localhost")
            .port(5432)
            .password("s3cret");
        let shown = desc.to_string();
        assert_eq!(shown, "postgres:********@localhost:5432/template1");
        assert!(!format!("{:?}", desc).contains("s3cret"));
        assert!(!format!("{:?}", desc.to_hint()).contains("s3cret"));
    }
}
