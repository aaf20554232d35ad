//! Environment snapshots

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

/// Directories where packaged, containerized and bundled servers put their sockets
pub const SOCKET_DIRS: &[&str] = &["/var/run/postgresql", "/run/postgresql", "/tmp", "/private/tmp"];

/// Socket directory libpq uses when none is given
#[cfg(target_os = "macos")]
pub const DEFAULT_SOCKET_DIR: &str = "/tmp";
/// Socket directory libpq uses when none is given
#[cfg(not(target_os = "macos"))]
pub const DEFAULT_SOCKET_DIR: &str = "/var/run/postgresql";

const SOCKET_PREFIX: &str = ".s.PGSQL.";

/// A server socket found on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredSocket {
    /// Directory holding the socket
    pub dir: String,
    /// Port encoded in the socket name
    pub port: u16,
}

/// Everything the prober reads from the host, captured once
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Sockets in discovery order
    #[serde(default)]
    pub sockets: Vec<DiscoveredSocket>,
    /// `PGPORT`
    #[serde(default)]
    pub pgport: Option<u16>,
    /// `PGPASSWORD`
    #[serde(default, skip_serializing)]
    pub pgpassword: Option<String>,
    /// Current OS user
    #[serde(default)]
    pub os_user: Option<String>,
    /// Socket directory used when none was discovered
    #[serde(default)]
    pub default_socket_dir: Option<String>,
}

impl EnvironmentSnapshot {
    /// Add a discovered socket
    pub fn socket(mut self, dir: impl Into<String>, port: u16) -> Self {
        self.sockets.push(DiscoveredSocket {
            dir: dir.into(),
            port,
        });
        self
    }

    /// Set `PGPORT`
    pub fn pgport(mut self, port: u16) -> Self {
        self.pgport = Some(port);
        self
    }

    /// Set `PGPASSWORD`
    pub fn pgpassword(mut self, password: impl Into<String>) -> Self {
        self.pgpassword = Some(password.into());
        self
    }

    /// Set the OS user
    pub fn os_user(mut self, user: impl Into<String>) -> Self {
        self.os_user = Some(user.into());
        self
    }

    /// Set the fallback socket directory
    pub fn default_socket_dir(mut self, dir: impl Into<String>) -> Self {
        self.default_socket_dir = Some(dir.into());
        self
    }

    /// Lowest port with a discovered socket
    pub fn lowest_socket_port(&self) -> Option<u16> {
        self.sockets.iter().map(|s| s.port).min()
    }
}

impl fmt::Debug for EnvironmentSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentSnapshot")
            .field("sockets", &self.sockets)
            .field("pgport", &self.pgport)
            .field("pgpassword", &self.pgpassword.as_ref().map(|_| "********"))
            .field("os_user", &self.os_user)
            .field("default_socket_dir", &self.default_socket_dir)
            .finish()
    }
}

/// Capability producing the snapshot the prober works from
pub trait Environment: Send + Sync {
    /// Capture the current state
    fn snapshot(&self) -> EnvironmentSnapshot;
}

/// A fixed snapshot is its own environment
impl Environment for EnvironmentSnapshot {
    fn snapshot(&self) -> EnvironmentSnapshot {
        self.clone()
    }
}

/// The real host: socket directories, process environment and OS user
#[derive(Debug, Clone)]
pub struct HostEnvironment {
    socket_dirs: Vec<PathBuf>,
}

impl HostEnvironment {
    /// Scan the conventional socket directories
    pub fn new() -> Self {
        Self::with_socket_dirs(SOCKET_DIRS.iter().map(PathBuf::from))
    }

    /// Scan `dirs` instead of the conventional ones
    pub fn with_socket_dirs(dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            socket_dirs: dirs.into_iter().collect(),
        }
    }
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for HostEnvironment {
    fn snapshot(&self) -> EnvironmentSnapshot {
        let mut snapshot = EnvironmentSnapshot {
            default_socket_dir: Some(DEFAULT_SOCKET_DIR.to_string()),
            os_user: Some(whoami::username()),
            ..Default::default()
        };

        for dir in &self.socket_dirs {
            for port in socket_ports(dir) {
                snapshot = snapshot.socket(dir.to_string_lossy(), port);
            }
        }

        if let Ok(value) = std::env::var("PGPORT") {
            match value.trim().parse() {
                Ok(port) => snapshot.pgport = Some(port),
                Err(_) => tracing::debug!(value = %value, "ignoring invalid PGPORT"),
            }
        }
        snapshot.pgpassword = std::env::var("PGPASSWORD").ok().filter(|p| !p.is_empty());

        tracing::debug!(?snapshot, "captured environment");
        snapshot
    }
}

/// Ports of the server sockets in `dir`, ascending
fn socket_ports(dir: &Path) -> Vec<u16> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut ports: Vec<u16> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_type()
                .map(|t| t.is_socket())
                .unwrap_or(false)
        })
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()?
                .strip_prefix(SOCKET_PREFIX)?
                .parse()
                .ok()
        })
        .collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}
