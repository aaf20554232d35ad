//! Candidate generation
//!
//! [`propose`] turns a hint and an [`EnvironmentSnapshot`] into the ordered list
//! of descriptors the resolver tries. It is a pure function: the same hint and
//! snapshot always give the same list.
//!
//! Unset fields are filled from the hint, then the snapshot, then the
//! conventional defaults. Without a pinned host, socket candidates come first
//! and a TCP `localhost` candidate last. Without a pinned user, the whole list
//! is repeated for the OS user, since bundled installs create the superuser role
//! under the installing account.

mod environment;

pub use environment::{
    DiscoveredSocket, Environment, EnvironmentSnapshot, HostEnvironment, DEFAULT_SOCKET_DIR,
    SOCKET_DIRS,
};

use crate::descriptor::{
    ConnectionDescriptor, ConnectionHint, DEFAULT_DATABASE, DEFAULT_HOST, DEFAULT_PORT,
    DEFAULT_USER,
};

/// Ordered candidates for `hint` in `snapshot`
pub fn propose(hint: &ConnectionHint, snapshot: &EnvironmentSnapshot) -> Vec<ConnectionDescriptor> {
    if let Some(candidate) = hint.as_candidate() {
        return vec![candidate];
    }

    let port = hint
        .port
        .or(snapshot.pgport)
        .or_else(|| snapshot.lowest_socket_port())
        .unwrap_or(DEFAULT_PORT);
    let database = hint.database.as_deref().unwrap_or(DEFAULT_DATABASE);
    let password = hint.password.as_ref().or(snapshot.pgpassword.as_ref());

    let hosts: Vec<&str> = match hint.host.as_deref() {
        Some(host) => vec![host],
        None => {
            let mut hosts: Vec<&str> = snapshot
                .sockets
                .iter()
                .filter(|s| s.port == port)
                .map(|s| s.dir.as_str())
                .collect();
            if hosts.is_empty() {
                hosts.push(
                    snapshot
                        .default_socket_dir
                        .as_deref()
                        .unwrap_or(DEFAULT_SOCKET_DIR),
                );
            }
            hosts.push(DEFAULT_HOST);
            hosts
        }
    };

    let users: Vec<&str> = match hint.user.as_deref() {
        Some(user) => vec![user],
        None => {
            let mut users = vec![DEFAULT_USER];
            if let Some(os_user) = snapshot.os_user.as_deref() {
                if os_user != DEFAULT_USER {
                    users.push(os_user);
                }
            }
            users
        }
    };

    let mut candidates: Vec<ConnectionDescriptor> = Vec::new();
    for user in &users {
        for host in &hosts {
            let mut candidate = ConnectionDescriptor::new(*user, database)
                .host(*host)
                .port(port);
            candidate.password = password.cloned();
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
    }
    candidates
}
