//! Connection string parsing into hints
//!
//! Supports formats:
//! * postgres://[user[:password]@][host][:port][/database]
//! * postgres:///database (local socket, directory left to the prober)
//! * postgres:///database?host=/path/to/socket&port=5433
//!
//! Anything the string leaves out stays unset in the resulting hint so the prober
//! can fill it in.

use super::ConnectionHint;
use crate::{Error, Result};
use std::str::FromStr;

/// Extract a query parameter value from a query string
fn parse_query_param(query_string: &str, param: &str) -> Option<String> {
    query_string
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == param)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn parse_port(s: &str) -> Result<u16> {
    s.parse()
        .map_err(|_| Error::Config(format!("invalid port: {:?}", s)))
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

impl ConnectionHint {
    /// Parse a `postgres://` connection string into a hint
    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("postgres://")
            .or_else(|| s.strip_prefix("postgresql://"))
            .ok_or_else(|| Error::Config("connection string must start with postgres://".into()))?;

        let (rest, query_string) = rest.split_once('?').unwrap_or((rest, ""));

        let (auth, rest) = match rest.rsplit_once('@') {
            Some((auth, rest)) => (Some(auth), rest),
            None => (None, rest),
        };

        let (user, password) = match auth.map(|a| a.split_once(':').unwrap_or((a, ""))) {
            Some((user, password)) => (non_empty(user), non_empty(password)),
            None => (None, None),
        };

        let (host_port, database) = rest.split_once('/').unwrap_or((rest, ""));

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) if !host_port.starts_with('[') || host.ends_with(']') => {
                (non_empty(host), Some(parse_port(port)?))
            }
            _ => (non_empty(host_port), None),
        };

        // Query parameters override the authority section, as in libpq
        let host = parse_query_param(query_string, "host").or(host);
        let port = match parse_query_param(query_string, "port") {
            Some(p) => Some(parse_port(&p)?),
            None => port,
        };
        let user = parse_query_param(query_string, "user").or(user);
        let password = parse_query_param(query_string, "password").or(password);
        let host = host.map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string());

        Ok(Self {
            host,
            port,
            user,
            password,
            database: non_empty(database),
        })
    }
}

impl FromStr for ConnectionHint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
