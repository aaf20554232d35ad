//! `psql` command lines and output parsing for escalated sessions

use super::{EscalatedOutput, Invocation};
use crate::connection::QueryResult;
use crate::descriptor::{ConnectionDescriptor, DEFAULT_HOST};
use crate::error::Error;
use crate::protocol::ErrorFields;
use std::io;

/// Program run under the service account
pub const PSQL: &str = "psql";

const FIELD_SEPARATOR: char = '\u{1f}';
const RECORD_SEPARATOR: char = '\u{1e}';
const NULL_MARKER: &str = "\u{1d}";

/// Command line running `statement` against `descriptor`.
///
/// Output is unaligned and tuples-only so it can be split back into rows. The
/// host is dropped when it is `localhost` so `psql` goes through its default
/// socket, where peer authentication applies. The password is never put on the
/// command line.
pub fn statement(descriptor: &ConnectionDescriptor, statement: &str) -> Invocation {
    let mut inv = Invocation::new(PSQL)
        .arg("-X")
        .arg("-q")
        .arg("-t")
        .arg("-A")
        .arg("-F")
        .arg(FIELD_SEPARATOR.to_string())
        .arg("-R")
        .arg(RECORD_SEPARATOR.to_string())
        .arg("-P")
        .arg(format!("null={}", NULL_MARKER))
        .arg("-v")
        .arg("ON_ERROR_STOP=1")
        .arg("-d")
        .arg(&descriptor.database)
        .arg("-p")
        .arg(descriptor.effective_port().to_string());
    if let Some(host) = descriptor.host.as_deref().filter(|h| *h != DEFAULT_HOST) {
        inv = inv.arg("-h").arg(host);
    }
    inv.arg("-U")
        .arg(&descriptor.user)
        .arg("-c")
        .arg(statement)
}

/// Command line that only checks the login works
pub fn probe(descriptor: &ConnectionDescriptor) -> Invocation {
    statement(descriptor, "\\q")
}

/// Rows printed by a successful [`statement`] run
pub fn parse_rows(stdout: &str) -> QueryResult {
    // Zero rows print nothing; one empty-string row prints a bare newline
    if stdout.is_empty() {
        return QueryResult::default();
    }
    let body = stdout.strip_suffix('\n').unwrap_or(stdout);
    let rows = body
        .split(RECORD_SEPARATOR)
        .map(|record| {
            record
                .split(FIELD_SEPARATOR)
                .map(|value| (value != NULL_MARKER).then(|| value.to_string()))
                .collect()
        })
        .collect();
    QueryResult {
        columns: Vec::new(),
        rows,
        command: None,
    }
}

/// Whether `psql` failed before reaching a server
pub fn is_connection_failure(stderr: &str) -> bool {
    ["could not connect", "No such file or directory", "Connection refused"]
        .iter()
        .any(|needle| stderr.contains(needle))
}

/// Error for a failed `psql` run.
///
/// A failed connection maps to an io error (unreachable); anything else the
/// server reported maps to [`Error::Sql`] when running a statement, or to
/// [`Error::Authentication`] when probing.
pub fn failure(output: &EscalatedOutput, probing: bool) -> Error {
    let stderr = output.stderr.trim();
    if is_connection_failure(stderr) {
        return Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, stderr.to_string()));
    }
    if probing {
        let reason = if stderr.is_empty() {
            format!("psql exited with status {:?}", output.code)
        } else {
            stderr.to_string()
        };
        return Error::Authentication(reason);
    }
    Error::Sql(parse_error(stderr))
}

/// Split `ERROR:  message` style stderr into error fields
pub fn parse_error(stderr: &str) -> ErrorFields {
    let mut lines = stderr.lines();
    let first = lines.next().unwrap_or_default();
    let (severity, message) = match first.split_once(':') {
        Some((sev, msg)) if is_severity(sev) => (Some(sev.to_string()), msg.trim().to_string()),
        _ => (None, first.trim().to_string()),
    };

    let mut fields = ErrorFields {
        severity,
        message: Some(message),
        ..Default::default()
    };
    for line in lines {
        if let Some(detail) = line.strip_prefix("DETAIL:") {
            fields.detail = Some(detail.trim().to_string());
        } else if let Some(hint) = line.strip_prefix("HINT:") {
            fields.hint = Some(hint.trim().to_string());
        }
    }
    fields
}

fn is_severity(s: &str) -> bool {
    matches!(s, "ERROR" | "FATAL" | "PANIC" | "WARNING")
}
