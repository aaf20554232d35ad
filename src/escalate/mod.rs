//! Running commands as the database service account
//!
//! Package-manager installs usually let only the `postgres` OS account log in
//! as the `postgres` role (peer authentication). [`SudoEscalator`] switches to
//! that account with `sudo -u` and runs one command per call. The subprocess
//! never outlives the call: it is awaited to completion, or killed when the
//! timeout fires or the future is dropped.

pub mod psql;

use crate::error::EscalationError;
use crate::prompt::Secret;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Default bound on one escalated command
pub const DEFAULT_ESCALATION_TIMEOUT: Duration = Duration::from_secs(30);

/// A program and its arguments, run without a shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name or path
    pub program: String,
    /// Arguments, passed verbatim
    pub args: Vec<String>,
}

impl Invocation {
    /// Invocation of `program` with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Exit status and captured output of an escalated command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscalatedOutput {
    /// Exit code, `None` if killed by a signal
    pub code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl EscalatedOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Capability to run a command under another OS identity
#[async_trait]
pub trait Escalator: Send + Sync {
    /// Run `invocation` as `account`.
    ///
    /// `credential` is the OS secret the identity switch may require. Without
    /// one the switch must not block on a terminal; it fails with
    /// [`EscalationError::CredentialRequired`] instead.
    async fn run_as(
        &self,
        account: &str,
        invocation: &Invocation,
        credential: Option<&Secret>,
    ) -> Result<EscalatedOutput, EscalationError>;
}

/// [`Escalator`] backed by `sudo -u <account>`
#[derive(Debug, Clone)]
pub struct SudoEscalator {
    program: String,
    timeout: Duration,
    current_user: String,
}

impl SudoEscalator {
    /// Escalator using `sudo` from `PATH`
    pub fn new() -> Self {
        Self {
            program: "sudo".to_string(),
            timeout: DEFAULT_ESCALATION_TIMEOUT,
            current_user: whoami::username(),
        }
    }

    /// Use another privilege-switch program with sudo's command line
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Bound each command by `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, account: &str, invocation: &Invocation, credential: bool) -> Command {
        if account == self.current_user {
            let mut cmd = Command::new(&invocation.program);
            cmd.args(&invocation.args);
            return cmd;
        }

        let mut cmd = Command::new(&self.program);
        if credential {
            // Read the password from stdin, print no prompt
            cmd.args(["-S", "-p", ""]);
        } else {
            cmd.arg("-n");
        }
        cmd.args(["-u", account, "--"])
            .arg(&invocation.program)
            .args(&invocation.args);
        cmd
    }
}

impl Default for SudoEscalator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Escalator for SudoEscalator {
    async fn run_as(
        &self,
        account: &str,
        invocation: &Invocation,
        credential: Option<&Secret>,
    ) -> Result<EscalatedOutput, EscalationError> {
        let direct = account == self.current_user;
        let credential = credential.filter(|_| !direct);

        let mut cmd = self.command(account, invocation, credential.is_some());
        cmd.stdin(if credential.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        tracing::debug!(
            account,
            program = %invocation.program,
            direct,
            with_credential = credential.is_some(),
            "running escalated command"
        );

        let spawned_program = if direct {
            invocation.program.clone()
        } else {
            self.program.clone()
        };
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EscalationError::Unavailable {
                    program: spawned_program.clone(),
                    account: account.to_string(),
                }
            } else {
                EscalationError::Spawn {
                    program: spawned_program.clone(),
                    source: e,
                }
            }
        })?;

        if let (Some(secret), Some(mut stdin)) = (credential, child.stdin.take()) {
            let line = format!("{}\n", secret.expose());
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| EscalationError::Spawn {
                    program: spawned_program.clone(),
                    source: e,
                })?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| EscalationError::Timeout(self.timeout))?
            .map_err(|e| EscalationError::Spawn {
                program: spawned_program,
                source: e,
            })?;

        let output = EscalatedOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !direct && !output.success() {
            if let Some(err) = identity_switch_failure(account, &output.stderr) {
                return Err(err);
            }
        }
        Ok(output)
    }
}

/// Recognize failures of sudo itself, as opposed to the command it ran
fn identity_switch_failure(account: &str, stderr: &str) -> Option<EscalationError> {
    let line = stderr.lines().find(|l| {
        l.starts_with("sudo:")
            || l.contains("is not allowed to execute")
            || l.contains("is not in the sudoers file")
    })?;

    if line.contains("password is required") || line.contains("a terminal is required") {
        return Some(EscalationError::CredentialRequired {
            account: account.to_string(),
        });
    }
    Some(EscalationError::Rejected {
        account: account.to_string(),
        reason: line.trim_start_matches("sudo:").trim().to_string(),
    })
}
