//! Interactive prompting capabilities
//!
//! The resolver never talks to a terminal directly. It asks a [`SecretPrompt`]
//! for the OS credential needed to act as the service account, and a
//! [`SetupFallback`] for replacement connection details once every candidate
//! has failed. Both are plain blocking calls; the resolver runs them on tokio's
//! blocking pool.

use crate::descriptor::ConnectionHint;
use dialoguer::{theme::ColorfulTheme, Input, Password};
use std::fmt;

/// A credential that never shows up in logs
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a credential
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The credential itself
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(********)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Source of the credential the OS wants before switching identity
pub trait SecretPrompt: Send + Sync {
    /// Ask for a secret, `None` when the user declines or nobody can answer
    fn secret(&self, message: &str) -> Option<Secret>;
}

/// Source of replacement connection details after a failed pass
pub trait SetupFallback: Send + Sync {
    /// Offer new details starting from `current`, `None` to give up
    fn connection_details(&self, current: &ConnectionHint) -> Option<ConnectionHint>;
}

/// Never answers; for unattended use
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl SecretPrompt for NoPrompt {
    fn secret(&self, _message: &str) -> Option<Secret> {
        None
    }
}

impl SetupFallback for NoPrompt {
    fn connection_details(&self, _current: &ConnectionHint) -> Option<ConnectionHint> {
        None
    }
}

/// Always answers with the same secret
impl SecretPrompt for Secret {
    fn secret(&self, _message: &str) -> Option<Secret> {
        Some(self.clone())
    }
}

/// Prompts on the controlling terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl SecretPrompt for TerminalPrompt {
    fn secret(&self, message: &str) -> Option<Secret> {
        match Password::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .allow_empty_password(true)
            .interact()
        {
            Ok(value) if !value.is_empty() => Some(Secret(value)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("could not read secret from terminal: {}", e);
                None
            }
        }
    }
}

impl SetupFallback for TerminalPrompt {
    fn connection_details(&self, current: &ConnectionHint) -> Option<ConnectionHint> {
        eprintln!("Unable to autodetect the PostgreSQL connection details.");
        eprintln!("Please enter them manually (empty password keeps none).");
        match ask_details(current) {
            Ok(hint) => Some(hint),
            Err(e) => {
                tracing::warn!("could not read connection details from terminal: {}", e);
                None
            }
        }
    }
}

fn ask_details(current: &ConnectionHint) -> dialoguer::Result<ConnectionHint> {
    let theme = ColorfulTheme::default();
    let ask = |prompt: &str, default: String| {
        Input::<String>::with_theme(&theme)
            .with_prompt(prompt)
            .default(default)
            .interact_text()
    };

    let host = ask(
        "Host",
        current
            .host
            .clone()
            .unwrap_or_else(|| crate::DEFAULT_HOST.to_string()),
    )?;
    let port = Input::<u16>::with_theme(&theme)
        .with_prompt("Port")
        .default(current.port.unwrap_or(crate::DEFAULT_PORT))
        .interact_text()?;
    let user = ask(
        "Database superuser",
        current
            .user
            .clone()
            .unwrap_or_else(|| crate::DEFAULT_USER.to_string()),
    )?;
    let database = ask(
        "Database",
        current
            .database
            .clone()
            .unwrap_or_else(|| crate::DEFAULT_DATABASE.to_string()),
    )?;
    let password = Password::with_theme(&theme)
        .with_prompt("Password")
        .allow_empty_password(true)
        .interact()?;

    let hint = ConnectionHint::default()
        .host(host)
        .port(port)
        .user(user)
        .database(database);
    Ok(if password.is_empty() {
        hint
    } else {
        hint.password(password)
    })
}
