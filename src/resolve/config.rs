//! Resolver configuration

use crate::escalate::DEFAULT_ESCALATION_TIMEOUT;
use std::time::Duration;

/// Default bound on one direct connection attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolver configuration
///
/// Use `ResolverConfig::builder()` to override the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Bound on each direct attempt (default: 10 s)
    pub connect_timeout: Duration,
    /// Fall back to the service account on local authentication failures (default: true)
    pub escalation: bool,
    /// OS account to act as (default: the candidate's database user)
    pub service_account: Option<String>,
    /// Bound on each escalated command (default: 30 s)
    pub escalation_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ResolverConfig {
    /// Create a builder
    ///
    /// # Examples
    ///
    /// ```
    /// use pgsu::ResolverConfig;
    /// use std::time::Duration;
    ///
    /// let config = ResolverConfig::builder()
    ///     .connect_timeout(Duration::from_secs(3))
    ///     .service_account("postgres")
    ///     .build();
    /// assert!(config.escalation);
    /// ```
    pub fn builder() -> ResolverConfigBuilder {
        ResolverConfigBuilder {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            escalation: true,
            service_account: None,
            escalation_timeout: DEFAULT_ESCALATION_TIMEOUT,
        }
    }

    /// Account the escalated attempt for `user` runs as
    pub fn account_for<'a>(&'a self, user: &'a str) -> &'a str {
        self.service_account.as_deref().unwrap_or(user)
    }
}

/// Builder for `ResolverConfig`
#[derive(Debug, Clone)]
pub struct ResolverConfigBuilder {
    connect_timeout: Duration,
    escalation: bool,
    service_account: Option<String>,
    escalation_timeout: Duration,
}

impl ResolverConfigBuilder {
    /// Bound each direct attempt
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable escalation
    pub fn escalation(mut self, enabled: bool) -> Self {
        self.escalation = enabled;
        self
    }

    /// Always escalate to `account`
    pub fn service_account(mut self, account: impl Into<String>) -> Self {
        self.service_account = Some(account.into());
        self
    }

    /// Bound each escalated command
    pub fn escalation_timeout(mut self, timeout: Duration) -> Self {
        self.escalation_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ResolverConfig {
        ResolverConfig {
            connect_timeout: self.connect_timeout,
            escalation: self.escalation,
            service_account: self.service_account,
            escalation_timeout: self.escalation_timeout,
        }
    }
}
