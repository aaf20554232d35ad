//! Connection resolution
//!
//! A [`Resolver`] walks the candidate list from [`crate::probe::propose`] one
//! candidate at a time. Each candidate gets a direct attempt through the
//! [`Driver`]; a local candidate whose login is refused then gets an escalated
//! attempt through the [`Escalator`]. The first candidate that works ends the
//! pass. When every candidate fails, the caller gets a [`ResolutionError`]
//! listing each attempt in order.
//!
//! Within one resolution the service account switch is settled once: after it
//! has been granted (with or without a prompted credential) the grant is reused,
//! and after it has been refused it is not attempted again for that account.
//! The user is prompted at most once per resolution, including the setup
//! fallback pass, which also skips descriptors that already failed.

mod config;
mod driver;
mod session;

pub use config::{ResolverConfig, ResolverConfigBuilder, DEFAULT_CONNECT_TIMEOUT};
pub use driver::{Driver, DriverConnection, WireDriver};
pub use session::{ProbeResult, Session, Strategy};

use crate::descriptor::{ConnectionDescriptor, ConnectionHint};
use crate::error::{EscalationError, FailedAttempt, FailureKind, ResolutionError};
use crate::escalate::{psql, EscalatedOutput, Escalator, Invocation, SudoEscalator};
use crate::metrics::{counters, histograms, labels};
use crate::probe::{propose, Environment, HostEnvironment};
use crate::prompt::{NoPrompt, Secret, SecretPrompt, SetupFallback};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Service account switch, settled at most once per resolution
#[derive(Debug, Clone)]
enum Escalation {
    NotTried,
    Granted(Option<Secret>),
    /// Switch to this account was refused
    Refused(String),
}

/// Outcome of an escalated attempt
enum Escalated {
    Connected(Session),
    Failed(Error),
    Skipped,
}

#[derive(Debug, Clone)]
struct LastSuccess {
    hint: ConnectionHint,
    descriptor: ConnectionDescriptor,
    strategy: Strategy,
}

/// Finds a working superuser connection
///
/// Every collaborator is injectable: the environment the prober reads, the
/// driver, the escalator, the credential prompt and the setup fallback. The last
/// successful descriptor is remembered on the instance and tried first when the
/// same hint is resolved again.
pub struct Resolver {
    config: ResolverConfig,
    environment: Arc<dyn Environment>,
    driver: Arc<dyn Driver>,
    escalator: Arc<dyn Escalator>,
    prompt: Arc<dyn SecretPrompt>,
    fallback: Option<Arc<dyn SetupFallback>>,
    last_success: Option<LastSuccess>,
}

impl Resolver {
    /// Resolver for the real host, never prompting
    pub fn new() -> Self {
        Self {
            config: ResolverConfig::default(),
            environment: Arc::new(HostEnvironment::new()),
            driver: Arc::new(WireDriver::new()),
            escalator: Arc::new(SudoEscalator::new()),
            prompt: Arc::new(NoPrompt),
            fallback: None,
            last_success: None,
        }
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the environment the prober reads
    pub fn with_environment(mut self, environment: impl Environment + 'static) -> Self {
        self.environment = Arc::new(environment);
        self
    }

    /// Replace the driver
    pub fn with_driver(mut self, driver: impl Driver + 'static) -> Self {
        self.driver = Arc::new(driver);
        self
    }

    /// Replace the escalator
    pub fn with_escalator(mut self, escalator: impl Escalator + 'static) -> Self {
        self.escalator = Arc::new(escalator);
        self
    }

    /// Replace the credential prompt
    pub fn with_prompt(mut self, prompt: impl SecretPrompt + 'static) -> Self {
        self.prompt = Arc::new(prompt);
        self
    }

    /// Ask `fallback` for new connection details once every candidate failed
    pub fn with_setup_fallback(mut self, fallback: impl SetupFallback + 'static) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Descriptor and strategy of the last successful resolution
    pub fn last_success(&self) -> Option<(&ConnectionDescriptor, Strategy)> {
        self.last_success
            .as_ref()
            .map(|last| (&last.descriptor, last.strategy))
    }

    /// Forget the last successful resolution
    pub fn clear_cache(&mut self) {
        self.last_success = None;
    }

    /// Candidates [`resolve`](Self::resolve) would try for `hint`, ignoring the cache
    pub fn candidates(&self, hint: &ConnectionHint) -> Vec<ConnectionDescriptor> {
        propose(hint, &self.environment.snapshot())
    }

    /// Find a working superuser session for `hint`
    ///
    /// # Errors
    ///
    /// [`Error::Resolution`] when no candidate produced a session.
    pub async fn resolve(&mut self, hint: &ConnectionHint) -> Result<Session> {
        let span = tracing::info_span!("resolve", fully_specified = hint.is_fully_specified());
        async {
            let snapshot = self.environment.snapshot();
            let mut candidates = propose(hint, &snapshot);

            // Cleared here; set again only if this resolution succeeds
            let cache_hit = self
                .last_success
                .as_ref()
                .map_or(false, |last| last.hint == *hint);
            let cached = if cache_hit {
                self.last_success.take()
            } else {
                None
            };
            if let Some(last) = cached {
                tracing::debug!(candidate = %last.descriptor, "trying last successful descriptor first");
                candidates.retain(|c| *c != last.descriptor);
                candidates.insert(0, last.descriptor);
            }

            let mut ledger = Vec::new();
            let mut escalation = Escalation::NotTried;
            let mut session = self.run_pass(&candidates, &mut ledger, &mut escalation).await;

            if session.is_none() {
                if let Some(replacement) = self.ask_fallback(hint).await {
                    tracing::info!("retrying with connection details from setup fallback");
                    let mut candidates = propose(&replacement, &snapshot);
                    candidates.retain(|c| !ledger.iter().any(|a| a.descriptor == *c));
                    session = self.run_pass(&candidates, &mut ledger, &mut escalation).await;
                }
            }

            match session {
                Some(session) => {
                    tracing::info!(
                        candidate = %session.descriptor(),
                        strategy = %session.strategy(),
                        "resolved superuser connection"
                    );
                    counters::resolution_completed(labels::OUTCOME_SUCCESS);
                    self.last_success = Some(LastSuccess {
                        hint: hint.clone(),
                        descriptor: session.descriptor().clone(),
                        strategy: session.strategy(),
                    });
                    Ok(session)
                }
                None => {
                    tracing::debug!(attempts = ledger.len(), "every candidate failed");
                    counters::resolution_completed(labels::OUTCOME_FAILURE);
                    Err(ResolutionError { attempts: ledger }.into())
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Try a single descriptor outside of a resolution pass
    pub async fn probe(&self, descriptor: &ConnectionDescriptor) -> ProbeResult {
        self.probe_candidate(descriptor, &mut Escalation::NotTried).await
    }

    async fn run_pass(
        &self,
        candidates: &[ConnectionDescriptor],
        ledger: &mut Vec<FailedAttempt>,
        escalation: &mut Escalation,
    ) -> Option<Session> {
        for (index, candidate) in candidates.iter().enumerate() {
            let span = tracing::debug_span!("candidate", index, candidate = %candidate);
            match self
                .probe_candidate(candidate, escalation)
                .instrument(span)
                .await
                .into_result()
            {
                Ok(session) => return Some(session),
                Err(attempt) => ledger.push(attempt),
            }
        }
        None
    }

    async fn probe_candidate(
        &self,
        candidate: &ConnectionDescriptor,
        escalation: &mut Escalation,
    ) -> ProbeResult {
        counters::candidate_attempted(Strategy::Direct.as_str());
        let started = Instant::now();
        let limit = self.config.connect_timeout;
        let direct = match tokio::time::timeout(limit, self.driver.open(candidate)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(limit)),
        };
        histograms::attempt_duration(
            Strategy::Direct.as_str(),
            started.elapsed().as_millis() as u64,
        );

        let err = match direct {
            Ok(conn) => {
                tracing::debug!("direct connection succeeded");
                return ProbeResult::Connected(Session::direct(candidate.clone(), conn));
            }
            Err(err) => err,
        };

        let kind = err.failure_kind();
        counters::candidate_failed(Strategy::Direct.as_str(), kind_label(kind));
        tracing::debug!(%kind, error = %err, "direct connection failed");

        let mut attempt = FailedAttempt {
            descriptor: candidate.clone(),
            kind,
            detail: err.to_string(),
            escalation: None,
        };

        if kind == FailureKind::AuthFailed && candidate.is_local() && self.config.escalation {
            match self.escalate(candidate, escalation).await {
                Escalated::Connected(session) => return ProbeResult::Connected(session),
                Escalated::Failed(err) => {
                    // An identity switch failure says nothing about the server
                    if !matches!(err, Error::Escalation(_)) {
                        attempt.kind = err.failure_kind();
                    }
                    counters::candidate_failed(
                        Strategy::Escalated.as_str(),
                        kind_label(err.failure_kind()),
                    );
                    tracing::debug!(error = %err, "escalated connection failed");
                    attempt.escalation = Some(err.to_string());
                }
                Escalated::Skipped => {
                    tracing::debug!("service account switch refused earlier in this resolution");
                }
            }
        }

        ProbeResult::failed(attempt)
    }

    async fn escalate(&self, candidate: &ConnectionDescriptor, state: &mut Escalation) -> Escalated {
        let account = self.config.account_for(&candidate.user).to_string();
        let probe = psql::probe(candidate);
        counters::candidate_attempted(Strategy::Escalated.as_str());
        let started = Instant::now();

        let outcome = match state.clone() {
            Escalation::Refused(refused) if refused == account => return Escalated::Skipped,
            // Another account was refused; no prompt, the switch may still be allowed
            Escalation::Refused(_) => self
                .run_escalated(&account, &probe, None)
                .await
                .map(|output| (output, None)),
            Escalation::Granted(credential) => {
                let output = self.run_escalated(&account, &probe, credential.as_ref()).await;
                output.map(|output| (output, credential))
            }
            Escalation::NotTried => self.settle_escalation(&account, &probe, state).await,
        };

        histograms::attempt_duration(
            Strategy::Escalated.as_str(),
            started.elapsed().as_millis() as u64,
        );

        match outcome {
            Ok((output, credential)) if output.success() => {
                tracing::debug!(account = %account, "escalated connection succeeded");
                Escalated::Connected(Session::escalated(
                    candidate.clone(),
                    Arc::clone(&self.escalator),
                    account,
                    credential,
                    self.config.escalation_timeout,
                ))
            }
            Ok((output, _)) => Escalated::Failed(psql::failure(&output, true)),
            Err(e) => Escalated::Failed(Error::Escalation(e)),
        }
    }

    /// First escalation of a resolution: try without a credential, prompt once if the OS wants one
    async fn settle_escalation(
        &self,
        account: &str,
        probe: &Invocation,
        state: &mut Escalation,
    ) -> std::result::Result<(EscalatedOutput, Option<Secret>), EscalationError> {
        match self.run_escalated(account, probe, None).await {
            Ok(output) => {
                *state = Escalation::Granted(None);
                return Ok((output, None));
            }
            Err(EscalationError::CredentialRequired { .. }) => {}
            Err(e) => {
                *state = Escalation::Refused(account.to_string());
                return Err(e);
            }
        }

        let Some(secret) = self.ask_secret(account).await else {
            *state = Escalation::Refused(account.to_string());
            return Err(EscalationError::CredentialRequired {
                account: account.to_string(),
            });
        };

        match self.run_escalated(account, probe, Some(&secret)).await {
            Ok(output) => {
                *state = Escalation::Granted(Some(secret.clone()));
                Ok((output, Some(secret)))
            }
            Err(e) => {
                *state = Escalation::Refused(account.to_string());
                Err(e)
            }
        }
    }

    async fn run_escalated(
        &self,
        account: &str,
        invocation: &Invocation,
        credential: Option<&Secret>,
    ) -> std::result::Result<EscalatedOutput, EscalationError> {
        let limit = self.config.escalation_timeout;
        tokio::time::timeout(limit, self.escalator.run_as(account, invocation, credential))
            .await
            .map_err(|_| EscalationError::Timeout(limit))?
    }

    async fn ask_secret(&self, account: &str) -> Option<Secret> {
        counters::escalation_prompted();
        let prompt = Arc::clone(&self.prompt);
        let message = format!(
            "Password for {} (needed to act as `{}`)",
            whoami::username(),
            account
        );
        tokio::task::spawn_blocking(move || prompt.secret(&message))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("credential prompt failed: {}", e);
                None
            })
    }

    async fn ask_fallback(&self, hint: &ConnectionHint) -> Option<ConnectionHint> {
        let fallback = Arc::clone(self.fallback.as_ref()?);
        let current = hint.clone();
        tokio::task::spawn_blocking(move || fallback.connection_details(&current))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("setup fallback failed: {}", e);
                None
            })
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("config", &self.config)
            .field("setup_fallback", &self.fallback.is_some())
            .field("last_success", &self.last_success)
            .finish()
    }
}

fn kind_label(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::AuthFailed => "auth_failed",
        FailureKind::Unreachable => "unreachable",
        FailureKind::Timeout => "timeout",
    }
}
