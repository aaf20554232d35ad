//! Resolver behavior against fake drivers, escalators and prompts

use async_trait::async_trait;
use pgsu::escalate::{EscalatedOutput, Invocation};
use pgsu::protocol::ErrorFields;
use pgsu::{
    ConnectionDescriptor, ConnectionHint, Driver, DriverConnection, EnvironmentSnapshot, Error,
    EscalationError, Escalator, FailureKind, QueryResult, Resolver, ResolverConfig, Secret,
    SecretPrompt, SetupFallback, Strategy,
};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[derive(Clone, Copy, Debug)]
enum Outcome {
    Connect,
    AuthFailed,
    Unreachable,
    Hang,
}

type Rule = Box<dyn Fn(&ConnectionDescriptor) -> Outcome + Send + Sync>;

/// Driver whose outcome per descriptor comes from a rule; panics if asked to
/// open anything after it handed out a connection
#[derive(Clone)]
struct FakeDriver {
    rule: Arc<Rule>,
    attempts: Arc<Mutex<Vec<ConnectionDescriptor>>>,
    connected: Arc<AtomicBool>,
}

impl FakeDriver {
    fn new(rule: impl Fn(&ConnectionDescriptor) -> Outcome + Send + Sync + 'static) -> Self {
        Self {
            rule: Arc::new(Box::new(rule)),
            attempts: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn attempts(&self) -> Vec<ConnectionDescriptor> {
        self.attempts.lock().unwrap().clone()
    }

    fn reset(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.attempts.lock().unwrap().clear();
    }
}

struct FakeConnection;

#[async_trait]
impl DriverConnection for FakeConnection {
    async fn execute(&mut self, statement: &str) -> pgsu::Result<QueryResult> {
        if statement == "SELECT 1" {
            Ok(QueryResult {
                columns: vec!["?column?".into()],
                rows: vec![vec![Some("1".into())]],
                command: Some("SELECT 1".into()),
            })
        } else {
            Err(Error::Sql(ErrorFields {
                severity: Some("ERROR".into()),
                code: Some("42601".into()),
                message: Some(format!("syntax error at or near \"{}\"", statement)),
                ..Default::default()
            }))
        }
    }

    async fn close(self: Box<Self>) -> pgsu::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn open(&self, descriptor: &ConnectionDescriptor) -> pgsu::Result<Box<dyn DriverConnection>> {
        assert!(
            !self.connected.load(Ordering::SeqCst),
            "probed {} after a candidate already connected",
            descriptor
        );
        self.attempts.lock().unwrap().push(descriptor.clone());

        match (self.rule)(descriptor) {
            Outcome::Connect => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(Box::new(FakeConnection))
            }
            Outcome::AuthFailed => Err(Error::Authentication(
                "FATAL: password authentication failed".into(),
            )),
            Outcome::Unreachable => Err(Error::Io(io::Error::from(io::ErrorKind::ConnectionRefused))),
            Outcome::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                unreachable!("connect timeout did not fire")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Sudo {
    /// Identity switch works without a password
    Open,
    /// Identity switch needs a password, and accepts `pw`
    NeedsPassword,
    /// Identity switch is not allowed
    Denied,
}

#[derive(Clone, Copy, Debug)]
enum Psql {
    LogsIn,
    RoleMissing,
}

#[derive(Clone)]
struct FakeEscalator {
    sudo: Sudo,
    psql: Psql,
    /// Account that runs `psql` without an identity switch
    current_user: Option<String>,
    calls: Arc<Mutex<Vec<(String, bool)>>>,
}

impl FakeEscalator {
    fn new(sudo: Sudo, psql: Psql) -> Self {
        Self {
            sudo,
            psql,
            current_user: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn running_as(mut self, user: &str) -> Self {
        self.current_user = Some(user.to_string());
        self
    }

    fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Escalator for FakeEscalator {
    async fn run_as(
        &self,
        account: &str,
        invocation: &Invocation,
        credential: Option<&Secret>,
    ) -> Result<EscalatedOutput, EscalationError> {
        self.calls
            .lock()
            .unwrap()
            .push((account.to_string(), credential.is_some()));
        assert_eq!(invocation.program, "psql");

        let switch = self.current_user.as_deref() != Some(account);
        match (self.sudo, credential) {
            _ if !switch => {}
            (Sudo::Denied, _) => {
                return Err(EscalationError::Rejected {
                    account: account.into(),
                    reason: "user is not in the sudoers file".into(),
                })
            }
            (Sudo::NeedsPassword, None) => {
                return Err(EscalationError::CredentialRequired {
                    account: account.into(),
                })
            }
            (Sudo::NeedsPassword, Some(secret)) if secret.expose() != "pw" => {
                return Err(EscalationError::Rejected {
                    account: account.into(),
                    reason: "1 incorrect password attempt".into(),
                })
            }
            _ => {}
        }

        let statement = invocation.args.last().map(String::as_str).unwrap_or_default();
        let output = match (self.psql, statement) {
            (Psql::RoleMissing, _) => EscalatedOutput {
                code: Some(2),
                stdout: String::new(),
                stderr: format!("psql: error: FATAL:  role \"{}\" does not exist\n", account),
            },
            (Psql::LogsIn, "\\q") => EscalatedOutput {
                code: Some(0),
                ..Default::default()
            },
            (Psql::LogsIn, "SELECT 1") => EscalatedOutput {
                code: Some(0),
                stdout: "1\n".into(),
                stderr: String::new(),
            },
            (Psql::LogsIn, other) => EscalatedOutput {
                code: Some(3),
                stdout: String::new(),
                stderr: format!("ERROR:  syntax error at or near \"{}\"\n", other),
            },
        };
        Ok(output)
    }
}

/// Counts how often it was asked
#[derive(Clone)]
struct CountingPrompt {
    answer: Option<Secret>,
    asked: Arc<AtomicUsize>,
}

impl CountingPrompt {
    fn new(answer: Option<&str>) -> Self {
        Self {
            answer: answer.map(Secret::new),
            asked: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl SecretPrompt for CountingPrompt {
    fn secret(&self, _message: &str) -> Option<Secret> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}

struct FixedFallback(ConnectionHint);

impl SetupFallback for FixedFallback {
    fn connection_details(&self, _current: &ConnectionHint) -> Option<ConnectionHint> {
        Some(self.0.clone())
    }
}

fn resolver(
    snapshot: EnvironmentSnapshot,
    driver: &FakeDriver,
    escalator: &FakeEscalator,
) -> Resolver {
    Resolver::new()
        .with_config(
            ResolverConfig::builder()
                .connect_timeout(Duration::from_millis(200))
                .build(),
        )
        .with_environment(snapshot)
        .with_driver(driver.clone())
        .with_escalator(escalator.clone())
}

fn socket_host(desc: &ConnectionDescriptor) -> bool {
    desc.host.as_deref().map_or(false, |h| h.starts_with('/'))
}

fn expect_resolution_error(err: Error) -> pgsu::ResolutionError {
    match err {
        Error::Resolution(e) => e,
        other => panic!("expected resolution error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_scenario_a_socket_trust_auth() {
    let snapshot = EnvironmentSnapshot::default()
        .socket("/var/run/postgresql", 5432)
        .os_user("postgres");
    let driver = FakeDriver::new(|d| {
        if socket_host(d) {
            Outcome::Connect
        } else {
            Outcome::Unreachable
        }
    });
    let escalator = FakeEscalator::new(Sudo::Open, Psql::LogsIn);
    let mut resolver = resolver(snapshot, &driver, &escalator);

    let mut session = assert_ok!(resolver.resolve(&ConnectionHint::default()).await);

    assert_eq!(session.strategy(), Strategy::Direct);
    assert_eq!(session.descriptor().host.as_deref(), Some("/var/run/postgresql"));
    assert_eq!(driver.attempts().len(), 1);
    assert!(escalator.calls().is_empty());

    let result = assert_ok!(session.execute("SELECT 1").await);
    assert_eq!(result.rows, vec![vec![Some("1".to_string())]]);

    let err = assert_err!(session.execute("not sql").await);
    assert_eq!(err.statement, "not sql");
    assert!(matches!(*err.source, Error::Sql(_)));

    assert_ok!(session.close().await);
}

#[tokio::test]
async fn test_scenario_b_escalation_on_localhost() {
    let snapshot = EnvironmentSnapshot::default().os_user("postgres");
    let driver = FakeDriver::new(|_| Outcome::AuthFailed);
    let escalator = FakeEscalator::new(Sudo::Open, Psql::LogsIn);
    let mut resolver = resolver(snapshot, &driver, &escalator);

    let hint = ConnectionHint::default().host("localhost").port(5432);
    let mut session = assert_ok!(resolver.resolve(&hint).await);

    assert_eq!(session.strategy(), Strategy::Escalated);
    assert_eq!(session.descriptor().host.as_deref(), Some("localhost"));
    assert_eq!(driver.attempts().len(), 1);
    assert_eq!(escalator.calls(), vec![("postgres".to_string(), false)]);

    let result = assert_ok!(session.execute("SELECT 1").await);
    assert_eq!(result.scalar(), Some("1"));

    let err = assert_err!(session.execute("not sql").await);
    match *err.source {
        Error::Sql(ref fields) => assert_eq!(fields.severity.as_deref(), Some("ERROR")),
        ref other => panic!("expected Sql error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_scenario_c_unreachable_remote_host() {
    let driver = FakeDriver::new(|_| Outcome::Unreachable);
    let escalator = FakeEscalator::new(Sudo::Open, Psql::LogsIn);
    let mut resolver = resolver(EnvironmentSnapshot::default(), &driver, &escalator);

    let hint = ConnectionHint::default()
        .host("203.0.113.9")
        .port(5432)
        .user("postgres")
        .database("template1");
    let err = expect_resolution_error(assert_err!(resolver.resolve(&hint).await));

    assert_eq!(err.attempts.len(), 1);
    assert_eq!(err.attempts[0].kind, FailureKind::Unreachable);
    assert_eq!(err.attempts[0].escalation, None);
    assert!(escalator.calls().is_empty());
}

#[tokio::test]
async fn test_short_circuit_on_first_success() {
    let snapshot = EnvironmentSnapshot::default()
        .socket("/run/postgresql", 5432)
        .socket("/tmp", 5432)
        .os_user("alice");
    let driver = FakeDriver::new(|_| Outcome::Connect);
    let escalator = FakeEscalator::new(Sudo::Open, Psql::LogsIn);
    let mut resolver = resolver(snapshot, &driver, &escalator);

    let candidates = resolver.candidates(&ConnectionHint::default());
    assert!(candidates.len() >= 2);

    let session = assert_ok!(resolver.resolve(&ConnectionHint::default()).await);
    assert_eq!(session.descriptor(), &candidates[0]);
    assert_eq!(driver.attempts(), vec![candidates[0].clone()]);
}

#[tokio::test]
async fn test_ledger_has_one_entry_per_candidate_in_order() {
    let snapshot = EnvironmentSnapshot::default()
        .socket("/tmp", 5432)
        .os_user("alice");
    let driver = FakeDriver::new(|d| {
        if socket_host(d) {
            Outcome::Unreachable
        } else {
            Outcome::AuthFailed
        }
    });
    let escalator = FakeEscalator::new(Sudo::Denied, Psql::LogsIn);
    let mut resolver = resolver(snapshot, &driver, &escalator);

    let candidates = resolver.candidates(&ConnectionHint::default());
    let err = expect_resolution_error(assert_err!(
        resolver.resolve(&ConnectionHint::default()).await
    ));

    let tried: Vec<_> = err.attempts.iter().map(|a| a.descriptor.clone()).collect();
    assert_eq!(tried, candidates);
    for attempt in &err.attempts {
        let expected = if socket_host(&attempt.descriptor) {
            FailureKind::Unreachable
        } else {
            FailureKind::AuthFailed
        };
        assert_eq!(attempt.kind, expected);
    }
    assert!(err.to_string().contains("Consider providing non-standard connection parameters"));
}

#[tokio::test]
async fn test_prompt_at_most_once_per_pass() {
    let snapshot = EnvironmentSnapshot::default()
        .socket("/var/run/postgresql", 5432)
        .socket("/tmp", 5432)
        .os_user("postgres");
    let driver = FakeDriver::new(|_| Outcome::AuthFailed);
    let escalator = FakeEscalator::new(Sudo::NeedsPassword, Psql::RoleMissing);
    let prompt = CountingPrompt::new(Some("pw"));
    let mut resolver = resolver(snapshot, &driver, &escalator).with_prompt(prompt.clone());

    let err = expect_resolution_error(assert_err!(
        resolver.resolve(&ConnectionHint::default()).await
    ));

    assert_eq!(prompt.asked(), 1);
    assert_eq!(err.attempts.len(), 3);
    assert!(err.attempts.iter().all(|a| a.escalation.is_some()));
    assert!(err.attempts.iter().all(|a| a.kind == FailureKind::AuthFailed));

    // First candidate: once without, once with the credential; later ones reuse it
    assert_eq!(
        escalator
            .calls()
            .iter()
            .map(|(_, with_credential)| *with_credential)
            .collect::<Vec<_>>(),
        vec![false, true, true, true]
    );
}

#[tokio::test]
async fn test_declined_prompt_is_not_repeated() {
    let snapshot = EnvironmentSnapshot::default()
        .socket("/tmp", 5432)
        .os_user("postgres");
    let driver = FakeDriver::new(|_| Outcome::AuthFailed);
    let escalator = FakeEscalator::new(Sudo::NeedsPassword, Psql::LogsIn);
    let prompt = CountingPrompt::new(None);
    let mut resolver = resolver(snapshot, &driver, &escalator).with_prompt(prompt.clone());

    let err = expect_resolution_error(assert_err!(
        resolver.resolve(&ConnectionHint::default()).await
    ));

    assert_eq!(prompt.asked(), 1);
    assert_eq!(escalator.calls().len(), 1);
    assert!(err.attempts[0].escalation.is_some());
    assert!(err.attempts[1..].iter().all(|a| a.escalation.is_none()));
}

#[tokio::test]
async fn test_prompted_credential_is_reused_by_session() {
    let snapshot = EnvironmentSnapshot::default().os_user("postgres");
    let driver = FakeDriver::new(|_| Outcome::AuthFailed);
    let escalator = FakeEscalator::new(Sudo::NeedsPassword, Psql::LogsIn);
    let prompt = CountingPrompt::new(Some("pw"));
    let mut resolver = resolver(snapshot, &driver, &escalator).with_prompt(prompt.clone());

    let mut session = assert_ok!(resolver.resolve(&ConnectionHint::default()).await);
    assert_eq!(session.strategy(), Strategy::Escalated);

    assert_ok!(session.execute("SELECT 1").await);
    assert_eq!(prompt.asked(), 1);
    assert_eq!(escalator.calls().last(), Some(&("postgres".to_string(), true)));
}

#[tokio::test]
async fn test_remote_auth_failure_never_escalates() {
    let driver = FakeDriver::new(|_| Outcome::AuthFailed);
    let escalator = FakeEscalator::new(Sudo::Open, Psql::LogsIn);
    let mut resolver = resolver(EnvironmentSnapshot::default(), &driver, &escalator);

    let hint = ConnectionHint::default().host("db.example.com").user("postgres");
    let err = expect_resolution_error(assert_err!(resolver.resolve(&hint).await));

    assert_eq!(err.attempts.len(), 1);
    assert_eq!(err.attempts[0].kind, FailureKind::AuthFailed);
    assert!(escalator.calls().is_empty());
}

#[tokio::test]
async fn test_escalation_disabled() {
    let driver = FakeDriver::new(|_| Outcome::AuthFailed);
    let escalator = FakeEscalator::new(Sudo::Open, Psql::LogsIn);
    let mut resolver = resolver(EnvironmentSnapshot::default().os_user("postgres"), &driver, &escalator)
        .with_config(ResolverConfig::builder().escalation(false).build());

    assert_err!(resolver.resolve(&ConnectionHint::default()).await);
    assert!(escalator.calls().is_empty());
}

#[tokio::test]
async fn test_service_account_override() {
    let driver = FakeDriver::new(|_| Outcome::AuthFailed);
    let escalator = FakeEscalator::new(Sudo::Open, Psql::LogsIn);
    let mut resolver = resolver(EnvironmentSnapshot::default().os_user("postgres"), &driver, &escalator)
        .with_config(ResolverConfig::builder().service_account("pgsql").build());

    let session = assert_ok!(resolver.resolve(&ConnectionHint::default()).await);
    assert_eq!(session.strategy(), Strategy::Escalated);
    assert_eq!(escalator.calls()[0].0, "pgsql");
}

#[tokio::test]
async fn test_connect_timeout_moves_on() {
    let snapshot = EnvironmentSnapshot::default()
        .socket("/tmp", 5432)
        .os_user("postgres");
    let driver = FakeDriver::new(|d| {
        if socket_host(d) {
            Outcome::Hang
        } else {
            Outcome::Connect
        }
    });
    let escalator = FakeEscalator::new(Sudo::Open, Psql::LogsIn);
    let mut resolver = resolver(snapshot, &driver, &escalator).with_config(
        ResolverConfig::builder()
            .connect_timeout(Duration::from_millis(50))
            .build(),
    );

    let session = assert_ok!(resolver.resolve(&ConnectionHint::default()).await);
    assert_eq!(session.descriptor().host.as_deref(), Some("localhost"));
    assert_eq!(driver.attempts().len(), 2);
}

#[tokio::test]
async fn test_timeout_recorded_in_ledger() {
    let driver = FakeDriver::new(|_| Outcome::Hang);
    let escalator = FakeEscalator::new(Sudo::Open, Psql::LogsIn);
    let mut resolver = resolver(EnvironmentSnapshot::default(), &driver, &escalator).with_config(
        ResolverConfig::builder()
            .connect_timeout(Duration::from_millis(20))
            .build(),
    );

    let hint = ConnectionHint::default()
        .host("localhost")
        .port(5432)
        .user("postgres")
        .database("template1");
    let err = expect_resolution_error(assert_err!(resolver.resolve(&hint).await));
    assert_eq!(err.attempts[0].kind, FailureKind::Timeout);
    assert!(escalator.calls().is_empty());
}

#[tokio::test]
async fn test_last_success_is_tried_first() {
    let snapshot = EnvironmentSnapshot::default()
        .socket("/tmp", 5432)
        .os_user("postgres");
    let driver = FakeDriver::new(|d| {
        if socket_host(d) {
            Outcome::Unreachable
        } else {
            Outcome::Connect
        }
    });
    let escalator = FakeEscalator::new(Sudo::Open, Psql::LogsIn);
    let mut resolver = resolver(snapshot, &driver, &escalator);
    let hint = ConnectionHint::default();

    let first = assert_ok!(resolver.resolve(&hint).await);
    assert_eq!(driver.attempts().len(), 2);
    let (cached, strategy) = resolver.last_success().map(|(d, s)| (d.clone(), s)).unwrap();
    assert_eq!(&cached, first.descriptor());
    assert_eq!(strategy, Strategy::Direct);

    driver.reset();
    let second = assert_ok!(resolver.resolve(&hint).await);
    assert_eq!(driver.attempts(), vec![cached.clone()]);
    assert_eq!(second.descriptor(), &cached);

    // A different hint does not use the cache
    driver.reset();
    assert_ok!(resolver.resolve(&hint.clone().database("template1")).await);
    assert_eq!(driver.attempts().len(), 2);
}

#[tokio::test]
async fn test_stale_cache_is_cleared() {
    let snapshot = EnvironmentSnapshot::default()
        .socket("/tmp", 5432)
        .os_user("postgres");
    let socket_up = Arc::new(AtomicBool::new(false));
    let flag = socket_up.clone();
    let driver = FakeDriver::new(move |d| match (socket_host(d), flag.load(Ordering::SeqCst)) {
        (true, true) => Outcome::Connect,
        (true, false) => Outcome::Unreachable,
        (false, true) => Outcome::Unreachable,
        (false, false) => Outcome::Connect,
    });
    let escalator = FakeEscalator::new(Sudo::Open, Psql::LogsIn);
    let mut resolver = resolver(snapshot, &driver, &escalator);
    let hint = ConnectionHint::default();

    let first = assert_ok!(resolver.resolve(&hint).await);
    assert_eq!(first.descriptor().host.as_deref(), Some("localhost"));

    socket_up.store(true, Ordering::SeqCst);
    driver.reset();
    let second = assert_ok!(resolver.resolve(&hint).await);
    assert_eq!(second.descriptor().host.as_deref(), Some("/tmp"));

    let hosts: Vec<_> = driver
        .attempts()
        .iter()
        .map(|d| d.host.clone().unwrap_or_default())
        .collect();
    assert_eq!(hosts, vec!["localhost", "/tmp"]);
    assert_eq!(
        resolver.last_success().map(|(d, _)| d.host.clone()),
        Some(Some("/tmp".to_string()))
    );
}

#[tokio::test]
async fn test_resolvers_do_not_share_cache() {
    let driver = FakeDriver::new(|_| Outcome::Connect);
    let escalator = FakeEscalator::new(Sudo::Open, Psql::LogsIn);
    let snapshot = EnvironmentSnapshot::default().os_user("postgres");

    let mut one = resolver(snapshot.clone(), &driver, &escalator);
    assert_ok!(one.resolve(&ConnectionHint::default()).await);

    let two = resolver(snapshot, &driver, &escalator);
    assert!(one.last_success().is_some());
    assert!(two.last_success().is_none());
}

#[tokio::test]
async fn test_setup_fallback_runs_one_more_pass() {
    let driver = FakeDriver::new(|d| {
        if d.port == Some(6543) {
            Outcome::Connect
        } else {
            Outcome::Unreachable
        }
    });
    let escalator = FakeEscalator::new(Sudo::Open, Psql::LogsIn);
    let replacement = ConnectionHint::default()
        .host("localhost")
        .port(6543)
        .user("admin")
        .database("postgres");
    let mut resolver = resolver(EnvironmentSnapshot::default().os_user("postgres"), &driver, &escalator)
        .with_setup_fallback(FixedFallback(replacement.clone()));

    let session = assert_ok!(resolver.resolve(&ConnectionHint::default()).await);
    assert_eq!(session.descriptor().to_hint(), replacement);
    assert_eq!(driver.attempts().len(), 3);
}

#[tokio::test]
async fn test_setup_fallback_ledger_covers_both_passes() {
    let driver = FakeDriver::new(|_| Outcome::Unreachable);
    let escalator = FakeEscalator::new(Sudo::Open, Psql::LogsIn);
    let replacement = ConnectionHint::default()
        .host("localhost")
        .port(6543)
        .user("admin")
        .database("postgres");
    let mut resolver = resolver(EnvironmentSnapshot::default().os_user("postgres"), &driver, &escalator)
        .with_setup_fallback(FixedFallback(replacement));

    let err = expect_resolution_error(assert_err!(
        resolver.resolve(&ConnectionHint::default()).await
    ));
    assert_eq!(err.attempts.len(), 3);
    assert_eq!(err.attempts[2].descriptor.port, Some(6543));
}

#[tokio::test]
async fn test_fallback_pass_does_not_prompt_again() {
    let snapshot = EnvironmentSnapshot::default()
        .socket("/var/run/postgresql", 5432)
        .os_user("postgres");
    let driver = FakeDriver::new(|_| Outcome::AuthFailed);
    let escalator = FakeEscalator::new(Sudo::NeedsPassword, Psql::LogsIn);
    let prompt = CountingPrompt::new(None);
    let replacement = ConnectionHint::default()
        .host("localhost")
        .port(6543)
        .user("postgres")
        .database("postgres");
    let mut resolver = resolver(snapshot, &driver, &escalator)
        .with_prompt(prompt.clone())
        .with_setup_fallback(FixedFallback(replacement));

    let err = expect_resolution_error(assert_err!(
        resolver.resolve(&ConnectionHint::default()).await
    ));

    assert_eq!(prompt.asked(), 1);
    assert_eq!(escalator.calls().len(), 1);
    assert_eq!(err.attempts.len(), 3);
    assert_eq!(err.attempts[2].descriptor.port, Some(6543));
    assert_eq!(err.attempts[2].escalation, None);
}

#[tokio::test]
async fn test_fallback_pass_skips_failed_candidates() {
    let snapshot = EnvironmentSnapshot::default()
        .socket("/var/run/postgresql", 5432)
        .os_user("postgres");
    let driver = FakeDriver::new(|_| Outcome::AuthFailed);
    let escalator = FakeEscalator::new(Sudo::NeedsPassword, Psql::LogsIn);
    let prompt = CountingPrompt::new(None);
    let replacement = ConnectionHint::default()
        .host("localhost")
        .port(5432)
        .user("postgres")
        .database("template1");
    let mut resolver = resolver(snapshot, &driver, &escalator)
        .with_prompt(prompt.clone())
        .with_setup_fallback(FixedFallback(replacement));

    let err = expect_resolution_error(assert_err!(
        resolver.resolve(&ConnectionHint::default()).await
    ));

    assert_eq!(prompt.asked(), 1);
    let attempts = driver.attempts();
    assert_eq!(attempts.len(), 2);
    for (i, attempt) in attempts.iter().enumerate() {
        assert!(!attempts[..i].contains(attempt), "{} tried twice", attempt);
    }
    assert_eq!(err.attempts.len(), 2);
}

#[tokio::test]
async fn test_refused_switch_still_tries_os_user() {
    let snapshot = EnvironmentSnapshot::default()
        .socket("/tmp", 5432)
        .os_user("alice");
    let driver = FakeDriver::new(|_| Outcome::AuthFailed);
    let escalator = FakeEscalator::new(Sudo::Denied, Psql::LogsIn).running_as("alice");
    let mut resolver = resolver(snapshot, &driver, &escalator);

    let session = assert_ok!(resolver.resolve(&ConnectionHint::default()).await);

    assert_eq!(session.strategy(), Strategy::Escalated);
    assert_eq!(session.descriptor().user, "alice");
    assert_eq!(
        escalator.calls(),
        vec![("postgres".to_string(), false), ("alice".to_string(), false)]
    );
}
