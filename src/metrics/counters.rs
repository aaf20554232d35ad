//! Counter helpers

use super::labels;

/// An authentication exchange started
pub fn auth_attempted(mechanism: &'static str) {
    ::metrics::counter!("pgsu_auth_attempted_total", labels::MECHANISM => mechanism).increment(1);
}

/// The server accepted the login
pub fn auth_successful(mechanism: &'static str) {
    ::metrics::counter!("pgsu_auth_successful_total", labels::MECHANISM => mechanism).increment(1);
}

/// The server rejected the login
pub fn auth_failed(mechanism: &'static str, reason: &'static str) {
    ::metrics::counter!(
        "pgsu_auth_failed_total",
        labels::MECHANISM => mechanism,
        labels::REASON => reason
    )
    .increment(1);
}

/// A candidate is being tried with `strategy`
pub fn candidate_attempted(strategy: &'static str) {
    ::metrics::counter!("pgsu_candidates_attempted_total", labels::STRATEGY => strategy)
        .increment(1);
}

/// A candidate attempt failed
pub fn candidate_failed(strategy: &'static str, kind: &'static str) {
    ::metrics::counter!(
        "pgsu_candidates_failed_total",
        labels::STRATEGY => strategy,
        labels::KIND => kind
    )
    .increment(1);
}

/// The user was asked for the escalation credential
pub fn escalation_prompted() {
    ::metrics::counter!("pgsu_escalation_prompts_total").increment(1);
}

/// A resolve call finished
pub fn resolution_completed(outcome: &'static str) {
    ::metrics::counter!("pgsu_resolutions_total", labels::OUTCOME => outcome).increment(1);
}

/// A statement finished on a session
pub fn statement_executed(strategy: &'static str, outcome: &'static str) {
    ::metrics::counter!(
        "pgsu_statements_total",
        labels::STRATEGY => strategy,
        labels::OUTCOME => outcome
    )
    .increment(1);
}
