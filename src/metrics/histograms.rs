//! Histogram helpers

use super::labels;

/// Time from startup to AuthenticationOk, in milliseconds
pub fn auth_duration(mechanism: &'static str, duration_ms: u64) {
    ::metrics::histogram!("pgsu_auth_duration_ms", labels::MECHANISM => mechanism)
        .record(duration_ms as f64);
}

/// Time spent on one candidate attempt, in milliseconds
pub fn attempt_duration(strategy: &'static str, duration_ms: u64) {
    ::metrics::histogram!("pgsu_attempt_duration_ms", labels::STRATEGY => strategy)
        .record(duration_ms as f64);
}
