//! Metrics emitted through the `metrics` facade
//!
//! Nothing is recorded unless the embedding application installs a recorder.
//!
//! Counters:
//! * `pgsu_auth_attempted_total{mechanism}`
//! * `pgsu_auth_successful_total{mechanism}`
//! * `pgsu_auth_failed_total{mechanism, reason}`
//! * `pgsu_candidates_attempted_total{strategy}`
//! * `pgsu_candidates_failed_total{strategy, kind}`
//! * `pgsu_escalation_prompts_total`
//! * `pgsu_resolutions_total{outcome}`
//! * `pgsu_statements_total{strategy, outcome}`
//!
//! Histograms:
//! * `pgsu_auth_duration_ms{mechanism}`
//! * `pgsu_attempt_duration_ms{strategy}`

pub mod counters;
pub mod histograms;
pub mod labels;
