//! Label names and values

/// Authentication mechanism label
pub const MECHANISM: &str = "mechanism";
/// Failure reason label
pub const REASON: &str = "reason";
/// Session strategy label
pub const STRATEGY: &str = "strategy";
/// Failure kind label
pub const KIND: &str = "kind";
/// Outcome label
pub const OUTCOME: &str = "outcome";

/// No password exchange happened (trust or peer)
pub const MECHANISM_TRUST: &str = "trust";
/// Cleartext password
pub const MECHANISM_CLEARTEXT: &str = "cleartext";
/// MD5-hashed password
pub const MECHANISM_MD5: &str = "md5";
/// SCRAM-SHA-256
pub const MECHANISM_SCRAM: &str = "scram-sha-256";

/// Successful outcome
pub const OUTCOME_SUCCESS: &str = "success";
/// Failed outcome
pub const OUTCOME_FAILURE: &str = "failure";
