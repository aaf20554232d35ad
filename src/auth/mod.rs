//! Password authentication mechanisms

mod md5;
mod scram;

pub use md5::md5_password;
pub use scram::{ScramClient, ScramError, ScramState};
