//! MD5 password authentication
//!
//! Still the default `password_encryption` on clusters initialised before
//! PostgreSQL 14, which covers most long-lived package-manager installs.

use std::fmt::Write;

/// Hash a password the way the server expects for `AuthenticationMD5Password`:
/// `"md5" + md5(md5(password + user) + salt)`, hex encoded.
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = md5::compute(format!("{}{}", password, user));

    let mut outer_input = format!("{:x}", inner).into_bytes();
    outer_input.extend_from_slice(&salt);
    let outer = md5::compute(&outer_input);

    let mut hashed = String::with_capacity(35);
    hashed.push_str("md5");
    let _ = write!(hashed, "{:x}", outer);
    hashed
}
