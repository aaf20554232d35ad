//! SCRAM-SHA-256 authentication
//!
//! Client side of RFC 5802/7677 as PostgreSQL uses it (Postgres 10+). The server
//! takes the role name from the startup packet, so the SCRAM user name is sent
//! empty, as libpq does. Channel binding is not used.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// GS2 header for "client does not support channel binding"
const GS2_HEADER: &str = "n,,";

/// SCRAM authentication errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScramError {
    /// Server signature did not verify
    #[error("invalid server proof: {0}")]
    InvalidServerProof(String),
    /// Server message was malformed
    #[error("invalid server message: {0}")]
    InvalidServerMessage(String),
    /// Base64 decoding failed
    #[error("base64 error: {0}")]
    Base64(String),
}

/// Values carried from the client-final step to server verification
#[derive(Clone, Debug)]
pub struct ScramState {
    auth_message: Vec<u8>,
    server_key: Vec<u8>,
}

/// SCRAM-SHA-256 client
pub struct ScramClient {
    password: String,
    nonce: String,
}

impl ScramClient {
    /// Create a client with a fresh random nonce
    pub fn new(password: impl Into<String>) -> Self {
        let mut rng = rand::thread_rng();
        let nonce_bytes: [u8; 18] = rng.gen();
        Self::with_nonce(password, BASE64.encode(nonce_bytes))
    }

    fn with_nonce(password: impl Into<String>, nonce: String) -> Self {
        Self {
            password: password.into(),
            nonce,
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n=,r={}", self.nonce)
    }

    /// Client first message
    pub fn client_first(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare())
    }

    /// Process the server first message and build the client final message
    pub fn client_final(&self, server_first: &str) -> Result<(String, ScramState), ScramError> {
        let first = ServerFirst::parse(server_first)?;

        if !first.nonce.starts_with(&self.nonce) || first.nonce.len() == self.nonce.len() {
            return Err(ScramError::InvalidServerMessage(
                "server nonce does not extend client nonce".into(),
            ));
        }

        let salt = BASE64
            .decode(first.salt)
            .map_err(|_| ScramError::Base64("invalid salt encoding".into()))?;
        let iterations: u32 = first
            .iterations
            .parse()
            .ok()
            .filter(|i| *i > 0)
            .ok_or_else(|| ScramError::InvalidServerMessage("invalid iteration count".into()))?;

        let without_proof = format!("c={},r={}", BASE64.encode(GS2_HEADER), first.nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );

        let salted = salted_password(&self.password, &salt, iterations);
        let client_key = hmac(&salted, b"Client Key");
        let stored_key = Sha256::digest(&client_key);
        let signature = hmac(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let state = ScramState {
            auth_message: auth_message.into_bytes(),
            server_key: hmac(&salted, b"Server Key"),
        };

        Ok((format!("{},p={}", without_proof, BASE64.encode(proof)), state))
    }

    /// Verify the server final message
    pub fn verify_server_final(
        &self,
        server_final: &str,
        state: &ScramState,
    ) -> Result<(), ScramError> {
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(ScramError::InvalidServerProof(err.to_string()));
        }
        let encoded = server_final
            .strip_prefix("v=")
            .ok_or_else(|| ScramError::InvalidServerMessage("missing 'v=' prefix".into()))?;
        let signature = BASE64
            .decode(encoded)
            .map_err(|_| ScramError::Base64("invalid server signature encoding".into()))?;

        let expected = hmac(&state.server_key, &state.auth_message);
        if constant_time_compare(&signature, &expected) {
            Ok(())
        } else {
            Err(ScramError::InvalidServerProof(
                "server signature verification failed".into(),
            ))
        }
    }
}

/// Parsed `r=<nonce>,s=<salt>,i=<iterations>`
struct ServerFirst<'a> {
    nonce: &'a str,
    salt: &'a str,
    iterations: &'a str,
}

impl<'a> ServerFirst<'a> {
    fn parse(msg: &'a str) -> Result<Self, ScramError> {
        let field = |prefix: &str| {
            msg.split(',')
                .find_map(|part| part.strip_prefix(prefix))
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    ScramError::InvalidServerMessage(format!("missing '{}' in server first", prefix))
                })
        };
        Ok(Self {
            nonce: field("r=")?,
            salt: field("s=")?,
            iterations: field("i=")?,
        })
    }
}

fn salted_password(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    // Only fails for invalid output lengths; 32 bytes is HMAC-SHA256's block output
    let _ = pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
