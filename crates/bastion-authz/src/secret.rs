//! Opaque secret generation and hashing.
//!
//! Invitation tokens and system user credentials are high-entropy random
//! values, so a single SHA-256 pass is enough to store them. Plaintext
//! values are returned to the caller once and never persisted.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Prefix of every system user credential.
pub const SYSTEM_SECRET_PREFIX: &str = "sysuser_";

const SYSTEM_SECRET_BODY_LEN: usize = 40;

/// Generate an invitation token (64 hex chars = 32 bytes of entropy).
pub fn generate_invitation_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Generate a system user credential: `sysuser_` followed by 40 URL-safe
/// base64 characters.
pub fn generate_system_secret() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    let encoded = URL_SAFE_NO_PAD.encode(bytes);
    format!(
        "{SYSTEM_SECRET_PREFIX}{}",
        &encoded[..SYSTEM_SECRET_BODY_LEN]
    )
}

/// Generate the opaque user identifier of a system user (`sys_` + 32 hex).
pub fn generate_system_user_id() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    format!("sys_{}", hex::encode(bytes))
}

/// SHA-256 hash of a token or credential, hex-encoded.
pub fn hash_secret(secret: &str) -> String {
    let hash = Sha256::digest(secret.as_bytes());
    hex::encode(hash)
}

/// Compare a presented secret with a stored hash without short-circuiting
/// on the first differing byte.
pub fn verify_secret(secret: &str, expected_hash: &str) -> bool {
    let actual = hash_secret(secret);
    if actual.len() != expected_hash.len() {
        return false;
    }
    actual
        .bytes()
        .zip(expected_hash.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
