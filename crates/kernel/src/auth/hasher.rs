//! Credential hashing and password-reset tokens.

use anyhow::Result;
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// One-way credential hashing capability.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<String>;

    /// Never errors: an unparsable digest simply fails verification.
    fn verify(&self, plaintext: &str, digest: &str) -> bool;
}

/// Argon2id with default parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Hasher;

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
        Ok(hash.to_string())
    }

    fn verify(&self, plaintext: &str, digest: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(digest) else {
            return false;
        };
        Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }
}

/// How long a password-reset token stays valid.
pub const RESET_TOKEN_TTL_MINUTES: i64 = 10;

/// A freshly generated password-reset token.
///
/// Only `digest` is stored; `token` goes to the account owner.
#[derive(Debug, Clone)]
pub struct ResetToken {
    pub token: String,
    pub digest: String,
    pub expires_at: DateTime<Utc>,
}

impl ResetToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        Self {
            digest: digest_reset_token(&token),
            token,
            expires_at: Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES),
        }
    }
}

/// SHA-256 hex digest under which a reset token is stored.
pub fn digest_reset_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn argon2_round_trip() {
        let hasher = Argon2Hasher;
        let digest = hasher.hash("pass1234").unwrap();
        assert!(digest.starts_with("$argon2"));
        assert!(hasher.verify("pass1234", &digest));
        assert!(!hasher.verify("wrong", &digest));
        assert!(!hasher.verify("pass1234", "not-a-hash"));
    }

    #[test]
    fn reset_tokens_store_only_digest() {
        let reset = ResetToken::generate();
        assert_eq!(reset.token.len(), 64);
        assert_eq!(reset.digest, digest_reset_token(&reset.token));
        assert_ne!(reset.digest, reset.token);
        assert!(reset.expires_at > Utc::now());
    }
}
