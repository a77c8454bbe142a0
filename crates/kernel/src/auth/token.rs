//! JWT issue and verification (HS256).

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT issuer claim value.
const ISSUER: &str = "excursion";

/// JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    /// User id.
    pub sub: String,
    /// Issued at (Unix seconds).
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl TokenClaims {
    pub fn user_id(&self) -> Option<Uuid> {
        self.sub.parse().ok()
    }
}

/// Signs and verifies session tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime_secs: i64,
}

impl TokenService {
    /// The secret must be at least 32 bytes; `Config` enforces this.
    pub fn new(secret: &[u8], lifetime_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            lifetime_secs,
        }
    }

    /// Issue a token for a user.
    pub fn issue(&self, user_id: Uuid) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            iss: ISSUER.to_string(),
            sub: user_id.to_string(),
            iat: now,
            exp: now + self.lifetime_secs,
            jti: Uuid::now_v7().to_string(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode token")
    }

    /// Verify signature, issuer and expiry.
    pub fn verify(&self, token: &str) -> Result<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .context("invalid token")?;
        Ok(data.claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"an-unguessable-secret-of-32-bytes!!";

    #[test]
    fn issue_and_verify() {
        let service = TokenService::new(SECRET, 3600);
        let id = Uuid::now_v7();
        let token = service.issue(id).unwrap();
        let claims = service.verify(&token).unwrap();
        assert_eq!(claims.user_id(), Some(id));
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = TokenService::new(SECRET, 3600).issue(Uuid::now_v7()).unwrap();
        let other = TokenService::new(b"another-secret-that-is-32-bytes-long", 3600);
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let service = TokenService::new(SECRET, -3600);
        let token = service.issue(Uuid::now_v7()).unwrap();
        assert!(service.verify(&token).is_err());
    }
}
