//! Token issuance and verification for the user-facing API.
//!
//! Tokens are HS256 JWTs carrying the user id as `sub` plus the login. The
//! rest of the system treats the verified user id as an opaque ownership
//! scope. Password digests are deterministic SHA-256 so that the store can
//! look users up by exact credential match.

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid auth token")]
    InvalidToken,
    #[error("failed to sign token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub login: String,
    pub iat: i64,
    pub exp: i64,
}

/// A verified request identity, attached to requests as an extension.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: String,
    pub login: String,
}

/// Mints and verifies access tokens.
#[derive(Clone)]
pub struct AuthManager {
    secret: String,
    expiration: chrono::Duration,
}

impl AuthManager {
    pub fn new(secret: impl Into<String>, expiration: std::time::Duration) -> Self {
        Self {
            secret: secret.into(),
            expiration: chrono::Duration::from_std(expiration)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
        }
    }

    pub fn mint_token(&self, user_id: &str, login: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            login: login.to_string(),
            iat: now.timestamp(),
            exp: (now + self.expiration).timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(AuthError::Sign)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|_| AuthError::InvalidToken)
    }
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("secret", &"[SECRET]")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Deterministic password digest stored in and matched against the users
/// table.
pub fn digest_password(password: &str) -> String {
    general_purpose::STANDARD.encode(Sha256::digest(password.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn mint_verify_round_trip() {
        let auth = AuthManager::new("secret", Duration::from_secs(3600));
        let token = auth.mint_token("user-1", "alice").unwrap();
        let claims = auth.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.login, "alice");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let minter = AuthManager::new("secret-a", Duration::from_secs(3600));
        let verifier = AuthManager::new("secret-b", Duration::from_secs(3600));
        let token = minter.mint_token("user-1", "alice").unwrap();
        assert!(matches!(
            verifier.verify_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn garbage_token_is_rejected() {
        let auth = AuthManager::new("secret", Duration::from_secs(3600));
        assert!(auth.verify_token("not.a.jwt").is_err());
        assert!(auth.verify_token("").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = AuthManager::new("secret", Duration::from_secs(3600));
        let now = Utc::now().timestamp();
        let stale = Claims {
            sub: "user-1".into(),
            login: "alice".into(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &stale,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(matches!(
            auth.verify_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn digest_is_deterministic_and_discriminating() {
        assert_eq!(digest_password("admin"), digest_password("admin"));
        assert_ne!(digest_password("admin"), digest_password("admin1"));
        // Pinned vector: the bootstrap migration seeds this digest.
        assert_eq!(
            digest_password("admin"),
            "jGl25bVBBBW96Qi9Te4V37Fnqchz/Eu4qB9vKrRIqRg="
        );
    }
}
