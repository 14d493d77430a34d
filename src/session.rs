//! Password hashing and bearer token issuance/verification.

use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use std::sync::OnceLock;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Message returned for every failed login, whatever the cause.
pub const INVALID_CREDENTIALS: &str = "invalid email or password";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub email: String,
    pub iat: usize,
    pub exp: usize,
}

pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl SessionIssuer {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let mut validation = Validation::default();
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    pub fn issue(&self, user_id: Uuid, username: &str, email: &str) -> AppResult<String> {
        self.issue_at(user_id, username, email, Utc::now())
    }

    pub fn issue_at(
        &self,
        user_id: Uuid,
        username: &str,
        email: &str,
        issued_at: DateTime<Utc>,
    ) -> AppResult<String> {
        let exp = issued_at + self.ttl;
        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            email: email.to_string(),
            iat: issued_at.timestamp().max(0) as usize,
            exp: exp.timestamp().max(0) as usize,
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("jwt encode error: {e}")))
    }

    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "token rejected");
                AppError::auth("invalid or expired token")
            })
    }
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hash error: {e}")))
}

/// A stored hash that fails to parse counts as a mismatch.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "unparseable password hash");
            false
        }
    }
}

/// Hash with the same parameters as stored ones, checked when the email is
/// unknown so both login failures cost one argon2 verification.
fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| hash_password("dummy password for unknown accounts").ok())
        .as_deref()
}

/// Verifies `password` against the account's hash, or against a dummy hash
/// when there is no account. The latter always fails.
pub fn check_credentials(password: &str, stored_hash: Option<&str>) -> bool {
    match stored_hash {
        Some(hash) => verify_password(password, hash),
        None => {
            if let Some(dummy) = dummy_hash() {
                let _ = verify_password(password, dummy);
            }
            false
        }
    }
}
