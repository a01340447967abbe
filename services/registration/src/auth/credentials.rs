//! Password hashing (Argon2id, PHC strings) and HS256 session tokens.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session lifetime.
pub const SESSION_LIFETIME_HOURS: i64 = 24;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("passwords don't match")]
    PasswordMismatch,

    #[error("password needs to be at least 6 characters")]
    PasswordTooShort,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid or expired token: {0}")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),

    #[error("failed to hash password: {0}")]
    Hashing(String),

    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// Session token claims. `username` is the lowercase login email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// Validates a password change: both entries must match and be long enough.
pub fn check_new_password(password: &str, confirm: &str) -> Result<(), CredentialError> {
    if password != confirm {
        return Err(CredentialError::PasswordMismatch);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CredentialError::PasswordTooShort);
    }
    Ok(())
}

/// Hashes passwords and signs session tokens with one shared secret.
#[derive(Clone)]
pub struct Credentials {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn hash_password(&self, password: &str) -> Result<String, CredentialError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| CredentialError::Hashing(e.to_string()))
    }

    /// Checks `password` against a stored PHC hash.
    ///
    /// Accounts without a password (admin-created placeholders) never match.
    pub fn verify_password(
        &self,
        password: &str,
        stored: Option<&str>,
    ) -> Result<(), CredentialError> {
        let stored = stored.ok_or(CredentialError::InvalidCredentials)?;
        let parsed = PasswordHash::new(stored).map_err(|_| CredentialError::InvalidCredentials)?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| CredentialError::InvalidCredentials)
    }

    pub fn issue_token(&self, username: &str) -> Result<String, CredentialError> {
        let now = Utc::now();
        let claims = Claims {
            username: username.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(SESSION_LIFETIME_HOURS)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(CredentialError::Signing)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, CredentialError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(CredentialError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("secret1", "secret1", true)]
    #[case("secret1", "secret2", false)]
    #[case("abc", "abc", false)]
    #[case("äöüßéè", "äöüßéè", true)]
    fn test_check_new_password(#[case] password: &str, #[case] confirm: &str, #[case] ok: bool) {
        assert_eq!(check_new_password(password, confirm).is_ok(), ok);
    }

    #[test]
    fn test_mismatch_reported_before_length() {
        assert!(matches!(
            check_new_password("abc", "abd"),
            Err(CredentialError::PasswordMismatch)
        ));
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let creds = Credentials::new("testing_secret");
        let hash = creds.hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2id$"));

        assert!(creds.verify_password("hunter22", Some(&hash)).is_ok());
        assert!(creds.verify_password("hunter23", Some(&hash)).is_err());
        assert!(creds.verify_password("hunter22", None).is_err());
        assert!(creds.verify_password("hunter22", Some("garbage")).is_err());
    }

    #[test]
    fn test_token_roundtrip() {
        let creds = Credentials::new("testing_secret");
        let token = creds.issue_token("p@p.com").unwrap();
        let claims = creds.verify_token(&token).unwrap();
        assert_eq!(claims.username, "p@p.com");
        assert_eq!(claims.exp - claims.iat, SESSION_LIFETIME_HOURS * 3600);
    }

    #[test]
    fn test_token_from_other_secret_is_rejected() {
        let token = Credentials::new("one").issue_token("p@p.com").unwrap();
        assert!(matches!(
            Credentials::new("two").verify_token(&token),
            Err(CredentialError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let creds = Credentials::new("testing_secret");
        let past = Utc::now() - Duration::hours(SESSION_LIFETIME_HOURS + 1);
        let claims = Claims {
            username: "p@p.com".to_string(),
            iat: past.timestamp(),
            exp: (past + Duration::minutes(5)).timestamp(),
        };
        let token = encode(&Header::default(), &claims, &creds.encoding).unwrap();
        assert!(creds.verify_token(&token).is_err());
    }
}
