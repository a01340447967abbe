//! One-time verification and password-reset tokens.
//!
//! Tokens are 32 random bytes, URL-safe base64 encoded. Only the SHA-256
//! hash is stored; the plain token travels in the mailed link.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// How long a verification or reset link stays valid.
pub const TOKEN_LIFETIME_HOURS: i64 = 24;

const TOKEN_BYTES: usize = 32;

/// A freshly issued token: the plain value for the link, the hash to store.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub hash: String,
    pub expires_at: DateTime<Utc>,
}

pub fn generate_verification_token() -> IssuedToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    let token = URL_SAFE_NO_PAD.encode(bytes);
    IssuedToken {
        hash: hash_token(&token),
        token,
        expires_at: Utc::now() + Duration::hours(TOKEN_LIFETIME_HOURS),
    }
}

/// Hash a token for storage using SHA-256, as lowercase hex.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique_and_url_safe() {
        let a = generate_verification_token();
        let b = generate_verification_token();
        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 43);
        assert!(a
            .token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_stored_hash_matches_token() {
        let issued = generate_verification_token();
        assert_eq!(issued.hash, hash_token(&issued.token));
        assert_eq!(issued.hash.len(), 64);
        assert_ne!(issued.hash, issued.token);
    }

    #[test]
    fn test_expiry_is_a_day_out() {
        let issued = generate_verification_token();
        let remaining = issued.expires_at - Utc::now();
        assert!(remaining > Duration::hours(23));
        assert!(remaining <= Duration::hours(TOKEN_LIFETIME_HOURS));
    }
}
