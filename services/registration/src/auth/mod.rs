//! Credential handling: password hashes, session JWTs and one-time tokens.

mod credentials;
pub mod tokens;

pub use credentials::{check_new_password, Claims, CredentialError, Credentials, MIN_PASSWORD_LEN};
