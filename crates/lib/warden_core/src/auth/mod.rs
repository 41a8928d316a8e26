//! Authentication and authorization logic.
//!
//! Leaf-first: [`credentials`] and [`permissions`] feed [`sessions`] and
//! [`issuer`]; [`validator`] and [`gate`] guard every protected request;
//! [`service`] wires them into the sign-up / sign-in / renew / sign-out flows.

pub mod credentials;
pub mod gate;
pub mod invitations;
pub mod issuer;
pub mod jwt;
pub mod password;
pub mod permissions;
pub mod policy;
pub mod service;
pub mod sessions;
pub mod validator;

use chrono::{DateTime, Duration, Utc};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::store::StoreError;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    Revoked,

    #[error("Session expired, please log in again")]
    SessionExpired,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Generate a random bearer secret (64 alphanumeric chars).
pub fn generate_token() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// SHA-256 hash a bearer secret for storage.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `now + lifetime`, failing instead of overflowing the calendar.
pub(crate) fn deadline(now: DateTime<Utc>, lifetime: Duration) -> Result<DateTime<Utc>, AuthError> {
    now.checked_add_signed(lifetime)
        .ok_or_else(|| AuthError::Internal(format!("lifetime {lifetime} overflows from {now}")))
}
