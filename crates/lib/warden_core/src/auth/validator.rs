//! Token verification: signature/expiry, then persisted state for refresh tokens.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::jwt::JwtKeys;
use super::{AuthError, hash_token};
use crate::models::auth::{
    AccessClaims, RefreshClaims, RefreshTokenRecord, RefreshTokenWithSession, SessionRecord,
};
use crate::store::AuthStore;

/// A refresh token that passed both checks.
#[derive(Debug, Clone)]
pub struct ValidatedRefresh {
    pub claims: RefreshClaims,
    pub token: RefreshTokenRecord,
    pub session: SessionRecord,
}

#[derive(Clone)]
pub struct TokenValidator {
    keys: JwtKeys,
    store: Arc<dyn AuthStore>,
}

impl TokenValidator {
    pub fn new(keys: JwtKeys, store: Arc<dyn AuthStore>) -> Self {
        Self { keys, store }
    }

    /// Verify an access token. Never touches storage.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.keys.verify(token)
    }

    /// Verify an access token's signature and schema, accepting it past expiry.
    pub fn verify_access_signature(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.keys.verify_signature(token)
    }

    /// Structural check of a refresh token: signature, expiry and schema.
    pub fn verify_refresh_structure(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        self.keys.verify(token)
    }

    /// Signature and schema only. Sign-out uses this so that a token whose
    /// session already ran out can still retire that session.
    pub fn verify_refresh_signature(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        self.keys.verify_signature(token)
    }

    /// Full refresh-token validation: structure, then the persisted row and
    /// its session.
    pub async fn validate_refresh(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ValidatedRefresh, AuthError> {
        let claims = self.verify_refresh_structure(token)?;
        let row = self.store.find_refresh_token(&hash_token(token)).await?;
        let row = check_persisted(&claims, row, now)?;
        Ok(ValidatedRefresh {
            claims,
            token: row.token,
            session: row.session,
        })
    }
}

/// Cross-check verified claims against the stored row.
///
/// Missing or revoked rows and rows of another session are `Revoked`; a
/// session whose `not_after` has passed is `SessionExpired`.
pub fn check_persisted(
    claims: &RefreshClaims,
    row: Option<RefreshTokenWithSession>,
    now: DateTime<Utc>,
) -> Result<RefreshTokenWithSession, AuthError> {
    let row = row.ok_or(AuthError::Revoked)?;
    if row.token.revoked || row.session.id != claims.session_id {
        return Err(AuthError::Revoked);
    }
    if !row.session.is_active(now) {
        return Err(AuthError::SessionExpired);
    }
    Ok(row)
}
