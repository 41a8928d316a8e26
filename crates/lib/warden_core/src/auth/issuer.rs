//! Token minting and refresh-token rotation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::jwt::JwtKeys;
use super::permissions::PermissionResolver;
use super::policy::AuthPolicy;
use super::validator::{TokenValidator, check_persisted};
use super::{AuthError, deadline, hash_token};
use crate::models::auth::{AccessClaims, RefreshClaims, SessionRecord, User};
use crate::store::{AuthStore, AuthTx};
use crate::uuid::uuidv7;

/// A freshly minted access/refresh pair.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub access_claims: AccessClaims,
    pub refresh_token: String,
    pub refresh_claims: RefreshClaims,
    /// When the refresh token stops being accepted; drives the cookie max-age.
    pub refresh_expires_at: DateTime<Utc>,
}

impl IssuedTokens {
    /// Seconds until the refresh token expires, never negative.
    pub fn refresh_max_age(&self, now: DateTime<Utc>) -> i64 {
        (self.refresh_expires_at - now).num_seconds().max(0)
    }
}

/// Result of a successful rotation.
#[derive(Debug, Clone)]
pub struct Rotation {
    pub user: User,
    pub session: SessionRecord,
    pub tokens: IssuedTokens,
}

#[derive(Clone)]
pub struct TokenIssuer {
    keys: JwtKeys,
    store: Arc<dyn AuthStore>,
    validator: TokenValidator,
    permissions: PermissionResolver,
    policy: AuthPolicy,
}

impl TokenIssuer {
    pub fn new(
        keys: JwtKeys,
        store: Arc<dyn AuthStore>,
        validator: TokenValidator,
        permissions: PermissionResolver,
        policy: AuthPolicy,
    ) -> Self {
        Self {
            keys,
            store,
            validator,
            permissions,
            policy,
        }
    }

    /// Sign an access token carrying the given permission snapshot.
    pub fn mint_access(
        &self,
        user: &User,
        permission: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<(String, AccessClaims), AuthError> {
        let claims = AccessClaims {
            sub: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role.clone(),
            permission,
            iat: now.timestamp(),
            exp: deadline(now, self.policy.access_ttl)?.timestamp(),
        };
        let token = self.keys.sign(&claims)?;
        Ok((token, claims))
    }

    /// Sign a refresh token for the session. Its expiry never outlives the
    /// session.
    pub fn mint_refresh(
        &self,
        session: &SessionRecord,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<(String, RefreshClaims, DateTime<Utc>), AuthError> {
        let expires_at = deadline(now, self.policy.refresh_ttl)?.min(session.not_after);
        let claims = RefreshClaims {
            session_id: session.id,
            email: email.to_string(),
            jti: uuidv7(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = self.keys.sign(&claims)?;
        Ok((token, claims, expires_at))
    }

    /// Mint a pair and persist the refresh row inside the caller's
    /// transaction. Nothing is stored unless the caller commits.
    pub async fn issue(
        &self,
        tx: &mut dyn AuthTx,
        session: &SessionRecord,
        user: &User,
        permission: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<IssuedTokens, AuthError> {
        let (refresh_token, refresh_claims, refresh_expires_at) =
            self.mint_refresh(session, &user.email, now)?;
        tx.insert_refresh_token(session.id, &hash_token(&refresh_token), now)
            .await?;
        let (access_token, access_claims) = self.mint_access(user, permission, now)?;
        Ok(IssuedTokens {
            access_token,
            access_claims,
            refresh_token,
            refresh_claims,
            refresh_expires_at,
        })
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// The old row is locked, re-checked and conditionally revoked in the same
    /// transaction that inserts its replacement, so of two concurrent
    /// rotations of one token exactly one wins; the other sees `Revoked`.
    pub async fn rotate(&self, refresh_token: &str, now: DateTime<Utc>) -> Result<Rotation, AuthError> {
        let pre = match self.validator.validate_refresh(refresh_token, now).await {
            Ok(pre) => pre,
            Err(AuthError::SessionExpired) => {
                let claims = self.validator.verify_refresh_structure(refresh_token)?;
                self.retire_session(claims.session_id, now).await?;
                return Err(AuthError::SessionExpired);
            }
            Err(AuthError::Revoked) => {
                warn!("rotation attempted with a revoked or unknown refresh token");
                return Err(AuthError::Revoked);
            }
            Err(e) => return Err(e),
        };

        let user = self
            .store
            .find_user_by_id(pre.session.user_id)
            .await?
            .ok_or(AuthError::Revoked)?;
        let permission = self.permissions.resolve(user.role_id).await?;

        let token_hash = hash_token(refresh_token);
        let mut tx = self.store.begin().await?;
        let locked = tx.lock_refresh_token(&token_hash).await?;
        let row = match check_persisted(&pre.claims, locked, now) {
            Ok(row) => row,
            Err(AuthError::SessionExpired) => {
                tx.revoke_session_tokens(&[pre.claims.session_id], now).await?;
                tx.commit().await?;
                return Err(AuthError::SessionExpired);
            }
            Err(e) => {
                warn!(session_id = %pre.claims.session_id, "refresh token revoked before rotation");
                return Err(e);
            }
        };

        if tx.revoke_refresh_token(row.token.id, now).await? == 0 {
            warn!(session_id = %row.session.id, "refresh token rotated concurrently");
            return Err(AuthError::Revoked);
        }

        let mut session = row.session;
        let not_after = if self.policy.sliding_sessions {
            Some(deadline(now, self.policy.session_window)?)
        } else {
            None
        };
        tx.touch_session(session.id, not_after, now).await?;
        session.refresh_at = now;
        session.updated_at = now;
        if let Some(not_after) = not_after {
            session.not_after = not_after;
        }

        let tokens = self
            .issue(tx.as_mut(), &session, &user, permission, now)
            .await?;
        tx.commit().await?;

        info!(user_id = %user.id, session_id = %session.id, "refresh token rotated");
        Ok(Rotation {
            user,
            session,
            tokens,
        })
    }

    /// Revoke every token of an expired session.
    async fn retire_session(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<(), AuthError> {
        let mut tx = self.store.begin().await?;
        let revoked = tx.revoke_session_tokens(&[session_id], now).await?;
        tx.commit().await?;
        if revoked > 0 {
            info!(%session_id, revoked, "expired session retired");
        }
        Ok(())
    }
}
