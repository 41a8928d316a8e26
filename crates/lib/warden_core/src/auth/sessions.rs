//! Session reuse-or-create and sign-out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::policy::{AuthPolicy, SessionMode};
use super::validator::TokenValidator;
use super::{AuthError, deadline, hash_token};
use crate::models::auth::{ClientInfo, NewSession, SessionRecord};
use crate::store::{AuthStore, AuthTx};

/// What [`SessionManager::open`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Reused(SessionRecord),
    Created(SessionRecord),
}

impl SessionOutcome {
    pub fn session(&self) -> &SessionRecord {
        match self {
            Self::Reused(s) | Self::Created(s) => s,
        }
    }

    pub fn into_session(self) -> SessionRecord {
        match self {
            Self::Reused(s) | Self::Created(s) => s,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Result of a successful sign-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedOut {
    pub session_id: Uuid,
    /// Refresh tokens revoked by this call.
    pub revoked: u64,
    /// The session had already expired, so all of its tokens were retired.
    pub session_expired: bool,
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn AuthStore>,
    validator: TokenValidator,
    policy: AuthPolicy,
}

impl SessionManager {
    pub fn new(store: Arc<dyn AuthStore>, validator: TokenValidator, policy: AuthPolicy) -> Self {
        Self {
            store,
            validator,
            policy,
        }
    }

    /// Pick the session a sign-in should use, inside the caller's transaction.
    ///
    /// Locks the user row first so concurrent sign-ins of one user serialize.
    /// Tokens of the user's expired sessions are revoked on the way.
    pub async fn open(
        &self,
        tx: &mut dyn AuthTx,
        user_id: Uuid,
        client: ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<SessionOutcome, AuthError> {
        if !tx.lock_user(user_id).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let expired = tx.expired_session_ids(user_id, now).await?;
        if !expired.is_empty() {
            let revoked = tx.revoke_session_tokens(&expired, now).await?;
            debug!(%user_id, sessions = expired.len(), revoked, "revoked tokens of expired sessions");
        }

        if self.policy.session_mode == SessionMode::Shared
            && let Some(active) = tx.active_sessions(user_id, now).await?.into_iter().next()
        {
            debug!(%user_id, session_id = %active.id, "reusing active session");
            return Ok(SessionOutcome::Reused(active));
        }

        let session = tx
            .insert_session(NewSession {
                user_id,
                not_after: deadline(now, self.policy.session_window)?,
                client,
                now,
            })
            .await?;
        info!(%user_id, session_id = %session.id, "session created");
        Ok(SessionOutcome::Created(session))
    }

    /// Revoke the presented refresh token, or every token of its session if
    /// the session has expired.
    ///
    /// Malformed → `InvalidToken`; unknown or already revoked → `NotFound`.
    pub async fn sign_out(&self, refresh_token: &str, now: DateTime<Utc>) -> Result<SignedOut, AuthError> {
        let claims = self.validator.verify_refresh_signature(refresh_token)?;

        let mut tx = self.store.begin().await?;
        let row = tx
            .lock_refresh_token(&hash_token(refresh_token))
            .await?
            .filter(|row| row.session.id == claims.session_id && !row.token.revoked)
            .ok_or_else(|| AuthError::NotFound("Refresh token not found".into()))?;

        let session_expired = !row.session.is_active(now);
        let revoked = if session_expired {
            tx.revoke_session_tokens(&[row.session.id], now).await?
        } else {
            tx.revoke_refresh_token(row.token.id, now).await?
        };
        if revoked == 0 {
            return Err(AuthError::NotFound("Refresh token not found".into()));
        }
        tx.commit().await?;

        info!(session_id = %row.session.id, revoked, session_expired, "signed out");
        Ok(SignedOut {
            session_id: row.session.id,
            revoked,
            session_expired,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::auth::testing::{PASSWORD, authenticator, fast_policy, sign_up};
    use crate::store::MemoryAuthStore;

    fn device(name: &str) -> ClientInfo {
        ClientInfo {
            ip_address: "10.0.0.1".into(),
            user_agent: name.into(),
        }
    }

    #[tokio::test]
    async fn shared_mode_reuses_newest_active_session() {
        let store = MemoryAuthStore::seeded();
        let auth = authenticator(&store, fast_policy());
        let user = sign_up(&auth, "ada@example.com").await;
        let now = Utc::now();

        let a = auth
            .sign_in("ada@example.com", PASSWORD, device("A"), now)
            .await
            .unwrap();
        let b = auth
            .sign_in("ada@example.com", PASSWORD, device("B"), now)
            .await
            .unwrap();

        assert!(a.session_created);
        assert!(!b.session_created);
        assert_eq!(a.session.id, b.session.id);
        assert_eq!(store.sessions_for(user.id).await.len(), 1);
        // Both devices hold their own live token under the one session.
        let tokens = store.refresh_tokens_for(a.session.id).await;
        assert_eq!(tokens.iter().filter(|t| !t.revoked).count(), 2);
    }

    #[tokio::test]
    async fn per_device_mode_always_creates() {
        let store = MemoryAuthStore::seeded();
        let policy = AuthPolicy {
            session_mode: SessionMode::PerDevice,
            ..fast_policy()
        };
        let auth = authenticator(&store, policy);
        let user = sign_up(&auth, "ada@example.com").await;
        let now = Utc::now();

        let a = auth
            .sign_in("ada@example.com", PASSWORD, device("A"), now)
            .await
            .unwrap();
        let b = auth
            .sign_in("ada@example.com", PASSWORD, device("B"), now)
            .await
            .unwrap();

        assert_ne!(a.session.id, b.session.id);
        assert_eq!(store.sessions_for(user.id).await.len(), 2);
        assert_eq!(b.session.user_agent, "B");
    }

    #[tokio::test]
    async fn expired_session_is_replaced_and_its_tokens_revoked() {
        let store = MemoryAuthStore::seeded();
        let auth = authenticator(&store, fast_policy());
        sign_up(&auth, "ada@example.com").await;
        let now = Utc::now();

        let first = auth
            .sign_in("ada@example.com", PASSWORD, device("A"), now)
            .await
            .unwrap();
        store
            .set_session_not_after(first.session.id, now - Duration::seconds(1))
            .await;

        let second = auth
            .sign_in("ada@example.com", PASSWORD, device("A"), now)
            .await
            .unwrap();
        assert_ne!(second.session.id, first.session.id);
        assert!(second.session_created);
        assert!(
            store
                .refresh_tokens_for(first.session.id)
                .await
                .iter()
                .all(|t| t.revoked)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sign_ins_share_one_session() {
        let store = MemoryAuthStore::seeded();
        let auth = Arc::new(authenticator(&store, fast_policy()));
        let user = sign_up(&auth, "ada@example.com").await;
        let now = Utc::now();

        let tasks: Vec<_> = (0..5)
            .map(|i| {
                let auth = Arc::clone(&auth);
                tokio::spawn(async move {
                    auth.sign_in("ada@example.com", PASSWORD, device(&format!("d{i}")), now)
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.sessions_for(user.id).await.len(), 1);
    }

    #[tokio::test]
    async fn sign_out_twice_then_not_found() {
        let store = MemoryAuthStore::seeded();
        let auth = authenticator(&store, fast_policy());
        sign_up(&auth, "ada@example.com").await;
        let now = Utc::now();
        let signed_in = auth
            .sign_in("ada@example.com", PASSWORD, device("A"), now)
            .await
            .unwrap();
        let token = signed_in.tokens.refresh_token;

        let out = auth.sign_out(Some(token.as_str()), now).await.unwrap();
        assert_eq!(out.revoked, 1);
        assert!(!out.session_expired);

        let again = auth.sign_out(Some(token.as_str()), now).await.unwrap_err();
        assert!(matches!(again, AuthError::NotFound(_)));
    }

    #[tokio::test]
    async fn sign_out_rejects_missing_and_malformed() {
        let store = MemoryAuthStore::seeded();
        let auth = authenticator(&store, fast_policy());
        let now = Utc::now();
        assert!(matches!(
            auth.sign_out(None, now).await,
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            auth.sign_out(Some("garbage"), now).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn sign_out_of_expired_session_revokes_all_its_tokens() {
        let store = MemoryAuthStore::seeded();
        let auth = authenticator(&store, fast_policy());
        sign_up(&auth, "ada@example.com").await;
        let now = Utc::now();
        let a = auth
            .sign_in("ada@example.com", PASSWORD, device("A"), now)
            .await
            .unwrap();
        let b = auth
            .sign_in("ada@example.com", PASSWORD, device("B"), now)
            .await
            .unwrap();
        store
            .set_session_not_after(a.session.id, now - Duration::seconds(1))
            .await;

        let out = auth
            .sign_out(Some(a.tokens.refresh_token.as_str()), now)
            .await
            .unwrap();
        assert!(out.session_expired);
        assert_eq!(out.revoked, 2);
        assert!(matches!(
            auth.sign_out(Some(b.tokens.refresh_token.as_str()), now).await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn revoked_token_stays_dead_after_session_expiry() {
        let store = MemoryAuthStore::seeded();
        let auth = authenticator(&store, fast_policy());
        sign_up(&auth, "ada@example.com").await;
        let now = Utc::now();
        let a = auth
            .sign_in("ada@example.com", PASSWORD, device("A"), now)
            .await
            .unwrap();
        let b = auth
            .sign_in("ada@example.com", PASSWORD, device("B"), now)
            .await
            .unwrap();
        let token_a = a.tokens.refresh_token.as_str();

        assert_eq!(auth.sign_out(Some(token_a), now).await.unwrap().revoked, 1);
        store
            .set_session_not_after(a.session.id, now - Duration::seconds(1))
            .await;

        assert!(matches!(
            auth.sign_out(Some(token_a), now).await,
            Err(AuthError::NotFound(_))
        ));
        // Device B's token was not swept by the rejected call.
        let tokens = store.refresh_tokens_for(b.session.id).await;
        let b_row = tokens
            .iter()
            .find(|t| t.token_hash == hash_token(&b.tokens.refresh_token))
            .unwrap();
        assert!(!b_row.revoked);
    }

    #[tokio::test]
    async fn oversized_session_window_fails_sign_in_cleanly() {
        let store = MemoryAuthStore::seeded();
        let policy = AuthPolicy {
            session_window: Duration::days(100_000_000),
            ..fast_policy()
        };
        let auth = authenticator(&store, policy);
        let user = sign_up(&auth, "ada@example.com").await;

        let err = auth
            .sign_in("ada@example.com", PASSWORD, device("A"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
        assert!(store.sessions_for(user.id).await.is_empty());
    }
}
