//! Persistence interface for the auth domain.
//!
//! Every component receives an `Arc<dyn AuthStore>` rather than reaching for
//! a global pool. Multi-row changes go through an [`AuthTx`] obtained from
//! [`AuthStore::begin`]; dropping a transaction without calling
//! [`AuthTx::commit`] rolls it back.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::{
    NewOneTimeToken, NewSession, NewUser, OneTimeTokenRecord, OneTimeTokenType,
    RefreshTokenRecord, RefreshTokenWithSession, Role, SessionRecord, User, UserWithPassword,
};

pub use memory::MemoryAuthStore;
pub use postgres::PgAuthStore;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQL error: {0}")]
    Sql(sqlx::Error),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Foreign key violated: {0}")]
    ForeignKeyViolation(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            let constraint = db.constraint().unwrap_or_default().to_string();
            if db.is_unique_violation() {
                return StoreError::UniqueViolation(constraint);
            }
            if db.is_foreign_key_violation() {
                return StoreError::ForeignKeyViolation(constraint);
            }
        }
        StoreError::Sql(e)
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Single-statement reads and writes, plus the entry point for transactions.
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Start a transaction (read committed, row locks taken explicitly).
    async fn begin(&self) -> StoreResult<Box<dyn AuthTx>>;

    /// Fetch a user (joined with its role name) and password hash by email.
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserWithPassword>>;

    /// Fetch a user (joined with its role name) by id.
    async fn find_user_by_id(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    async fn find_role(&self, role_id: Uuid) -> StoreResult<Option<Role>>;

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;

    /// Roles with zero rows in `role_permissions`.
    async fn roles_without_permissions(&self) -> StoreResult<Vec<Role>>;

    /// Scopes reachable from a role via `role_permissions`.
    async fn role_scopes(&self, role_id: Uuid) -> StoreResult<Vec<String>>;

    /// Refresh token joined with its session, looked up by token hash.
    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<RefreshTokenWithSession>>;

    async fn insert_one_time_token(&self, new: NewOneTimeToken)
    -> StoreResult<OneTimeTokenRecord>;

    async fn find_one_time_token(
        &self,
        token_hash: &str,
        token_type: OneTimeTokenType,
    ) -> StoreResult<Option<OneTimeTokenRecord>>;
}

/// Operations that must commit or roll back together.
#[async_trait]
pub trait AuthTx: Send {
    /// Take a row lock on the user. Returns `false` if the user does not exist.
    async fn lock_user(&mut self, user_id: Uuid) -> StoreResult<bool>;

    async fn email_exists(&mut self, email: &str) -> StoreResult<bool>;

    /// Insert a user, returning its id. Duplicate email → `UniqueViolation`.
    async fn insert_user(&mut self, new: NewUser, now: DateTime<Utc>) -> StoreResult<Uuid>;

    /// Sessions of the user with `not_after > now`, newest first.
    async fn active_sessions(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<SessionRecord>>;

    /// Ids of the user's sessions with `not_after <= now`.
    async fn expired_session_ids(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Uuid>>;

    async fn insert_session(&mut self, new: NewSession) -> StoreResult<SessionRecord>;

    /// Record a rotation on the session and optionally move its expiry.
    async fn touch_session(
        &mut self,
        session_id: Uuid,
        not_after: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn insert_refresh_token(
        &mut self,
        session_id: Uuid,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<RefreshTokenRecord>;

    /// Fetch a refresh token with its session, locking the token row.
    async fn lock_refresh_token(
        &mut self,
        token_hash: &str,
    ) -> StoreResult<Option<RefreshTokenWithSession>>;

    /// Revoke one token if it is not already revoked. Returns rows changed.
    async fn revoke_refresh_token(&mut self, token_id: Uuid, now: DateTime<Utc>)
    -> StoreResult<u64>;

    /// Revoke every non-revoked token under the given sessions. Returns rows changed.
    async fn revoke_session_tokens(
        &mut self,
        session_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Revoke a usable one-time token and return it, or `None` if there is no
    /// matching token that is unrevoked and unexpired.
    async fn consume_one_time_token(
        &mut self,
        token_hash: &str,
        token_type: OneTimeTokenType,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<OneTimeTokenRecord>>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
