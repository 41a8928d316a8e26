//! PostgreSQL implementation of the auth store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{AuthStore, AuthTx, StoreError, StoreResult};
use crate::models::auth::{
    NewOneTimeToken, NewSession, NewUser, OneTimeTokenRecord, OneTimeTokenType,
    RefreshTokenRecord, RefreshTokenWithSession, Role, SessionRecord, User, UserWithPassword,
};
use crate::uuid::uuidv7;

const SESSION_COLUMNS: &str =
    "id, user_id, not_after, refresh_at, ip_address, user_agent, created_at, updated_at";

const USER_SELECT: &str = "SELECT u.id, u.email, u.first_name, u.last_name, u.role_id, r.name, \
     u.encrypted_password \
     FROM auth.users u \
     JOIN auth.roles r ON r.id = u.role_id";

const TOKEN_WITH_SESSION_SELECT: &str = "SELECT rt.id AS token_id, rt.session_id, rt.token_hash, rt.revoked, \
            rt.created_at AS token_created_at, rt.updated_at AS token_updated_at, \
            s.user_id, s.not_after, s.refresh_at, s.ip_address, s.user_agent, \
            s.created_at AS session_created_at, s.updated_at AS session_updated_at \
     FROM auth.refresh_tokens rt \
     JOIN auth.sessions s ON s.id = rt.session_id \
     WHERE rt.token_hash = $1";

const ONE_TIME_COLUMNS: &str = "id, token_type::text AS token_type, token_hash, not_after, revoked, \
     metadata, created_by, created_at";

type UserRow = (Uuid, String, String, String, Uuid, String, String);

fn user_from_row(row: UserRow) -> UserWithPassword {
    let (id, email, first_name, last_name, role_id, role, password_hash) = row;
    UserWithPassword {
        user: User {
            id,
            email,
            first_name,
            last_name,
            role_id,
            role,
        },
        password_hash,
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    not_after: DateTime<Utc>,
    refresh_at: DateTime<Utc>,
    ip_address: String,
    user_agent: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SessionRow> for SessionRecord {
    fn from(r: SessionRow) -> Self {
        SessionRecord {
            id: r.id,
            user_id: r.user_id,
            not_after: r.not_after,
            refresh_at: r.refresh_at,
            ip_address: r.ip_address,
            user_agent: r.user_agent,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TokenWithSessionRow {
    token_id: Uuid,
    session_id: Uuid,
    token_hash: String,
    revoked: bool,
    token_created_at: DateTime<Utc>,
    token_updated_at: DateTime<Utc>,
    user_id: Uuid,
    not_after: DateTime<Utc>,
    refresh_at: DateTime<Utc>,
    ip_address: String,
    user_agent: String,
    session_created_at: DateTime<Utc>,
    session_updated_at: DateTime<Utc>,
}

impl From<TokenWithSessionRow> for RefreshTokenWithSession {
    fn from(r: TokenWithSessionRow) -> Self {
        RefreshTokenWithSession {
            token: RefreshTokenRecord {
                id: r.token_id,
                session_id: r.session_id,
                token_hash: r.token_hash,
                revoked: r.revoked,
                created_at: r.token_created_at,
                updated_at: r.token_updated_at,
            },
            session: SessionRecord {
                id: r.session_id,
                user_id: r.user_id,
                not_after: r.not_after,
                refresh_at: r.refresh_at,
                ip_address: r.ip_address,
                user_agent: r.user_agent,
                created_at: r.session_created_at,
                updated_at: r.session_updated_at,
            },
        }
    }
}

#[derive(sqlx::FromRow)]
struct OneTimeTokenRow {
    id: Uuid,
    token_type: String,
    token_hash: String,
    not_after: DateTime<Utc>,
    revoked: bool,
    metadata: serde_json::Value,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OneTimeTokenRow> for OneTimeTokenRecord {
    type Error = StoreError;

    fn try_from(r: OneTimeTokenRow) -> Result<Self, Self::Error> {
        let token_type = OneTimeTokenType::parse(&r.token_type)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown token type {}", r.token_type)))?;
        Ok(OneTimeTokenRecord {
            id: r.id,
            token_type,
            token_hash: r.token_hash,
            not_after: r.not_after,
            revoked: r.revoked,
            metadata: r.metadata,
            created_by: r.created_by,
            created_at: r.created_at,
        })
    }
}

/// Auth store backed by a PostgreSQL pool.
#[derive(Clone, Debug)]
pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthStore for PgAuthStore {
    async fn begin(&self) -> StoreResult<Box<dyn AuthTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgAuthTx { tx }))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserWithPassword>> {
        let sql = format!("{USER_SELECT} WHERE u.email = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(user_from_row))
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("{USER_SELECT} WHERE u.id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| user_from_row(r).user))
    }

    async fn find_role(&self, role_id: Uuid) -> StoreResult<Option<Role>> {
        let row = sqlx::query_as::<_, (Uuid, String)>("SELECT id, name FROM auth.roles WHERE id = $1")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id, name)| Role { id, name }))
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let row =
            sqlx::query_as::<_, (Uuid, String)>("SELECT id, name FROM auth.roles WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name)| Role { id, name }))
    }

    async fn roles_without_permissions(&self) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT r.id, r.name FROM auth.roles r \
             WHERE NOT EXISTS (SELECT 1 FROM auth.role_permissions rp WHERE rp.role_id = r.id) \
             ORDER BY r.name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id, name)| Role { id, name }).collect())
    }

    async fn role_scopes(&self, role_id: Uuid) -> StoreResult<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT p.scope FROM auth.role_permissions rp \
             JOIN auth.permissions p ON p.id = rp.permission_id \
             WHERE rp.role_id = $1",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<RefreshTokenWithSession>> {
        let row = sqlx::query_as::<_, TokenWithSessionRow>(TOKEN_WITH_SESSION_SELECT)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn insert_one_time_token(
        &self,
        new: NewOneTimeToken,
    ) -> StoreResult<OneTimeTokenRecord> {
        let sql = format!(
            "INSERT INTO auth.one_time_tokens \
             (id, token_type, token_hash, not_after, metadata, created_by, created_at, updated_at) \
             VALUES ($1, $2::auth.token_type, $3, $4, $5, $6, $7, $7) \
             RETURNING {ONE_TIME_COLUMNS}"
        );
        let row = sqlx::query_as::<_, OneTimeTokenRow>(&sql)
            .bind(uuidv7())
            .bind(new.token_type.as_str())
            .bind(&new.token_hash)
            .bind(new.not_after)
            .bind(&new.metadata)
            .bind(new.created_by)
            .bind(new.now)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn find_one_time_token(
        &self,
        token_hash: &str,
        token_type: OneTimeTokenType,
    ) -> StoreResult<Option<OneTimeTokenRecord>> {
        let sql = format!(
            "SELECT {ONE_TIME_COLUMNS} FROM auth.one_time_tokens \
             WHERE token_hash = $1 AND token_type = $2::auth.token_type"
        );
        let row = sqlx::query_as::<_, OneTimeTokenRow>(&sql)
            .bind(token_hash)
            .bind(token_type.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }
}

/// An open PostgreSQL transaction. Rolled back on drop unless committed.
pub struct PgAuthTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AuthTx for PgAuthTx {
    async fn lock_user(&mut self, user_id: Uuid) -> StoreResult<bool> {
        let row = sqlx::query_scalar::<_, Uuid>("SELECT id FROM auth.users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.is_some())
    }

    async fn email_exists(&mut self, email: &str) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM auth.users WHERE email = $1)",
        )
        .bind(email)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn insert_user(&mut self, new: NewUser, now: DateTime<Utc>) -> StoreResult<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO auth.users \
             (first_name, last_name, email, encrypted_password, role_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) RETURNING id",
        )
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.role_id)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn active_sessions(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<SessionRecord>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM auth.sessions \
             WHERE user_id = $1 AND not_after > $2 \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(user_id)
            .bind(now)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn expired_session_ids(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM auth.sessions WHERE user_id = $1 AND not_after <= $2",
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids)
    }

    async fn insert_session(&mut self, new: NewSession) -> StoreResult<SessionRecord> {
        let sql = format!(
            "INSERT INTO auth.sessions \
             (id, user_id, not_after, refresh_at, ip_address, user_agent, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $4, $4) \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(uuidv7())
            .bind(new.user_id)
            .bind(new.not_after)
            .bind(new.now)
            .bind(&new.client.ip_address)
            .bind(&new.client.user_agent)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row.into())
    }

    async fn touch_session(
        &mut self,
        session_id: Uuid,
        not_after: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE auth.sessions \
             SET refresh_at = $2, updated_at = $2, not_after = COALESCE($3, not_after) \
             WHERE id = $1",
        )
        .bind(session_id)
        .bind(now)
        .bind(not_after)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_refresh_token(
        &mut self,
        session_id: Uuid,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<RefreshTokenRecord> {
        let id = uuidv7();
        sqlx::query(
            "INSERT INTO auth.refresh_tokens (id, session_id, token_hash, revoked, created_at, updated_at) \
             VALUES ($1, $2, $3, false, $4, $4)",
        )
        .bind(id)
        .bind(session_id)
        .bind(token_hash)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(RefreshTokenRecord {
            id,
            session_id,
            token_hash: token_hash.to_string(),
            revoked: false,
            created_at: now,
            updated_at: now,
        })
    }

    async fn lock_refresh_token(
        &mut self,
        token_hash: &str,
    ) -> StoreResult<Option<RefreshTokenWithSession>> {
        let sql = format!("{TOKEN_WITH_SESSION_SELECT} FOR UPDATE OF rt");
        let row = sqlx::query_as::<_, TokenWithSessionRow>(&sql)
            .bind(token_hash)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn revoke_refresh_token(
        &mut self,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE auth.refresh_tokens SET revoked = true, updated_at = $2 \
             WHERE id = $1 AND revoked = false",
        )
        .bind(token_id)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn revoke_session_tokens(
        &mut self,
        session_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        if session_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE auth.refresh_tokens SET revoked = true, updated_at = $2 \
             WHERE session_id = ANY($1) AND revoked = false",
        )
        .bind(session_ids)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn consume_one_time_token(
        &mut self,
        token_hash: &str,
        token_type: OneTimeTokenType,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<OneTimeTokenRecord>> {
        let sql = format!(
            "UPDATE auth.one_time_tokens SET revoked = true, updated_at = $3 \
             WHERE token_hash = $1 AND token_type = $2::auth.token_type \
               AND revoked = false AND not_after > $3 \
             RETURNING {ONE_TIME_COLUMNS}"
        );
        let row = sqlx::query_as::<_, OneTimeTokenRow>(&sql)
            .bind(token_hash)
            .bind(token_type.as_str())
            .bind(now)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let PgAuthTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}
