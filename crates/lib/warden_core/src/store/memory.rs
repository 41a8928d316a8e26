//! In-memory implementation of the auth store.
//!
//! Transactions hold the store mutex for their whole lifetime and work on a
//! staged copy of the state, so they serialize exactly like the row locks of
//! the PostgreSQL store and roll back by simply being dropped.
//!
//! Used by unit and router tests; seeded with the same roles and permissions
//! as the SQL migrations.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{AuthStore, AuthTx, StoreError, StoreResult};
use crate::auth::permissions::{roles, scopes};
use crate::models::auth::{
    NewOneTimeToken, NewSession, NewUser, OneTimeTokenRecord, OneTimeTokenType,
    RefreshTokenRecord, RefreshTokenWithSession, Role, SessionRecord, User, UserWithPassword,
};
use crate::uuid::uuidv7;

#[derive(Debug, Clone)]
struct UserRow {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    password_hash: String,
    role_id: Uuid,
}

#[derive(Debug, Clone)]
struct PermissionRow {
    id: Uuid,
    scope: String,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    roles: Vec<Role>,
    permissions: Vec<PermissionRow>,
    role_permissions: BTreeSet<(Uuid, Uuid)>,
    users: Vec<UserRow>,
    sessions: Vec<SessionRecord>,
    refresh_tokens: Vec<RefreshTokenRecord>,
    one_time_tokens: Vec<OneTimeTokenRecord>,
}

impl MemoryState {
    fn user(&self, row: &UserRow) -> Option<User> {
        let role = self.roles.iter().find(|r| r.id == row.role_id)?;
        Some(User {
            id: row.id,
            email: row.email.clone(),
            first_name: row.first_name.clone(),
            last_name: row.last_name.clone(),
            role_id: row.role_id,
            role: role.name.clone(),
        })
    }

    fn token_with_session(&self, token_hash: &str) -> Option<RefreshTokenWithSession> {
        let token = self
            .refresh_tokens
            .iter()
            .find(|t| t.token_hash == token_hash)?;
        let session = self.sessions.iter().find(|s| s.id == token.session_id)?;
        Some(RefreshTokenWithSession {
            token: token.clone(),
            session: session.clone(),
        })
    }

    fn one_time_token_mut(
        &mut self,
        token_hash: &str,
        token_type: OneTimeTokenType,
    ) -> Option<&mut OneTimeTokenRecord> {
        self.one_time_tokens
            .iter_mut()
            .find(|t| t.token_hash == token_hash && t.token_type == token_type)
    }

    fn grant(&mut self, role_id: Uuid, scope: &str) {
        let permission_id = match self.permissions.iter().find(|p| p.scope == scope) {
            Some(p) => p.id,
            None => {
                let id = uuidv7();
                self.permissions.push(PermissionRow {
                    id,
                    scope: scope.to_string(),
                });
                id
            }
        };
        self.role_permissions.insert((role_id, permission_id));
    }
}

/// Auth store kept entirely in process memory.
#[derive(Clone, Default)]
pub struct MemoryAuthStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryAuthStore {
    /// A store holding the default `super_admin`, `admin` and `guest` roles
    /// and their permissions.
    pub fn seeded() -> Self {
        let mut state = MemoryState::default();
        for (id, name) in [
            (roles::SUPER_ADMIN_ID, roles::SUPER_ADMIN),
            (roles::ADMIN_ID, roles::ADMIN),
            (roles::GUEST_ID, roles::GUEST),
        ] {
            state.roles.push(Role {
                id,
                name: name.to_string(),
            });
        }
        for scope in scopes::ALL {
            state.grant(roles::SUPER_ADMIN_ID, scope);
        }
        for scope in [scopes::READ_PROFILE, scopes::READ_USERS, scopes::CREATE_INVITATION] {
            state.grant(roles::ADMIN_ID, scope);
        }
        state.grant(roles::GUEST_ID, scopes::READ_PROFILE);
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Add a role without any permissions.
    pub async fn add_role(&self, name: &str) -> Role {
        let role = Role {
            id: uuidv7(),
            name: name.to_string(),
        };
        self.state.lock().await.roles.push(role.clone());
        role
    }

    /// Attach a scope to a role, creating the permission if needed.
    pub async fn grant_scope(&self, role_id: Uuid, scope: &str) {
        self.state.lock().await.grant(role_id, scope);
    }

    /// Move a user to another role.
    pub async fn assign_role(&self, user_id: Uuid, role_id: Uuid) {
        let mut state = self.state.lock().await;
        if let Some(user) = state.users.iter_mut().find(|u| u.id == user_id) {
            user.role_id = role_id;
        }
    }

    /// All sessions of a user, oldest first.
    pub async fn sessions_for(&self, user_id: Uuid) -> Vec<SessionRecord> {
        let state = self.state.lock().await;
        state
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    /// All refresh tokens of a session, oldest first.
    pub async fn refresh_tokens_for(&self, session_id: Uuid) -> Vec<RefreshTokenRecord> {
        let state = self.state.lock().await;
        state
            .refresh_tokens
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Force a session's expiry, e.g. into the past.
    pub async fn set_session_not_after(&self, session_id: Uuid, not_after: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.iter_mut().find(|s| s.id == session_id) {
            session.not_after = not_after;
        }
    }

    /// Force a one-time token's expiry.
    pub async fn set_one_time_token_not_after(&self, token_hash: &str, not_after: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if let Some(token) = state
            .one_time_tokens
            .iter_mut()
            .find(|t| t.token_hash == token_hash)
        {
            token.not_after = not_after;
        }
    }
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn begin(&self) -> StoreResult<Box<dyn AuthTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryAuthTx { guard, staged }))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserWithPassword>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .iter()
            .find(|u| u.email == email)
            .and_then(|row| {
                state.user(row).map(|user| UserWithPassword {
                    user,
                    password_hash: row.password_hash.clone(),
                })
            }))
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .iter()
            .find(|u| u.id == user_id)
            .and_then(|row| state.user(row)))
    }

    async fn find_role(&self, role_id: Uuid) -> StoreResult<Option<Role>> {
        let state = self.state.lock().await;
        Ok(state.roles.iter().find(|r| r.id == role_id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let state = self.state.lock().await;
        Ok(state.roles.iter().find(|r| r.name == name).cloned())
    }

    async fn roles_without_permissions(&self) -> StoreResult<Vec<Role>> {
        let state = self.state.lock().await;
        let mut bare: Vec<Role> = state
            .roles
            .iter()
            .filter(|r| !state.role_permissions.iter().any(|(role_id, _)| *role_id == r.id))
            .cloned()
            .collect();
        bare.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(bare)
    }

    async fn role_scopes(&self, role_id: Uuid) -> StoreResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .role_permissions
            .iter()
            .filter(|(r, _)| *r == role_id)
            .filter_map(|(_, p)| state.permissions.iter().find(|perm| perm.id == *p))
            .map(|perm| perm.scope.clone())
            .collect())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<RefreshTokenWithSession>> {
        Ok(self.state.lock().await.token_with_session(token_hash))
    }

    async fn insert_one_time_token(
        &self,
        new: NewOneTimeToken,
    ) -> StoreResult<OneTimeTokenRecord> {
        let mut state = self.state.lock().await;
        if state
            .one_time_tokens
            .iter()
            .any(|t| t.token_hash == new.token_hash)
        {
            return Err(StoreError::UniqueViolation(
                "one_time_tokens_token_hash_key".into(),
            ));
        }
        let record = OneTimeTokenRecord {
            id: uuidv7(),
            token_type: new.token_type,
            token_hash: new.token_hash,
            not_after: new.not_after,
            revoked: false,
            metadata: new.metadata,
            created_by: new.created_by,
            created_at: new.now,
        };
        state.one_time_tokens.push(record.clone());
        Ok(record)
    }

    async fn find_one_time_token(
        &self,
        token_hash: &str,
        token_type: OneTimeTokenType,
    ) -> StoreResult<Option<OneTimeTokenRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .one_time_tokens
            .iter()
            .find(|t| t.token_hash == token_hash && t.token_type == token_type)
            .cloned())
    }
}

/// An open in-memory transaction.
pub struct MemoryAuthTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl AuthTx for MemoryAuthTx {
    async fn lock_user(&mut self, user_id: Uuid) -> StoreResult<bool> {
        Ok(self.staged.users.iter().any(|u| u.id == user_id))
    }

    async fn email_exists(&mut self, email: &str) -> StoreResult<bool> {
        Ok(self.staged.users.iter().any(|u| u.email == email))
    }

    async fn insert_user(&mut self, new: NewUser, _now: DateTime<Utc>) -> StoreResult<Uuid> {
        if self.staged.users.iter().any(|u| u.email == new.email) {
            return Err(StoreError::UniqueViolation("users_email_key".into()));
        }
        if !self.staged.roles.iter().any(|r| r.id == new.role_id) {
            return Err(StoreError::ForeignKeyViolation("users_role_id_fkey".into()));
        }
        let id = uuidv7();
        self.staged.users.push(UserRow {
            id,
            email: new.email,
            first_name: new.first_name,
            last_name: new.last_name,
            password_hash: new.password_hash,
            role_id: new.role_id,
        });
        Ok(id)
    }

    async fn active_sessions(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<SessionRecord>> {
        let mut sessions: Vec<SessionRecord> = self
            .staged
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_active(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(sessions)
    }

    async fn expired_session_ids(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Uuid>> {
        Ok(self
            .staged
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id && !s.is_active(now))
            .map(|s| s.id)
            .collect())
    }

    async fn insert_session(&mut self, new: NewSession) -> StoreResult<SessionRecord> {
        if !self.staged.users.iter().any(|u| u.id == new.user_id) {
            return Err(StoreError::ForeignKeyViolation("sessions_user_id_fkey".into()));
        }
        let session = SessionRecord {
            id: uuidv7(),
            user_id: new.user_id,
            not_after: new.not_after,
            refresh_at: new.now,
            ip_address: new.client.ip_address,
            user_agent: new.client.user_agent,
            created_at: new.now,
            updated_at: new.now,
        };
        self.staged.sessions.push(session.clone());
        Ok(session)
    }

    async fn touch_session(
        &mut self,
        session_id: Uuid,
        not_after: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        if let Some(session) = self.staged.sessions.iter_mut().find(|s| s.id == session_id) {
            session.refresh_at = now;
            session.updated_at = now;
            if let Some(not_after) = not_after {
                session.not_after = not_after;
            }
        }
        Ok(())
    }

    async fn insert_refresh_token(
        &mut self,
        session_id: Uuid,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<RefreshTokenRecord> {
        if !self.staged.sessions.iter().any(|s| s.id == session_id) {
            return Err(StoreError::ForeignKeyViolation(
                "refresh_tokens_session_id_fkey".into(),
            ));
        }
        if self
            .staged
            .refresh_tokens
            .iter()
            .any(|t| t.token_hash == token_hash)
        {
            return Err(StoreError::UniqueViolation(
                "refresh_tokens_token_hash_key".into(),
            ));
        }
        let record = RefreshTokenRecord {
            id: uuidv7(),
            session_id,
            token_hash: token_hash.to_string(),
            revoked: false,
            created_at: now,
            updated_at: now,
        };
        self.staged.refresh_tokens.push(record.clone());
        Ok(record)
    }

    async fn lock_refresh_token(
        &mut self,
        token_hash: &str,
    ) -> StoreResult<Option<RefreshTokenWithSession>> {
        Ok(self.staged.token_with_session(token_hash))
    }

    async fn revoke_refresh_token(
        &mut self,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        match self
            .staged
            .refresh_tokens
            .iter_mut()
            .find(|t| t.id == token_id && !t.revoked)
        {
            Some(token) => {
                token.revoked = true;
                token.updated_at = now;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn revoke_session_tokens(
        &mut self,
        session_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut changed = 0;
        for token in self
            .staged
            .refresh_tokens
            .iter_mut()
            .filter(|t| session_ids.contains(&t.session_id) && !t.revoked)
        {
            token.revoked = true;
            token.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }

    async fn consume_one_time_token(
        &mut self,
        token_hash: &str,
        token_type: OneTimeTokenType,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<OneTimeTokenRecord>> {
        match self.staged.one_time_token_mut(token_hash, token_type) {
            Some(token) if token.is_usable(now) => {
                token.revoked = true;
                Ok(Some(token.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryAuthTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
