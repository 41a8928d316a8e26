//! Role → permission-scope resolution.
//!
//! A scope is an opaque `verb:resource` capability string.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::error;
use uuid::Uuid;

use super::AuthError;
use crate::store::AuthStore;

/// Scopes known to the HTTP surface and the seed data.
pub mod scopes {
    pub const READ_PROFILE: &str = "read:profile";
    pub const CREATE_INVITATION: &str = "create:invitation";
    pub const READ_USERS: &str = "read:users";
    pub const WRITE_USERS: &str = "write:users";
    pub const UPDATE_USERS: &str = "update:users";
    pub const DELETE_USERS: &str = "delete:users";

    pub const ALL: [&str; 6] = [
        READ_PROFILE,
        CREATE_INVITATION,
        READ_USERS,
        WRITE_USERS,
        UPDATE_USERS,
        DELETE_USERS,
    ];
}

/// Seeded roles. Ids match `migrations/0002_seed_roles.sql`.
pub mod roles {
    use uuid::{Uuid, uuid};

    pub const SUPER_ADMIN: &str = "super_admin";
    pub const ADMIN: &str = "admin";
    pub const GUEST: &str = "guest";

    pub const SUPER_ADMIN_ID: Uuid = uuid!("10000000-0000-0000-0000-000000000001");
    pub const ADMIN_ID: Uuid = uuid!("10000000-0000-0000-0000-000000000002");
    pub const GUEST_ID: Uuid = uuid!("10000000-0000-0000-0000-000000000003");

    /// Role given to users who sign up without an invitation.
    pub const DEFAULT: &str = GUEST;
}

/// Resolves the scopes granted to a role.
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn AuthStore>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Sorted, de-duplicated scopes for the role. A role without any
    /// permission is a misconfiguration and yields `Internal`.
    pub async fn resolve(&self, role_id: Uuid) -> Result<Vec<String>, AuthError> {
        let scopes: BTreeSet<String> = self.store.role_scopes(role_id).await?.into_iter().collect();
        if scopes.is_empty() {
            error!(%role_id, "role has no permissions");
            return Err(AuthError::Internal(format!("role {role_id} has no permissions")));
        }
        Ok(scopes.into_iter().collect())
    }

    /// Fail unless every role carries at least one permission. Run at start-up.
    pub async fn verify_all_roles(&self) -> Result<(), AuthError> {
        let bare = self.store.roles_without_permissions().await?;
        if bare.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = bare.iter().map(|r| r.name.as_str()).collect();
        Err(AuthError::Internal(format!(
            "roles without permissions: {}",
            names.join(", ")
        )))
    }
}

/// Required scopes absent from `granted`.
pub fn missing_scopes<'a>(granted: &[String], required: &[&'a str]) -> Vec<&'a str> {
    required
        .iter()
        .copied()
        .filter(|scope| !granted.iter().any(|g| g == scope))
        .collect()
}

/// Whether `granted` contains every required scope.
pub fn has_all(granted: &[String], required: &[&str]) -> bool {
    missing_scopes(granted, required).is_empty()
}
