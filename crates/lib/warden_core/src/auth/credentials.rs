//! Email + password verification.

use std::sync::Arc;

use tracing::debug;

use super::AuthError;
use super::password::PasswordHasher;
use crate::models::auth::User;
use crate::store::AuthStore;

/// Checks an email/password pair against the stored identity.
///
/// Unknown emails still pay for one bcrypt comparison, so both failure modes
/// look the same from outside: same error, roughly the same latency.
#[derive(Clone)]
pub struct CredentialVerifier {
    store: Arc<dyn AuthStore>,
    hasher: PasswordHasher,
}

impl CredentialVerifier {
    pub fn new(store: Arc<dyn AuthStore>, hasher: PasswordHasher) -> Self {
        Self { store, hasher }
    }

    /// Returns the verified user or [`AuthError::InvalidCredentials`].
    pub async fn verify(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let found = self.store.find_user_by_email(email).await?;
        let (user, stored_hash) = match found {
            Some(row) => (Some(row.user), Some(row.password_hash)),
            None => (None, None),
        };

        let matches = self
            .hasher
            .verify_or_burn(password.to_string(), stored_hash)
            .await?;

        match user {
            Some(user) if matches => Ok(user),
            _ => {
                debug!("credential check failed");
                Err(AuthError::InvalidCredentials)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password;
    use crate::auth::permissions::roles;
    use crate::models::auth::NewUser;
    use crate::store::MemoryAuthStore;

    async fn store_with_user(email: &str, password: &str) -> MemoryAuthStore {
        let store = MemoryAuthStore::seeded();
        let mut tx = store.begin().await.unwrap();
        tx.insert_user(
            NewUser {
                email: email.into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                password_hash: hash_password(password, 4).unwrap(),
                role_id: roles::GUEST_ID,
            },
            chrono::Utc::now(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        store
    }

    fn verifier(store: &MemoryAuthStore) -> CredentialVerifier {
        CredentialVerifier::new(Arc::new(store.clone()), PasswordHasher::new(4).unwrap())
    }

    #[tokio::test]
    async fn accepts_correct_password() {
        let store = store_with_user("ada@example.com", "Str0ng!pass").await;
        let user = verifier(&store)
            .verify("ada@example.com", "Str0ng!pass")
            .await
            .unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.role, roles::GUEST);
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_are_indistinguishable() {
        let store = store_with_user("ada@example.com", "Str0ng!pass").await;
        let v = verifier(&store);

        let wrong = v.verify("ada@example.com", "nope").await.unwrap_err();
        let unknown = v.verify("bob@example.com", "Str0ng!pass").await.unwrap_err();

        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }
}
