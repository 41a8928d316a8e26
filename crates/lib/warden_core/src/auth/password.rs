//! Password hashing via bcrypt, plus the sign-up password rules.
//!
//! bcrypt is CPU bound, so the async entry points hop onto the blocking pool.

use std::sync::Arc;

use super::AuthError;

/// Plaintext hashed once at start-up; unknown-email sign-ins verify against it
/// so they cost the same as a wrong password for a real account.
const DUMMY_PASSWORD: &str = "warden-timing-equalizer";

/// Characters counted as "special" by the password rules.
const SPECIAL_CHARS: &str = "!@#$%^&*";

/// Minimum password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Hash a password with bcrypt.
pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(password, cost).map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(password, hash).map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
}

/// bcrypt with a fixed cost and a pre-computed dummy hash of the same cost.
#[derive(Clone, Debug)]
pub struct PasswordHasher {
    cost: u32,
    dummy_hash: Arc<str>,
}

impl PasswordHasher {
    /// Computes the dummy hash, so this costs one bcrypt round.
    pub fn new(cost: u32) -> Result<Self, AuthError> {
        let dummy_hash = hash_password(DUMMY_PASSWORD, cost)?;
        Ok(Self {
            cost,
            dummy_hash: dummy_hash.into(),
        })
    }

    /// Hash on the blocking pool.
    pub async fn hash(&self, password: String) -> Result<String, AuthError> {
        let cost = self.cost;
        tokio::task::spawn_blocking(move || hash_password(&password, cost))
            .await
            .map_err(|e| AuthError::Internal(format!("bcrypt task: {e}")))?
    }

    /// Verify on the blocking pool. With no stored hash the password is
    /// compared against the dummy hash and the result is always `false`.
    pub async fn verify_or_burn(
        &self,
        password: String,
        stored_hash: Option<String>,
    ) -> Result<bool, AuthError> {
        let dummy = self.dummy_hash.clone();
        tokio::task::spawn_blocking(move || match stored_hash {
            Some(hash) => verify_password(&password, &hash),
            None => {
                let _ = bcrypt::verify(&password, &dummy);
                Ok(false)
            }
        })
        .await
        .map_err(|e| AuthError::Internal(format!("bcrypt task: {e}")))?
    }
}

/// Sign-up password rules: at least [`MIN_PASSWORD_LEN`] characters and at
/// least three of lowercase, uppercase, digit, special (`!@#$%^&*`).
pub fn check_password_strength(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(
            "Password must be at least 8 characters long".into(),
        ));
    }
    let classes = [
        password.chars().any(|c| c.is_ascii_lowercase()),
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| SPECIAL_CHARS.contains(c)),
    ];
    if classes.iter().filter(|&&present| present).count() < 3 {
        return Err(AuthError::Validation(
            "Password must include at least 3 of the following: lowercase, uppercase, number, special character (!@#$%^&*)".into(),
        ));
    }
    Ok(())
}
