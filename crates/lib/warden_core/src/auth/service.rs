//! The auth flows, wired from the components of this module.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::credentials::CredentialVerifier;
use super::gate::AuthorizationGate;
use super::invitations::{CreatedInvitation, InvitationService};
use super::issuer::{IssuedTokens, Rotation, TokenIssuer};
use super::jwt::JwtKeys;
use super::password::{PasswordHasher, check_password_strength};
use super::permissions::{PermissionResolver, roles};
use super::policy::AuthPolicy;
use super::sessions::{SessionManager, SignedOut};
use super::validator::TokenValidator;
use super::AuthError;
use crate::models::auth::{ClientInfo, InvitationMetadata, NewUser, SessionRecord, User};
use crate::store::{AuthStore, StoreError};

/// Sign-up input. The email is normalized before use.
#[derive(Debug, Clone)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub invitation_token: Option<String>,
}

/// Successful sign-in.
#[derive(Debug, Clone)]
pub struct SignIn {
    pub user: User,
    pub session: SessionRecord,
    /// False when an active session was reused.
    pub session_created: bool,
    pub tokens: IssuedTokens,
}

/// Entry point for every auth flow.
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn AuthStore>,
    hasher: PasswordHasher,
    credentials: CredentialVerifier,
    permissions: PermissionResolver,
    validator: TokenValidator,
    issuer: TokenIssuer,
    sessions: SessionManager,
    gate: AuthorizationGate,
    invitations: InvitationService,
}

impl Authenticator {
    /// Build the components. Costs one bcrypt round for the dummy hash.
    pub fn new(store: Arc<dyn AuthStore>, secret: &[u8], policy: AuthPolicy) -> Result<Self, AuthError> {
        let keys = JwtKeys::from_secret(secret);
        let hasher = PasswordHasher::new(policy.bcrypt_cost)?;
        let credentials = CredentialVerifier::new(store.clone(), hasher.clone());
        let permissions = PermissionResolver::new(store.clone());
        let validator = TokenValidator::new(keys.clone(), store.clone());
        let issuer = TokenIssuer::new(
            keys,
            store.clone(),
            validator.clone(),
            permissions.clone(),
            policy.clone(),
        );
        let sessions = SessionManager::new(store.clone(), validator.clone(), policy.clone());
        let gate = AuthorizationGate::new(
            validator.clone(),
            permissions.clone(),
            store.clone(),
            policy.fresh_permissions,
        );
        let invitations = InvitationService::new(store.clone(), policy.invitation_ttl);

        Ok(Self {
            store,
            hasher,
            credentials,
            permissions,
            validator,
            issuer,
            sessions,
            gate,
            invitations,
        })
    }

    pub fn gate(&self) -> &AuthorizationGate {
        &self.gate
    }

    #[cfg(test)]
    pub(crate) fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    #[cfg(test)]
    pub(crate) fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Refuse to run with a role that grants nothing.
    pub async fn verify_roles(&self) -> Result<(), AuthError> {
        self.permissions.verify_all_roles().await
    }

    /// Register a user. With an invitation the invitation is consumed and its
    /// role assigned in the same transaction as the insert; otherwise the
    /// user gets the default role.
    pub async fn sign_up(&self, input: SignUp, now: DateTime<Utc>) -> Result<User, AuthError> {
        let email = normalize_email(&input.email);
        validate_email(&email)?;
        check_password_strength(&input.password)?;
        let first_name = input.first_name.trim().to_string();
        let last_name = input.last_name.trim().to_string();
        if first_name.is_empty() || last_name.is_empty() {
            return Err(AuthError::Validation(
                "First name and last name are required".into(),
            ));
        }

        let default_role = self
            .store
            .find_role_by_name(roles::DEFAULT)
            .await?
            .ok_or_else(|| AuthError::Internal(format!("default role {} missing", roles::DEFAULT)))?;
        let password_hash = self.hasher.hash(input.password).await?;

        let mut tx = self.store.begin().await?;
        if tx.email_exists(&email).await? {
            return Err(AuthError::Conflict("Email already registered".into()));
        }
        let role_id = match input.invitation_token.as_deref() {
            Some(token) => {
                let InvitationMetadata { role_id } =
                    self.invitations.consume(tx.as_mut(), token, now).await?;
                role_id
            }
            None => default_role.id,
        };
        let user_id = tx
            .insert_user(
                NewUser {
                    email: email.clone(),
                    first_name,
                    last_name,
                    password_hash,
                    role_id,
                },
                now,
            )
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(_) => {
                    AuthError::Conflict("Email already registered".into())
                }
                StoreError::ForeignKeyViolation(_) => {
                    AuthError::Validation("Invitation grants an unknown role".into())
                }
                other => AuthError::Store(other),
            })?;
        tx.commit().await?;

        info!(%user_id, %role_id, invited = input.invitation_token.is_some(), "user signed up");
        self.store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::Internal(format!("user {user_id} vanished after sign-up")))
    }

    /// Verify credentials, then pick a session and issue a token pair in one
    /// transaction.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        client: ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<SignIn, AuthError> {
        let email = normalize_email(email);
        let user = self.credentials.verify(&email, password).await?;
        let permission = self.permissions.resolve(user.role_id).await?;

        let mut tx = self.store.begin().await?;
        let outcome = self.sessions.open(tx.as_mut(), user.id, client, now).await?;
        let tokens = self
            .issuer
            .issue(tx.as_mut(), outcome.session(), &user, permission, now)
            .await?;
        tx.commit().await?;

        let session_created = outcome.is_new();
        let session = outcome.into_session();
        info!(user_id = %user.id, session_id = %session.id, session_created, "user signed in");
        Ok(SignIn {
            user,
            session,
            session_created,
            tokens,
        })
    }

    /// Rotate the refresh token and mint a new access token.
    ///
    /// A malformed refresh token, or an access token that is malformed or
    /// belongs to someone else, is `Forbidden`. Expired or revoked refresh
    /// tokens keep their own errors.
    pub async fn renew(
        &self,
        refresh_token: Option<&str>,
        access_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Rotation, AuthError> {
        let refresh_token = refresh_token.ok_or(AuthError::MissingToken)?;
        let claims = self
            .validator
            .verify_refresh_structure(refresh_token)
            .map_err(forbid_malformed)?;

        if let Some(access_token) = access_token {
            let access = self
                .validator
                .verify_access_signature(access_token)
                .map_err(forbid_malformed)?;
            if access.email != claims.email {
                warn!(session_id = %claims.session_id, "access and refresh token identities differ");
                return Err(AuthError::Forbidden("Token mismatch".into()));
            }
        }

        self.issuer.rotate(refresh_token, now).await
    }

    pub async fn sign_out(&self, refresh_token: Option<&str>, now: DateTime<Utc>) -> Result<SignedOut, AuthError> {
        let refresh_token = refresh_token.ok_or(AuthError::MissingToken)?;
        self.sessions.sign_out(refresh_token, now).await
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User not found".into()))
    }

    pub async fn create_invitation(
        &self,
        created_by: Uuid,
        role_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CreatedInvitation, AuthError> {
        self.invitations.create(created_by, role_id, now).await
    }

    pub async fn verify_invitation(&self, token: &str, now: DateTime<Utc>) -> Result<InvitationMetadata, AuthError> {
        self.invitations.verify(token, now).await
    }
}

fn forbid_malformed(e: AuthError) -> AuthError {
    match e {
        AuthError::InvalidToken => AuthError::Forbidden("Invalid token".into()),
        other => other,
    }
}

/// Emails are compared case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Minimal syntax check: one `@`, a non-empty local part, and a dotted domain.
pub fn validate_email(email: &str) -> Result<(), AuthError> {
    let invalid = || AuthError::Validation("Invalid email address".into());
    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(invalid());
    }
    Ok(())
}
