//! Per-request authorization.
//!
//! A request walks `NoToken → AccessChecked → RefreshChecked →
//! PermissionChecked → Admitted`; any failed step ends the walk with a
//! [`GateDenial`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use super::AuthError;
use super::permissions::{PermissionResolver, has_all, missing_scopes};
use super::validator::TokenValidator;
use crate::models::auth::AccessClaims;
use crate::store::AuthStore;

/// Last stage a denied request had passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStage {
    NoToken,
    AccessChecked,
    RefreshChecked,
}

/// Why a request was turned away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateDenial {
    #[error("Access token required")]
    MissingAccessToken,

    #[error("Invalid access token")]
    InvalidAccessToken,

    #[error("Access token expired")]
    AccessTokenExpired,

    #[error("Refresh token required")]
    MissingRefreshToken,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Session revoked, please log in again")]
    SessionRevoked,

    #[error("Session expired, please log in again")]
    SessionExpired,

    #[error("Access and refresh tokens belong to different users")]
    IdentityMismatch,

    #[error("Missing required permission: {}", .missing.join(", "))]
    InsufficientScope { missing: Vec<String> },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GateDenial {
    /// The stage the request had reached when it was denied.
    pub fn stage(&self) -> GateStage {
        match self {
            Self::MissingAccessToken | Self::InvalidAccessToken | Self::AccessTokenExpired => {
                GateStage::NoToken
            }
            Self::MissingRefreshToken
            | Self::InvalidRefreshToken
            | Self::SessionRevoked
            | Self::SessionExpired
            | Self::IdentityMismatch => GateStage::AccessChecked,
            Self::InsufficientScope { .. } | Self::Internal(_) => GateStage::RefreshChecked,
        }
    }

    /// 401-class denials: the client should renew or sign in again.
    /// Everything else except `Internal` is 403-class.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            Self::MissingAccessToken
                | Self::InvalidAccessToken
                | Self::AccessTokenExpired
                | Self::MissingRefreshToken
                | Self::SessionRevoked
                | Self::SessionExpired
        )
    }
}

/// Credentials and requirements of one request.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub access_token: Option<&'a str>,
    pub refresh_token: Option<&'a str>,
    pub required: &'a [&'a str],
}

/// An admitted request's identity. Lives only as long as the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub claims: AccessClaims,
    pub session_id: Uuid,
    /// Scopes the decision was made on: the token snapshot, or the freshly
    /// resolved set when that policy is on.
    pub scopes: Vec<String>,
}

impl Admission {
    pub fn user_id(&self) -> Uuid {
        self.claims.sub
    }
}

#[derive(Clone)]
pub struct AuthorizationGate {
    validator: TokenValidator,
    permissions: PermissionResolver,
    store: Arc<dyn AuthStore>,
    fresh_permissions: bool,
}

impl AuthorizationGate {
    pub fn new(
        validator: TokenValidator,
        permissions: PermissionResolver,
        store: Arc<dyn AuthStore>,
        fresh_permissions: bool,
    ) -> Self {
        Self {
            validator,
            permissions,
            store,
            fresh_permissions,
        }
    }

    pub async fn admit(
        &self,
        request: GateRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<Admission, GateDenial> {
        let result = self.walk(request, now).await;
        if let Err(denial) = &result {
            match denial {
                GateDenial::Internal(msg) => error!(error = %msg, "gate failed"),
                other => debug!(stage = ?other.stage(), reason = %other, "request denied"),
            }
        }
        result
    }

    async fn walk(&self, request: GateRequest<'_>, now: DateTime<Utc>) -> Result<Admission, GateDenial> {
        // NoToken → AccessChecked
        let access = request.access_token.ok_or(GateDenial::MissingAccessToken)?;
        let claims = self
            .validator
            .verify_access(access)
            .map_err(|e| match e {
                AuthError::TokenExpired => GateDenial::AccessTokenExpired,
                _ => GateDenial::InvalidAccessToken,
            })?;

        // AccessChecked → RefreshChecked
        let refresh = request.refresh_token.ok_or(GateDenial::MissingRefreshToken)?;
        let validated = self
            .validator
            .validate_refresh(refresh, now)
            .await
            .map_err(|e| match e {
                AuthError::InvalidToken => GateDenial::InvalidRefreshToken,
                AuthError::TokenExpired | AuthError::SessionExpired => GateDenial::SessionExpired,
                AuthError::Revoked => GateDenial::SessionRevoked,
                other => GateDenial::Internal(other.to_string()),
            })?;
        if validated.claims.email != claims.email || validated.session.user_id != claims.sub {
            return Err(GateDenial::IdentityMismatch);
        }

        // RefreshChecked → PermissionChecked
        let scopes = if self.fresh_permissions {
            self.current_scopes(claims.sub).await?
        } else {
            claims.permission.clone()
        };
        if !has_all(&scopes, request.required) {
            return Err(GateDenial::InsufficientScope {
                missing: missing_scopes(&scopes, request.required)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            });
        }

        // PermissionChecked → Admitted
        Ok(Admission {
            claims,
            session_id: validated.session.id,
            scopes,
        })
    }

    async fn current_scopes(&self, user_id: Uuid) -> Result<Vec<String>, GateDenial> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await
            .map_err(|e| GateDenial::Internal(e.to_string()))?
            .ok_or(GateDenial::SessionRevoked)?;
        self.permissions
            .resolve(user.role_id)
            .await
            .map_err(|e| GateDenial::Internal(e.to_string()))
    }
}
