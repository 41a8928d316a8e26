//! Authentication domain models.
//!
//! These are internal domain models, distinct from the API request/response
//! bodies in `warden_api::models` (which carry `#[serde(rename)]` for camelCase).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain user joined with its role name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role_id: Uuid,
    pub role: String,
}

/// User with password hash (for internal auth flows).
#[derive(Debug, Clone)]
pub struct UserWithPassword {
    pub user: User,
    pub password_hash: String,
}

/// Fields required to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub role_id: Uuid,
}

/// Role row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
}

/// Where a sign-in came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: String,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn unknown() -> Self {
        Self {
            ip_address: "unknown".into(),
            user_agent: "unknown".into(),
        }
    }
}

/// Session row stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// If `not_after` is reached, the session expires.
    pub not_after: DateTime<Utc>,
    /// Bumped whenever a refresh token of this session is rotated.
    pub refresh_at: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// A session is active iff `not_after > now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.not_after > now
    }
}

/// Fields required to open a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub not_after: DateTime<Utc>,
    pub client: ClientInfo,
    pub now: DateTime<Utc>,
}

/// Refresh token row stored in the database. The secret itself is never
/// stored, only its SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub token_hash: String,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A refresh token row joined with its owning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenWithSession {
    pub token: RefreshTokenRecord,
    pub session: SessionRecord,
}

/// Kinds of one-time token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OneTimeTokenType {
    Invitation,
}

impl OneTimeTokenType {
    /// Database enum label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invitation => "invitation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "invitation" => Some(Self::Invitation),
            _ => None,
        }
    }
}

/// Grant carried by an invitation token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationMetadata {
    pub role_id: Uuid,
}

/// One-time token row stored in the database.
#[derive(Debug, Clone, PartialEq)]
pub struct OneTimeTokenRecord {
    pub id: Uuid,
    pub token_type: OneTimeTokenType,
    pub token_hash: String,
    pub not_after: DateTime<Utc>,
    pub revoked: bool,
    pub metadata: serde_json::Value,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl OneTimeTokenRecord {
    /// Usable iff not revoked and `not_after > now`.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.not_after > now
    }
}

/// Fields required to store a one-time token.
#[derive(Debug, Clone)]
pub struct NewOneTimeToken {
    pub token_type: OneTimeTokenType,
    pub token_hash: String,
    pub not_after: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub created_by: Option<Uuid>,
    pub now: DateTime<Utc>,
}

/// JWT claims embedded in access tokens.
///
/// Unknown fields are rejected so that a refresh token can never be decoded
/// as an access token (and vice versa).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AccessClaims {
    /// Subject: user ID.
    pub sub: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Role name (e.g. `admin`).
    pub role: String,
    /// Permission scopes snapshotted at mint time.
    pub permission: Vec<String>,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

/// JWT claims embedded in refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RefreshClaims {
    pub session_id: Uuid,
    pub email: String,
    /// Unique token id; two tokens minted for the same session in the same
    /// second must still differ.
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_time_token_labels_match_the_database_enum() {
        let label = OneTimeTokenType::Invitation.as_str();
        assert_eq!(label, "invitation");
        assert_eq!(OneTimeTokenType::parse(label), Some(OneTimeTokenType::Invitation));
        assert_eq!(OneTimeTokenType::parse("password_reset"), None);
    }
}
