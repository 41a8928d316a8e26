//! Invitation tokens: one-time, hashed, expiring grants of a role.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;
use uuid::Uuid;

use super::{AuthError, deadline, generate_token, hash_token};
use crate::models::auth::{
    InvitationMetadata, NewOneTimeToken, OneTimeTokenRecord, OneTimeTokenType,
};
use crate::store::{AuthStore, AuthTx};

const INVALID_INVITATION: &str = "Invalid or expired invitation token";

/// A newly created invitation. `token` is the only copy of the plaintext.
#[derive(Debug, Clone)]
pub struct CreatedInvitation {
    pub token: String,
    pub record: OneTimeTokenRecord,
}

#[derive(Clone)]
pub struct InvitationService {
    store: Arc<dyn AuthStore>,
    ttl: Duration,
}

impl InvitationService {
    pub fn new(store: Arc<dyn AuthStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Create an invitation granting `role_id`. Unknown roles are rejected.
    pub async fn create(
        &self,
        created_by: Uuid,
        role_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CreatedInvitation, AuthError> {
        if self.store.find_role(role_id).await?.is_none() {
            return Err(AuthError::Validation("Invalid role".into()));
        }

        let token = generate_token();
        let metadata = serde_json::to_value(InvitationMetadata { role_id })
            .map_err(|e| AuthError::Internal(format!("invitation metadata: {e}")))?;
        let record = self
            .store
            .insert_one_time_token(NewOneTimeToken {
                token_type: OneTimeTokenType::Invitation,
                token_hash: hash_token(&token),
                not_after: deadline(now, self.ttl)?,
                metadata,
                created_by: Some(created_by),
                now,
            })
            .await?;

        info!(%created_by, %role_id, invitation_id = %record.id, "invitation created");
        Ok(CreatedInvitation { token, record })
    }

    /// Check an invitation without consuming it.
    pub async fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<InvitationMetadata, AuthError> {
        let record = self
            .store
            .find_one_time_token(&hash_token(token), OneTimeTokenType::Invitation)
            .await?
            .filter(|r| r.is_usable(now))
            .ok_or_else(|| AuthError::Validation(INVALID_INVITATION.into()))?;
        parse_metadata(&record)
    }

    /// Revoke the invitation inside the caller's transaction and return its
    /// grant. A token can be consumed once.
    pub async fn consume(
        &self,
        tx: &mut dyn AuthTx,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<InvitationMetadata, AuthError> {
        let record = tx
            .consume_one_time_token(&hash_token(token), OneTimeTokenType::Invitation, now)
            .await?
            .ok_or_else(|| AuthError::Validation(INVALID_INVITATION.into()))?;
        parse_metadata(&record)
    }
}

fn parse_metadata(record: &OneTimeTokenRecord) -> Result<InvitationMetadata, AuthError> {
    serde_json::from_value(record.metadata.clone())
        .map_err(|e| AuthError::Internal(format!("invitation {} metadata: {e}", record.id)))
}
