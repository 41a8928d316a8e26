//! Invitation handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::AppJson;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    GenerateInvitationRequest, GenerateInvitationResponse, MessageResponse,
    VerifyInvitationRequest,
};
use crate::services::auth;

/// `POST /generate-invitation`: create a one-time invitation for a role.
/// Requires `create:invitation`.
pub async fn generate_invitation_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    AppJson(body): AppJson<GenerateInvitationRequest>,
) -> AppResult<(StatusCode, Json<GenerateInvitationResponse>)> {
    let resp = auth::generate_invitation(&state, user.0.user_id(), body.role_id).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

/// `POST /verify-invitation`: check an invitation token without using it.
pub async fn verify_invitation_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<VerifyInvitationRequest>,
) -> AppResult<Json<MessageResponse>> {
    let resp = auth::verify_invitation(&state, &body.token).await?;
    Ok(Json(resp))
}
