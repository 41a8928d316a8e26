//! Profile handler.

use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::ProfileResponse;
use crate::services::auth;

/// `GET /profile`: the caller's own profile. Requires `read:profile`.
pub async fn profile_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> AppResult<Json<ProfileResponse>> {
    let resp = auth::profile(&state, user.0.user_id()).await?;
    Ok(Json(resp))
}
