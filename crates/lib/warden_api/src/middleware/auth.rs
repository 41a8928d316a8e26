//! Authorization middleware: runs the gate with the bearer access token and
//! the refresh cookie, then hands the [`Admission`] to the handler.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use warden_core::auth::gate::{Admission, GateRequest};

use crate::AppState;
use crate::error::AppError;
use crate::extract::bearer_token;
use crate::services::cookies::refresh_token;

/// Middleware state: the app plus the scopes a route requires.
#[derive(Clone)]
pub struct ScopeGuard {
    state: AppState,
    required: &'static [&'static str],
}

impl ScopeGuard {
    pub fn new(state: AppState, required: &'static [&'static str]) -> Self {
        Self { state, required }
    }
}

/// The admitted caller, stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Admission);

/// Axum middleware: reads `Authorization: Bearer <token>` and the refresh
/// cookie, runs the gate, and injects [`AuthenticatedUser`] on success.
pub async fn require_scopes(
    State(guard): State<ScopeGuard>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let jar = CookieJar::from_headers(request.headers());
    let refresh = refresh_token(&jar);
    let access = bearer_token(request.headers()).map(str::to_string);

    let admission = guard
        .state
        .auth
        .gate()
        .admit(
            GateRequest {
                access_token: access.as_deref(),
                refresh_token: refresh.as_deref(),
                required: guard.required,
            },
            Utc::now(),
        )
        .await?;

    request.extensions_mut().insert(AuthenticatedUser(admission));
    Ok(next.run(request).await)
}
