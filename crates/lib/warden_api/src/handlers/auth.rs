//! Authentication request handlers.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum_extra::extract::cookie::CookieJar;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::{AppJson, ClientMeta, bearer_token};
use crate::models::{AccessTokenResponse, MessageResponse, SignInRequest, SignUpRequest};
use crate::services::auth;
use crate::services::cookies::refresh_token;

/// `POST /signup`: create a new user account.
pub async fn signup_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<SignUpRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    let resp = auth::signup(&state, body).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

/// `POST /signin`: authenticate with email + password.
pub async fn signin_handler(
    State(state): State<AppState>,
    ClientMeta(client): ClientMeta,
    jar: CookieJar,
    AppJson(body): AppJson<SignInRequest>,
) -> AppResult<(CookieJar, Json<AccessTokenResponse>)> {
    let (cookie, resp) = auth::signin(&state, body, client).await?;
    Ok((jar.add(cookie), Json(resp)))
}

/// `POST /renew-access-token`: rotate the refresh cookie and mint a new
/// access token. An expired bearer access token may accompany the call.
pub async fn renew_access_token_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<AccessTokenResponse>)> {
    let refresh = refresh_token(&jar);
    let (cookie, resp) =
        auth::renew(&state, refresh.as_deref(), bearer_token(&headers)).await?;
    Ok((jar.add(cookie), Json(resp)))
}

/// `POST /signout`: revoke the refresh cookie's token and clear the cookie.
pub async fn signout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<MessageResponse>)> {
    let refresh = refresh_token(&jar);
    let (cookie, resp) = auth::signout(&state, refresh.as_deref()).await?;
    Ok((jar.add(cookie), Json(resp)))
}
