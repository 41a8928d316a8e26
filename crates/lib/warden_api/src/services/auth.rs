//! Authentication service: sign-up/sign-in/renew/sign-out flows delegating to
//! `warden_core::auth`, shaped into API bodies and cookies.

use axum_extra::extract::cookie::Cookie;
use chrono::Utc;
use uuid::Uuid;
use warden_core::auth::issuer::IssuedTokens;
use warden_core::auth::service::SignUp;
use warden_core::models::auth::ClientInfo;

use crate::AppState;
use crate::error::AppResult;
use crate::models::{
    AccessTokenResponse, GenerateInvitationResponse, MessageResponse, ProfileResponse,
    SignInRequest, SignUpRequest,
};
use crate::services::cookies::{clear_refresh_cookie, refresh_cookie};

/// Access token body plus the refresh cookie to set alongside it.
fn token_response(
    state: &AppState,
    tokens: &IssuedTokens,
    message: &str,
) -> (Cookie<'static>, AccessTokenResponse) {
    let now = Utc::now();
    let cookie = refresh_cookie(
        &tokens.refresh_token,
        tokens.refresh_max_age(now),
        state.config.secure_cookies,
    );
    let body = AccessTokenResponse {
        message: message.to_string(),
        access_token: tokens.access_token.clone(),
        token_type: "Bearer".to_string(),
        expires_in: tokens.access_claims.exp - tokens.access_claims.iat,
    };
    (cookie, body)
}

/// Register a new account.
pub async fn signup(state: &AppState, body: SignUpRequest) -> AppResult<MessageResponse> {
    state
        .auth
        .sign_up(
            SignUp {
                email: body.email,
                password: body.password,
                first_name: body.first_name,
                last_name: body.last_name,
                invitation_token: body.invitation_token.filter(|t| !t.is_empty()),
            },
            Utc::now(),
        )
        .await?;
    Ok(MessageResponse::new("User created successfully"))
}

/// Authenticate with email + password.
pub async fn signin(
    state: &AppState,
    body: SignInRequest,
    client: ClientInfo,
) -> AppResult<(Cookie<'static>, AccessTokenResponse)> {
    let signed_in = state
        .auth
        .sign_in(&body.email, &body.password, client, Utc::now())
        .await?;
    Ok(token_response(state, &signed_in.tokens, "User signed in successfully"))
}

/// Rotate the refresh token and mint a new access token.
pub async fn renew(
    state: &AppState,
    refresh_token: Option<&str>,
    access_token: Option<&str>,
) -> AppResult<(Cookie<'static>, AccessTokenResponse)> {
    let rotation = state
        .auth
        .renew(refresh_token, access_token, Utc::now())
        .await?;
    Ok(token_response(
        state,
        &rotation.tokens,
        "Access token generated successfully",
    ))
}

/// Revoke the presented refresh token; returns the clearing cookie.
pub async fn signout(
    state: &AppState,
    refresh_token: Option<&str>,
) -> AppResult<(Cookie<'static>, MessageResponse)> {
    state.auth.sign_out(refresh_token, Utc::now()).await?;
    Ok((
        clear_refresh_cookie(state.config.secure_cookies),
        MessageResponse::new("Signed out"),
    ))
}

pub async fn profile(state: &AppState, user_id: Uuid) -> AppResult<ProfileResponse> {
    let user = state.auth.profile(user_id).await?;
    Ok(user.into())
}

pub async fn generate_invitation(
    state: &AppState,
    created_by: Uuid,
    role_id: Uuid,
) -> AppResult<GenerateInvitationResponse> {
    let created = state
        .auth
        .create_invitation(created_by, role_id, Utc::now())
        .await?;
    Ok(GenerateInvitationResponse {
        message: "One-time token created.".into(),
        token: created.token,
        expires_at: created.record.not_after.to_rfc3339(),
    })
}

pub async fn verify_invitation(state: &AppState, token: &str) -> AppResult<MessageResponse> {
    state.auth.verify_invitation(token, Utc::now()).await?;
    Ok(MessageResponse::new("Token is valid."))
}
