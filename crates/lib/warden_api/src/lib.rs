//! # warden_api
//!
//! HTTP API library for Warden.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use warden_core::auth::permissions::scopes;
use warden_core::auth::service::Authenticator;

use crate::config::ApiConfig;
use crate::handlers::{auth, invitations, profile};
use crate::middleware::auth::{ScopeGuard, require_scopes};

/// Route paths.
pub mod routes {
    pub const POST_SIGNUP: &str = "/signup";
    pub const POST_SIGNIN: &str = "/signin";
    pub const POST_SIGNOUT: &str = "/signout";
    pub const POST_RENEW_ACCESS_TOKEN: &str = "/renew-access-token";
    pub const GET_PROFILE: &str = "/profile";
    pub const POST_GENERATE_INVITATION: &str = "/generate-invitation";
    pub const POST_VERIFY_INVITATION: &str = "/verify-invitation";
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Auth flows over the configured store.
    pub auth: Arc<Authenticator>,
    /// API configuration.
    pub config: ApiConfig,
}

/// Run embedded database migrations.
///
/// Delegates to `warden_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    warden_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::POST_SIGNUP, post(auth::signup_handler))
        .route(routes::POST_SIGNIN, post(auth::signin_handler))
        .route(routes::POST_SIGNOUT, post(auth::signout_handler))
        .route(
            routes::POST_RENEW_ACCESS_TOKEN,
            post(auth::renew_access_token_handler),
        )
        .route(
            routes::POST_VERIFY_INVITATION,
            post(invitations::verify_invitation_handler),
        );

    // Protected routes, each behind the gate with its own scopes
    let profile_routes = Router::new()
        .route(routes::GET_PROFILE, get(profile::profile_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            ScopeGuard::new(state.clone(), &[scopes::READ_PROFILE]),
            require_scopes,
        ));

    let invitation_routes = Router::new()
        .route(
            routes::POST_GENERATE_INVITATION,
            post(invitations::generate_invitation_handler),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            ScopeGuard::new(state.clone(), &[scopes::CREATE_INVITATION]),
            require_scopes,
        ));

    Router::new()
        .merge(public)
        .merge(profile_routes)
        .merge(invitation_routes)
        .layer(cors)
        .with_state(state)
}
