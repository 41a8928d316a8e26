//! API server configuration.

use warden_core::auth::jwt::resolve_jwt_secret;
use warden_core::auth::policy::{AuthPolicy, PolicyError, parse_bool};

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// JWT signing secret.
    pub jwt_secret: String,
    /// Set the `Secure` attribute on the refresh cookie. Off only for local http.
    pub secure_cookies: bool,
    /// Token lifetimes and session rules.
    pub policy: AuthPolicy,
}

impl ApiConfig {
    /// Builds the configuration around the listener address and database URL,
    /// which the server binary takes from its command line. The rest comes
    /// from environment variables.
    ///
    /// | Variable                     | Default                       |
    /// |------------------------------|-------------------------------|
    /// | `JWT_SECRET` / `AUTH_SECRET` | generated & persisted to file |
    /// | `WARDEN_SECURE_COOKIES`      | `true`                        |
    /// | `WARDEN_*` policy variables  | see [`AuthPolicy::from_env`]  |
    pub fn from_env(bind_addr: String, database_url: String) -> Result<Self, PolicyError> {
        Ok(Self {
            bind_addr,
            database_url,
            jwt_secret: resolve_jwt_secret(),
            secure_cookies: secure_cookies(|key| std::env::var(key).ok())?,
            policy: AuthPolicy::from_env()?,
        })
    }
}

fn secure_cookies(lookup: impl Fn(&str) -> Option<String>) -> Result<bool, PolicyError> {
    match lookup("WARDEN_SECURE_COOKIES") {
        Some(v) => parse_bool("WARDEN_SECURE_COOKIES", &v),
        None => Ok(true),
    }
}
