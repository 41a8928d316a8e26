//! Warden API server binary.
//!
//! Connects to PostgreSQL, applies migrations, checks the role catalogue and
//! serves the auth routes until interrupted.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use warden_api::config::ApiConfig;
use warden_core::auth::service::Authenticator;
use warden_core::store::postgres::PgAuthStore;

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "warden_api_server", about = "Warden authentication API server")]
struct Args {
    /// Interface to bind.
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 = ephemeral).
    #[arg(long, env = "PORT", default_value_t = 3100)]
    port: u16,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/warden"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Drop the `Secure` attribute from the refresh cookie (plain-http development).
    #[arg(long, default_value_t = false)]
    insecure_cookies: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new("info,warden_api=debug,warden_core=debug")
                }),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env(format!("{}:{}", args.host, args.port), args.database_url)?;
    if args.insecure_cookies {
        config.secure_cookies = false;
    }

    info!(
        port = args.port,
        max_connections = args.max_connections,
        session_mode = ?config.policy.session_mode,
        "starting warden_api_server"
    );

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&config.database_url)
        .await?;

    info!("running database migrations");
    warden_api::migrate(&pool).await?;

    let auth = Authenticator::new(
        Arc::new(PgAuthStore::new(pool)),
        config.jwt_secret.as_bytes(),
        config.policy.clone(),
    )?;

    // A role without permissions would lock its users out of every route.
    if let Err(e) = auth.verify_roles().await {
        error!(error = %e, "role catalogue is incomplete");
        return Err(e.into());
    }

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let local_addr = listener.local_addr()?;

    let state = warden_api::AppState {
        auth: Arc::new(auth),
        config,
    };
    let app = warden_api::router(state);

    info!(addr = %local_addr, "REST API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
