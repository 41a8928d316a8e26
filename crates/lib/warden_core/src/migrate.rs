//! Database migration support.
//!
//! Embeds and runs SQL migrations from `warden_core/migrations/`, which
//! create the `auth` schema and seed the default roles and permissions.

use sqlx::PgPool;

/// Run all embedded database migrations against the given pool.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
