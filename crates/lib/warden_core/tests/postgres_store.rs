//! Integration test against a real PostgreSQL.
//!
//! Run with `DATABASE_URL=postgres://... cargo test -p warden_core -- --ignored`.
//! Every run uses a fresh random email so it can share a database with others.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use warden_core::auth::AuthError;
use warden_core::auth::permissions::{roles, scopes};
use warden_core::auth::policy::AuthPolicy;
use warden_core::auth::service::{Authenticator, SignUp};
use warden_core::models::auth::ClientInfo;
use warden_core::store::{AuthStore, PgAuthStore};

const PASSWORD: &str = "Str0ng!pass";

async fn authenticator() -> Option<(Authenticator, PgAuthStore)> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to DATABASE_URL");
    warden_core::migrate::migrate(&pool).await.expect("migrate");

    let store = PgAuthStore::new(pool);
    let policy = AuthPolicy {
        bcrypt_cost: 4,
        ..AuthPolicy::default()
    };
    let shared: Arc<dyn AuthStore> = Arc::new(store.clone());
    let auth = Authenticator::new(shared, b"integration-secret", policy).expect("authenticator");
    Some((auth, store))
}

fn unique_email() -> String {
    format!("it-{}@example.com", warden_core::uuid::uuidv7().simple())
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn full_lifecycle_against_postgres() {
    let Some((auth, store)) = authenticator().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    auth.verify_roles().await.expect("seeded roles carry permissions");

    let email = unique_email();
    let now = Utc::now();
    let user = auth
        .sign_up(
            SignUp {
                email: email.clone(),
                password: PASSWORD.into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                invitation_token: None,
            },
            now,
        )
        .await
        .expect("sign up");
    assert_eq!(user.role_id, roles::GUEST_ID);

    let first = auth
        .sign_in(&email, PASSWORD, ClientInfo::unknown(), now)
        .await
        .expect("sign in");
    let second = auth
        .sign_in(&email, PASSWORD, ClientInfo::unknown(), now)
        .await
        .expect("second sign in");
    assert_eq!(first.session.id, second.session.id);
    assert_eq!(
        first.tokens.access_claims.permission,
        vec![scopes::READ_PROFILE.to_string()]
    );

    let stored = store
        .find_refresh_token(&warden_core::auth::hash_token(&first.tokens.refresh_token))
        .await
        .expect("lookup")
        .expect("row exists");
    assert!(!stored.token.revoked);

    let rotated = auth
        .renew(Some(first.tokens.refresh_token.as_str()), None, now)
        .await
        .expect("rotate");
    assert!(matches!(
        auth.renew(Some(first.tokens.refresh_token.as_str()), None, now)
            .await,
        Err(AuthError::Revoked)
    ));

    auth.sign_out(Some(rotated.tokens.refresh_token.as_str()), now)
        .await
        .expect("sign out");
    assert!(matches!(
        auth.sign_out(Some(rotated.tokens.refresh_token.as_str()), now)
            .await,
        Err(AuthError::NotFound(_))
    ));
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn invitation_is_single_use_against_postgres() {
    let Some((auth, _store)) = authenticator().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let now = Utc::now();
    let inviter = auth
        .sign_up(
            SignUp {
                email: unique_email(),
                password: PASSWORD.into(),
                first_name: "Root".into(),
                last_name: "User".into(),
                invitation_token: None,
            },
            now,
        )
        .await
        .expect("inviter");

    let invitation = auth
        .create_invitation(inviter.id, roles::ADMIN_ID, now)
        .await
        .expect("invitation");
    assert!(invitation.record.not_after > now + Duration::days(6));
    auth.verify_invitation(&invitation.token, now)
        .await
        .expect("valid");

    let invited = auth
        .sign_up(
            SignUp {
                email: unique_email(),
                password: PASSWORD.into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                invitation_token: Some(invitation.token.clone()),
            },
            now,
        )
        .await
        .expect("invited sign up");
    assert_eq!(invited.role_id, roles::ADMIN_ID);

    assert!(matches!(
        auth.verify_invitation(&invitation.token, now).await,
        Err(AuthError::Validation(_))
    ));
}
