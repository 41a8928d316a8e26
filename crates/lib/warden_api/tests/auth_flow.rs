//! End-to-end HTTP tests: build the router over an in-memory store and drive
//! it with `oneshot` requests.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;
use warden_api::{AppState, config::ApiConfig, router};
use warden_core::auth::permissions::roles;
use warden_core::auth::policy::AuthPolicy;
use warden_core::auth::service::Authenticator;
use warden_core::store::memory::MemoryAuthStore;

const PASSWORD: &str = "Str0ng!pass";

struct TestApp {
    app: Router,
    store: MemoryAuthStore,
}

fn test_app() -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warden_api=debug,warden_core=debug")
        .with_test_writer()
        .try_init();

    let store = MemoryAuthStore::seeded();
    let policy = AuthPolicy {
        bcrypt_cost: 4,
        ..AuthPolicy::default()
    };
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".into(),
        database_url: String::new(),
        jwt_secret: "test-secret".into(),
        secure_cookies: false,
        policy: policy.clone(),
    };
    let auth = Authenticator::new(Arc::new(store.clone()), config.jwt_secret.as_bytes(), policy)
        .expect("authenticator");
    let state = AppState {
        auth: Arc::new(auth),
        config,
    };
    TestApp {
        app: router(state),
        store,
    }
}

impl TestApp {
    async fn send(&self, req: Request<Body>) -> Response {
        self.app.clone().oneshot(req).await.expect("request")
    }

    async fn post_json(&self, uri: &str, body: Value) -> Response {
        let req = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(req).await
    }

    async fn signup(&self, email: &str) -> Response {
        self.post_json(
            "/signup",
            json!({
                "email": email,
                "password": PASSWORD,
                "firstName": "Test",
                "lastName": "User",
            }),
        )
        .await
    }

    /// Signs in and returns `(access_token, refresh_token)`.
    async fn signin(&self, email: &str) -> (String, String) {
        let resp = self
            .post_json("/signin", json!({ "email": email, "password": PASSWORD }))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let refresh = refresh_cookie(&resp).expect("refresh cookie");
        let body = json_body(resp).await;
        let access = body["accessToken"].as_str().expect("accessToken").to_string();
        (access, refresh)
    }

    async fn with_tokens(
        &self,
        method: &str,
        uri: &str,
        access: Option<&str>,
        refresh: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(access) = access {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {access}"));
        }
        if let Some(refresh) = refresh {
            builder = builder.header(header::COOKIE, format!("refreshToken={refresh}"));
        }
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        self.send(req).await
    }
}

fn refresh_cookie(resp: &Response) -> Option<String> {
    resp.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.strip_prefix("refreshToken="))
        .map(|v| v.split(';').next().unwrap_or_default().to_string())
}

async fn json_body(resp: Response) -> Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("parse JSON")
}

#[tokio::test]
async fn signup_creates_user_and_rejects_duplicates() {
    let t = test_app();

    let resp = t.signup("alice@example.com").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(json_body(resp).await["message"], "User created successfully");

    let resp = t.signup("ALICE@example.com").await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(resp).await["error"], "conflict");
}

#[tokio::test]
async fn signup_rejects_weak_password_and_malformed_json() {
    let t = test_app();

    let resp = t
        .post_json(
            "/signup",
            json!({
                "email": "weak@example.com",
                "password": "short",
                "firstName": "W",
                "lastName": "P",
            }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = Request::post("/signup")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = t.send(req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["error"], "validation_error");
}

#[tokio::test]
async fn signin_sets_http_only_cookie_and_failures_are_uniform() {
    let t = test_app();
    t.signup("bob@example.com").await;

    let resp = t
        .post_json("/signin", json!({ "email": "bob@example.com", "password": PASSWORD }))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let set_cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Strict"));
    let body = json_body(resp).await;
    assert_eq!(body["tokenType"], "Bearer");
    assert_eq!(body["expiresIn"], 300);

    let wrong_password = t
        .post_json("/signin", json!({ "email": "bob@example.com", "password": "Wr0ng!pass" }))
        .await;
    let unknown_user = t
        .post_json("/signin", json!({ "email": "nobody@example.com", "password": PASSWORD }))
        .await;
    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(wrong_password).await, json_body(unknown_user).await);
}

#[tokio::test]
async fn profile_requires_both_tokens() {
    let t = test_app();
    t.signup("carol@example.com").await;
    let (access, refresh) = t.signin("carol@example.com").await;

    let resp = t
        .with_tokens("GET", "/profile", Some(&access), Some(&refresh), None)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["email"], "carol@example.com");
    assert_eq!(body["roleName"], roles::GUEST);

    let resp = t.with_tokens("GET", "/profile", None, Some(&refresh), None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = t.with_tokens("GET", "/profile", Some(&access), None, None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = t
        .with_tokens("GET", "/profile", Some("garbage"), Some(&refresh), None)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn guest_cannot_generate_invitations() {
    let t = test_app();
    t.signup("guest@example.com").await;
    let (access, refresh) = t.signin("guest@example.com").await;

    let resp = t
        .with_tokens(
            "POST",
            "/generate-invitation",
            Some(&access),
            Some(&refresh),
            Some(json!({ "roleId": roles::ADMIN_ID })),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn renew_rotates_refresh_token_and_rejects_reuse() {
    let t = test_app();
    t.signup("dave@example.com").await;
    let (access, refresh) = t.signin("dave@example.com").await;

    let resp = t
        .with_tokens("POST", "/renew-access-token", Some(&access), Some(&refresh), None)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let rotated = refresh_cookie(&resp).expect("rotated cookie");
    assert_ne!(rotated, refresh);
    let body = json_body(resp).await;
    assert_eq!(body["message"], "Access token generated successfully");
    let new_access = body["accessToken"].as_str().unwrap().to_string();

    // The old refresh token is spent.
    let resp = t
        .with_tokens("POST", "/renew-access-token", None, Some(&refresh), None)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = t
        .with_tokens("GET", "/profile", Some(&new_access), Some(&rotated), None)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = t.with_tokens("POST", "/renew-access-token", None, None, None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = t
        .with_tokens("POST", "/renew-access-token", None, Some("not-a-jwt"), None)
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn signout_clears_cookie_and_is_not_repeatable() {
    let t = test_app();
    t.signup("erin@example.com").await;
    let (access, refresh) = t.signin("erin@example.com").await;

    let resp = t.with_tokens("POST", "/signout", None, Some(&refresh), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(refresh_cookie(&resp).as_deref(), Some(""));
    assert_eq!(json_body(resp).await["message"], "Signed out");

    let resp = t.with_tokens("POST", "/signout", None, Some(&refresh), None).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = t
        .with_tokens("GET", "/profile", Some(&access), Some(&refresh), None)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = t.with_tokens("POST", "/signout", None, None, None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invitation_grants_role_on_signup() {
    let t = test_app();
    t.signup("root@example.com").await;
    let (access, refresh) = t.signin("root@example.com").await;
    let root_id: Uuid = {
        let resp = t
            .with_tokens("GET", "/profile", Some(&access), Some(&refresh), None)
            .await;
        let body = json_body(resp).await;
        body["id"].as_str().unwrap().parse().unwrap()
    };
    t.store.assign_role(root_id, roles::SUPER_ADMIN_ID).await;

    // A new access token picks up the promoted role.
    let (access, refresh) = t.signin("root@example.com").await;
    let resp = t
        .with_tokens(
            "POST",
            "/generate-invitation",
            Some(&access),
            Some(&refresh),
            Some(json!({ "roleId": roles::ADMIN_ID })),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = json_body(resp).await;
    assert_eq!(body["message"], "One-time token created.");
    let invitation = body["token"].as_str().unwrap().to_string();

    let resp = t
        .post_json("/verify-invitation", json!({ "token": invitation }))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["message"], "Token is valid.");

    let resp = t
        .post_json(
            "/signup",
            json!({
                "email": "invited@example.com",
                "password": PASSWORD,
                "firstName": "In",
                "lastName": "Vited",
                "invitationToken": invitation,
            }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let (access, refresh) = t.signin("invited@example.com").await;
    let resp = t
        .with_tokens("GET", "/profile", Some(&access), Some(&refresh), None)
        .await;
    assert_eq!(json_body(resp).await["roleName"], roles::ADMIN);

    // Single use.
    let resp = t
        .post_json("/verify-invitation", json!({ "token": invitation }))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn generate_invitation_rejects_unknown_role() {
    let t = test_app();
    t.signup("root2@example.com").await;
    let (access, refresh) = t.signin("root2@example.com").await;
    let resp = t
        .with_tokens("GET", "/profile", Some(&access), Some(&refresh), None)
        .await;
    let id: Uuid = json_body(resp).await["id"].as_str().unwrap().parse().unwrap();
    t.store.assign_role(id, roles::SUPER_ADMIN_ID).await;
    let (access, refresh) = t.signin("root2@example.com").await;

    let resp = t
        .with_tokens(
            "POST",
            "/generate-invitation",
            Some(&access),
            Some(&refresh),
            Some(json!({ "roleId": Uuid::nil() })),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
