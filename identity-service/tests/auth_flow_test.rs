mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{create_test_config, TestApp, MAX_FAILED_LOGINS, TEST_PASSWORD};
use identity_service::services::CredentialStore;
use serde_json::json;

#[tokio::test]
async fn test_register_creates_tenant_and_signs_owner_in() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;

    let (status, me) = app.get("/me", &owner.access_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "owner@acme.io");
    assert_eq!(me["roles"], json!(["owner"]));
    let permissions = me["permissions"].as_array().unwrap();
    assert!(permissions.contains(&json!("users:*")));
    assert!(permissions.contains(&json!("audit_logs:*")));

    let (status, tenant) = app.get("/tenant", &owner.access_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tenant["slug"], "acme");
    assert_eq!(tenant["status"], "pending_verification");
}

#[tokio::test]
async fn test_register_rejects_taken_slug_and_bad_input() {
    let app = TestApp::spawn().await;
    app.register_tenant("acme").await;

    let (status, _) = app
        .post(
            "/auth/register",
            None,
            json!({
                "tenant_name": "Other",
                "tenant_slug": "acme",
                "email": "someone@else.io",
                "password": TEST_PASSWORD,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .post(
            "/auth/register",
            None,
            json!({
                "tenant_name": "Bad Slug",
                "tenant_slug": "Bad_Slug",
                "email": "a@b.io",
                "password": TEST_PASSWORD,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .post(
            "/auth/register",
            None,
            json!({
                "tenant_name": "Weak",
                "tenant_slug": "weak-pass",
                "email": "a@b.io",
                "password": "short",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_with_wrong_credentials() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;

    let (status, _) = app.login("acme", &owner.email, "wrong-password").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.login("acme", "nobody@acme.io", TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.login("no-such-tenant", &owner.email, TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.login("acme", &owner.email, TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mfa_required"], false);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 900);
}

#[tokio::test]
async fn test_repeated_failures_lock_the_account() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;

    for _ in 0..MAX_FAILED_LOGINS {
        let (status, _) = app.login("acme", &owner.email, "wrong-password").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // Correct password is refused while locked
    let (status, body) = app.login("acme", &owner.email, TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("locked"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_failures_still_lock_the_account() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let app = app.clone();
            let email = owner.email.clone();
            tokio::spawn(async move { app.login("acme", &email, "wrong-password").await.0 })
        })
        .collect();
    for attempt in attempts {
        let status = attempt.await.unwrap();
        assert!(
            status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN,
            "unexpected status {}",
            status
        );
    }

    let (status, _) = app.login("acme", &owner.email, TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_lockout_expires() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;

    for _ in 0..MAX_FAILED_LOGINS {
        app.login("acme", &owner.email, "wrong-password").await;
    }
    let (status, _) = app.login("acme", &owner.email, TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let store = &app.state.store;
    let mut user = store
        .find_user(owner.tenant_id, owner.user_id)
        .await
        .unwrap()
        .unwrap();
    assert!(user.locked_until_utc.is_some());
    user.locked_until_utc = Some(Utc::now() - Duration::seconds(1));
    store.update_user(&user).await.unwrap();

    let (status, body) = app.login("acme", &owner.email, TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);

    let user = store
        .find_user(owner.tenant_id, owner.user_id)
        .await
        .unwrap()
        .unwrap();
    assert!(user.locked_until_utc.is_none());
    assert_eq!(user.failed_login_count, 0);
    assert!(user.last_login_utc.is_some());
}

#[tokio::test]
async fn test_access_token_ends_with_its_session() {
    let mut config = create_test_config();
    config.jwt.refresh_token_expiry_days = 0;
    let app = TestApp::spawn_with(config).await;
    let owner = app.register_tenant("acme").await;

    let (status, _) = app
        .post(
            "/auth/refresh",
            None,
            json!({ "refresh_token": owner.refresh_token }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/me", &owner.access_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .post(
            "/auth/introspect",
            None,
            json!({ "token": owner.access_token }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], false);
}

#[tokio::test]
async fn test_same_email_in_two_tenants_is_isolated() {
    let app = TestApp::spawn().await;
    let acme = app.register_tenant("acme").await;
    let globex = app.register_tenant("globex").await;

    app.create_user(&acme, "shared@example.com", &["member"]).await;
    let (status, _) = app.login("globex", "shared@example.com", TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Ids from another tenant read as missing
    let (status, _) = app
        .get(&format!("/users/{}", acme.user_id), &globex.access_token)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_refresh_rotates_and_detects_reuse() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;

    let (status, rotated) = app
        .post(
            "/auth/refresh",
            None,
            json!({ "refresh_token": owner.refresh_token }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let new_access = rotated["access_token"].as_str().unwrap().to_string();
    let new_refresh = rotated["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(new_refresh, owner.refresh_token);

    let (status, _) = app.get("/me", &new_access).await;
    assert_eq!(status, StatusCode::OK);

    // Presenting the old token again revokes the whole session
    let (status, _) = app
        .post(
            "/auth/refresh",
            None,
            json!({ "refresh_token": owner.refresh_token }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post("/auth/refresh", None, json!({ "refresh_token": new_refresh }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/me", &new_access).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_access_token_is_not_a_refresh_token() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;

    let (status, _) = app
        .post(
            "/auth/refresh",
            None,
            json!({ "refresh_token": owner.access_token }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/me", &owner.refresh_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_session_and_token() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;

    let (status, _) = app
        .request(Method::POST, "/auth/logout", Some(&owner.access_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get("/me", &owner.access_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post(
            "/auth/refresh",
            None,
            json!({ "refresh_token": owner.refresh_token }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_introspection() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;

    let (status, body) = app
        .post(
            "/auth/introspect",
            None,
            json!({ "token": owner.access_token }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);
    assert_eq!(body["sub"], owner.user_id.to_string());
    assert_eq!(body["tid"], owner.tenant_id.to_string());

    let (_, body) = app
        .post("/auth/introspect", None, json!({ "token": "garbage" }))
        .await;
    assert_eq!(body, json!({ "active": false }));

    app.request(Method::POST, "/auth/logout", Some(&owner.access_token), None)
        .await;
    let (_, body) = app
        .post(
            "/auth/introspect",
            None,
            json!({ "token": owner.access_token }),
        )
        .await;
    assert_eq!(body["active"], false);
}

#[tokio::test]
async fn test_missing_bearer_token_is_rejected() {
    let app = TestApp::spawn().await;
    let (status, body) = app.request(Method::GET, "/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}
