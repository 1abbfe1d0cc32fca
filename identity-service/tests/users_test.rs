mod common;

use axum::http::{Method, StatusCode};
use common::{TestApp, TEST_PASSWORD};
use serde_json::json;

#[tokio::test]
async fn test_create_and_list_users() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;
    for name in ["alice", "bob", "carol"] {
        app.create_user(&owner, &format!("{}@acme.io", name), &["member"])
            .await;
    }

    let (status, page) = app.get("/users?limit=2&offset=0", &owner.access_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 4);
    assert_eq!(page["items"].as_array().unwrap().len(), 2);
    assert!(page["items"][0].get("password_hash").is_none());

    let (_, page) = app.get("/users?search=bob", &owner.access_token).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["email"], "bob@acme.io");

    let (status, _) = app
        .post(
            "/users",
            Some(&owner.access_token),
            json!({ "email": "BOB@acme.io", "password": TEST_PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_get_user_includes_roles() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;
    let admin_role = app.role_id(&owner, "admin").await;
    let (user_id, _) = app.create_user(&owner, "alice@acme.io", &["admin"]).await;

    let (status, body) = app
        .get(&format!("/users/{}", user_id), &owner.access_token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role_ids"], json!([admin_role]));

    let member_role = app.role_id(&owner, "member").await;
    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/users/{}/roles", user_id),
            Some(&owner.access_token),
            Some(json!({ "role_ids": [member_role, member_role] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role_ids"], json!([member_role]));
}

#[tokio::test]
async fn test_disabling_a_user_ends_their_sessions() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;
    let (user_id, token) = app.create_user(&owner, "alice@acme.io", &["member"]).await;

    let (status, body) = app
        .request(
            Method::PATCH,
            &format!("/users/{}", user_id),
            Some(&owner.access_token),
            Some(json!({ "status": "disabled" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "disabled");

    let (status, _) = app.get("/me", &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.login("acme", "alice@acme.io", TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, page) = app.get("/users?status=disabled", &owner.access_token).await;
    assert_eq!(page["total"], 1);
}

#[tokio::test]
async fn test_owner_cannot_disable_or_delete_self() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;
    let uri = format!("/users/{}", owner.user_id);

    let (status, _) = app
        .request(
            Method::PATCH,
            &uri,
            Some(&owner.access_token),
            Some(json!({ "status": "disabled" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(Method::DELETE, &uri, Some(&owner.access_token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_deleted_user_disappears() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;
    let (user_id, token) = app.create_user(&owner, "alice@acme.io", &["member"]).await;
    let uri = format!("/users/{}", user_id);

    let (status, _) = app
        .request(Method::DELETE, &uri, Some(&owner.access_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get(&uri, &owner.access_token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.get("/me", &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.login("acme", "alice@acme.io", TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The address can be reused
    app.create_user(&owner, "alice@acme.io", &["member"]).await;
}

#[tokio::test]
async fn test_admin_can_revoke_user_sessions() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;
    let (user_id, token) = app.create_user(&owner, "alice@acme.io", &["member"]).await;

    let (status, body) = app
        .request(
            Method::DELETE,
            &format!("/users/{}/sessions", user_id),
            Some(&owner.access_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], 1);

    let (status, _) = app.get("/me", &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Revoked sessions leave the account itself usable
    let (status, _) = app.login("acme", "alice@acme.io", TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
}
