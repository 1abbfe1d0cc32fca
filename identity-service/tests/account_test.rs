mod common;

use axum::http::{Method, StatusCode};
use common::{TestApp, TEST_PASSWORD};
use serde_json::json;

#[tokio::test]
async fn test_update_profile() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;

    let (status, body) = app
        .request(
            Method::PATCH,
            "/me",
            Some(&owner.access_token),
            Some(json!({ "display_name": "Alice" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display_name"], "Alice");
}

#[tokio::test]
async fn test_change_password_signs_out_other_sessions() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;
    let (_, other) = app.login("acme", &owner.email, TEST_PASSWORD).await;
    let other_token = other["access_token"].as_str().unwrap().to_string();

    let (status, _) = app
        .post(
            "/me/password",
            Some(&owner.access_token),
            json!({ "current_password": "not-the-password", "new_password": "new-password-99" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .post(
            "/me/password",
            Some(&owner.access_token),
            json!({ "current_password": TEST_PASSWORD, "new_password": "new-password-99" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], 1);

    let (status, _) = app.get("/me", &other_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.get("/me", &owner.access_token).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.login("acme", &owner.email, TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.login("acme", &owner.email, "new-password-99").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_session_listing_and_revocation() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;
    let (_, second) = app.login("acme", &owner.email, TEST_PASSWORD).await;
    let second_token = second["access_token"].as_str().unwrap().to_string();
    app.login("acme", &owner.email, TEST_PASSWORD).await;

    let (status, sessions) = app.get("/me/sessions", &owner.access_token).await;
    assert_eq!(status, StatusCode::OK);
    let sessions = sessions.as_array().unwrap().clone();
    assert_eq!(sessions.len(), 3);
    assert_eq!(
        sessions.iter().filter(|s| s["is_current"] == true).count(),
        1
    );

    // Revoke the second device by id
    let (_, second_view) = app.get("/me/sessions", &second_token).await;
    let second_id = second_view
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["is_current"] == true)
        .unwrap()["session_id"]
        .as_str()
        .unwrap()
        .to_string();
    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/me/sessions/{}", second_id),
            Some(&owner.access_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get("/me", &second_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .request(
            Method::POST,
            "/me/sessions/revoke-others",
            Some(&owner.access_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], 1);

    let (_, sessions) = app.get("/me/sessions", &owner.access_token).await;
    assert_eq!(sessions.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cannot_revoke_foreign_session() {
    let app = TestApp::spawn().await;
    let acme = app.register_tenant("acme").await;
    let globex = app.register_tenant("globex").await;

    let (_, sessions) = app.get("/me/sessions", &globex.access_token).await;
    let foreign = sessions[0]["session_id"].as_str().unwrap().to_string();

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/me/sessions/{}", foreign),
            Some(&acme.access_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get("/me", &globex.access_token).await;
    assert_eq!(status, StatusCode::OK);
}
