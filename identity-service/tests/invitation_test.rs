mod common;

use axum::http::{Method, StatusCode};
use common::{parse_uuid, TestApp, TEST_PASSWORD};
use identity_service::{models::Invitation, services::CredentialStore, utils::hash_token};
use serde_json::json;

#[tokio::test]
async fn test_invitation_lifecycle() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;
    let admin_role = app.role_id(&owner, "admin").await;

    let (status, invite) = app
        .post(
            "/invitations",
            Some(&owner.access_token),
            json!({ "email": "New.Hire@acme.io", "role_ids": [admin_role] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", invite);
    assert_eq!(invite["email"], "new.hire@acme.io");
    assert_eq!(invite["status"], "pending");
    let token = invite["token"].as_str().unwrap().to_string();
    assert!(invite["accept_url"].as_str().unwrap().ends_with(&token));

    let (status, _) = app
        .post(
            "/invitations",
            Some(&owner.access_token),
            json!({ "email": "new.hire@acme.io" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, preview) = app
        .request(
            Method::GET,
            &format!("/invitations/lookup?token={}", token),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["tenant_slug"], "acme");
    assert_eq!(preview["valid"], true);

    let (status, accepted) = app
        .post(
            "/invitations/accept",
            None,
            json!({ "token": token, "password": TEST_PASSWORD, "display_name": "New Hire" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", accepted);
    let access = accepted["tokens"]["access_token"].as_str().unwrap();
    let (_, me) = app.get("/me", access).await;
    assert_eq!(me["email"], "new.hire@acme.io");
    assert_eq!(me["roles"], json!(["admin"]));

    // Single use
    let (status, _) = app
        .post(
            "/invitations/accept",
            None,
            json!({ "token": token, "password": TEST_PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, accepted_list) = app
        .get("/invitations?status=accepted", &owner.access_token)
        .await;
    assert_eq!(accepted_list.as_array().unwrap().len(), 1);

    let (status, _) = app.login("acme", "new.hire@acme.io", TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_cannot_invite_existing_user() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;

    let (status, _) = app
        .post(
            "/invitations",
            Some(&owner.access_token),
            json!({ "email": owner.email }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .post(
            "/invitations",
            Some(&owner.access_token),
            json!({ "email": "x@acme.io", "expires_in_hours": 0 }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_expired_invitation_is_gone() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;

    let token = "expired-invitation-token";
    let invitation = Invitation::new(
        owner.tenant_id,
        "late@acme.io",
        Vec::new(),
        hash_token(token),
        -1,
        owner.user_id,
    );
    app.state.store.insert_invitation(&invitation).await.unwrap();

    let (status, preview) = app
        .request(
            Method::GET,
            &format!("/invitations/lookup?token={}", token),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["status"], "expired");
    assert_eq!(preview["valid"], false);

    let (status, _) = app
        .post(
            "/invitations/accept",
            None,
            json!({ "token": token, "password": TEST_PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::GONE);

    // A fresh invitation to the same address is allowed
    let (status, _) = app
        .post(
            "/invitations",
            Some(&owner.access_token),
            json!({ "email": "late@acme.io" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_revoked_invitation_cannot_be_accepted() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;

    let (_, invite) = app
        .post(
            "/invitations",
            Some(&owner.access_token),
            json!({ "email": "maybe@acme.io" }),
        )
        .await;
    let invitation_id = parse_uuid(&invite["invitation_id"]);
    let token = invite["token"].as_str().unwrap().to_string();

    let uri = format!("/invitations/{}", invitation_id);
    let (status, _) = app
        .request(Method::DELETE, &uri, Some(&owner.access_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .request(Method::DELETE, &uri, Some(&owner.access_token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .post(
            "/invitations/accept",
            None,
            json!({ "token": token, "password": TEST_PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .request(
            Method::GET,
            "/invitations/lookup?token=unknown",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_accept_skips_roles_deleted_after_invite() {
    let app = TestApp::spawn().await;
    let owner = app.register_tenant("acme").await;
    let member_role = app.role_id(&owner, "member").await;

    let (status, auditor) = app
        .post(
            "/roles",
            Some(&owner.access_token),
            json!({ "name": "auditor", "permissions": ["audit_logs:read"] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", auditor);
    let auditor_id = parse_uuid(&auditor["role_id"]);

    let (status, invite) = app
        .post(
            "/invitations",
            Some(&owner.access_token),
            json!({ "email": "late@acme.io", "role_ids": [auditor_id, member_role] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", invite);
    let token = invite["token"].as_str().unwrap().to_string();

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/roles/{}", auditor_id),
            Some(&owner.access_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, accepted) = app
        .post(
            "/invitations/accept",
            None,
            json!({ "token": token, "password": TEST_PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", accepted);

    let access = accepted["tokens"]["access_token"].as_str().unwrap();
    let (_, me) = app.get("/me", access).await;
    assert_eq!(me["roles"], json!(["member"]));
    let (status, _) = app.get("/audit-logs", access).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
