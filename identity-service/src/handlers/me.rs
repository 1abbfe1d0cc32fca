//! Self-service endpoints for the signed-in user.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        me::{ChangePasswordRequest, MeResponse, RevokedSessionsResponse, UpdateProfileRequest},
        MessageResponse,
    },
    middleware::AuthUser,
    models::{AuditAction, AuditLog, AuditOutcome, SessionInfo, User},
    utils::{ClientInfo, ValidatedJson},
    AppState,
};

pub(crate) async fn load_current_user(state: &AppState, user: &AuthUser) -> Result<User, AppError> {
    state
        .store
        .find_user(user.tenant_id(), user.user_id())
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))
}

/// Current user with role names and effective permissions
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    ),
    tag = "Account",
    security(("bearer_auth" = []))
)]
pub async fn get_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let current = load_current_user(&state, &user).await?;

    let role_ids = state
        .store
        .user_role_ids(user.tenant_id(), user.user_id())
        .await?;
    let mut roles: Vec<String> = state
        .store
        .list_roles(user.tenant_id())
        .await?
        .into_iter()
        .filter(|r| role_ids.contains(&r.role_id))
        .map(|r| r.name)
        .collect();
    roles.sort();

    let permissions = state
        .permissions
        .effective_permissions(user.tenant_id(), user.user_id())
        .await?
        .keys();

    Ok(Json(MeResponse {
        user: current.sanitized(),
        roles,
        permissions,
    }))
}

/// Update the current user's profile
#[utoipa::path(
    patch,
    path = "/me",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Account",
    security(("bearer_auth" = []))
)]
pub async fn update_me(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut current = load_current_user(&state, &user).await?;

    if let Some(display_name) = req.display_name {
        current.display_name = Some(display_name.trim().to_string()).filter(|n| !n.is_empty());
    }
    current.updated_utc = Utc::now();
    state.store.update_user(&current).await?;

    state
        .audit
        .record(
            AuditLog::new(user.tenant_id(), AuditAction::UserUpdate, AuditOutcome::Success)
                .actor(user.user_id())
                .resource("user", user.user_id())
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({ "self": true })),
        )
        .await;

    Ok(Json(current.sanitized()))
}

/// Change password; other sessions are signed out
#[utoipa::path(
    post,
    path = "/me/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = RevokedSessionsResponse),
        (status = 400, description = "New password does not meet policy", body = ErrorResponse),
        (status = 403, description = "Current password is incorrect", body = ErrorResponse)
    ),
    tag = "Account",
    security(("bearer_auth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let revoked = state
        .auth
        .change_password(&user.0, &req.current_password, &req.new_password, &client)
        .await?;
    Ok(Json(RevokedSessionsResponse { revoked }))
}

/// Active sessions of the current user
#[utoipa::path(
    get,
    path = "/me/sessions",
    responses(
        (status = 200, description = "Active sessions", body = [SessionInfo])
    ),
    tag = "Account",
    security(("bearer_auth" = []))
)]
pub async fn list_my_sessions(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state
        .sessions
        .list(user.tenant_id(), user.user_id())
        .await?
        .into_iter()
        .map(|s| SessionInfo::from_session(s, Some(user.session_id())))
        .collect::<Vec<_>>();
    Ok(Json(sessions))
}

/// Revoke one of the current user's sessions
#[utoipa::path(
    delete,
    path = "/me/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "Session to revoke")),
    responses(
        (status = 200, description = "Session revoked", body = MessageResponse),
        (status = 404, description = "No such live session", body = ErrorResponse)
    ),
    tag = "Account",
    security(("bearer_auth" = []))
)]
pub async fn revoke_my_session(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let owned = state
        .sessions
        .list(user.tenant_id(), user.user_id())
        .await?
        .iter()
        .any(|s| s.session_id == session_id);
    if !owned {
        return Err(AppError::NotFound(anyhow::anyhow!("Session not found")));
    }

    state.sessions.revoke(session_id).await?;

    state
        .audit
        .record(
            AuditLog::new(user.tenant_id(), AuditAction::SessionRevoke, AuditOutcome::Success)
                .actor(user.user_id())
                .resource("session", session_id)
                .client(client.ip_address.clone(), client.user_agent.clone()),
        )
        .await;

    Ok((StatusCode::OK, Json(MessageResponse::new("Session revoked"))))
}

/// Revoke every session of the current user except this one
#[utoipa::path(
    post,
    path = "/me/sessions/revoke-others",
    responses(
        (status = 200, description = "Other sessions revoked", body = RevokedSessionsResponse)
    ),
    tag = "Account",
    security(("bearer_auth" = []))
)]
pub async fn revoke_other_sessions(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let revoked = state
        .sessions
        .revoke_user(user.tenant_id(), user.user_id(), Some(user.session_id()))
        .await?;

    state
        .audit
        .record(
            AuditLog::new(user.tenant_id(), AuditAction::SessionRevoke, AuditOutcome::Success)
                .actor(user.user_id())
                .resource("user", user.user_id())
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({ "scope": "others", "revoked": revoked })),
        )
        .await;

    Ok(Json(RevokedSessionsResponse { revoked }))
}
