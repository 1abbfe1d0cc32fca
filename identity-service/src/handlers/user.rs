//! Tenant user management.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{me::RevokedSessionsResponse, MessageResponse},
    middleware::{require_permission, AuthUser},
    models::{AuditAction, AuditLog, AuditOutcome, User, UserResponse, UserStatus},
    services::UserFilter,
    utils::{ClientInfo, Password, ValidatedJson},
    AppState,
};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub status: Option<UserStatus>,
    /// Substring of email or display name.
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserListResponse {
    pub items: Vec<UserResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    pub password: Password,
    #[validate(length(max = 128))]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 128))]
    pub display_name: Option<String>,
    pub status: Option<UserStatus>,
}

#[derive(Debug, Deserialize)]
pub struct SetUserRolesRequest {
    pub role_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserDetailResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub role_ids: Vec<Uuid>,
}

/// Clamp `limit` into `1..=max`, defaulting to `default`, and floor `offset` at zero.
pub(crate) fn page_bounds(
    limit: Option<i64>,
    offset: Option<i64>,
    default: i64,
    max: i64,
) -> (i64, i64) {
    (
        limit.unwrap_or(default).clamp(1, max),
        offset.unwrap_or(0).max(0),
    )
}

async fn find_user(state: &AppState, tenant_id: Uuid, user_id: Uuid) -> Result<User, AppError> {
    state
        .store
        .find_user(tenant_id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))
}

/// Every id must name a role of the tenant.
pub(crate) async fn ensure_tenant_roles(
    state: &AppState,
    tenant_id: Uuid,
    role_ids: &[Uuid],
) -> Result<(), AppError> {
    if role_ids.is_empty() {
        return Ok(());
    }
    let roles = state.store.list_roles(tenant_id).await?;
    if let Some(missing) = role_ids
        .iter()
        .find(|id| !roles.iter().any(|r| r.role_id == **id))
    {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Role {} does not exist in this tenant",
            missing
        )));
    }
    Ok(())
}

// ============================================================================
// User Handlers
// ============================================================================

/// GET /users
pub async fn list_users(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    Query(query): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "users", "read").await?;

    let (limit, offset) = page_bounds(query.limit, query.offset, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
    let filter = UserFilter {
        status: query.status,
        search: query.search.filter(|s| !s.trim().is_empty()),
    };

    let page = state
        .store
        .list_users(user.tenant_id(), &filter, limit, offset)
        .await?;

    Ok(Json(UserListResponse {
        items: page.items.iter().map(User::sanitized).collect(),
        total: page.total,
        limit,
        offset,
    }))
}

/// POST /users
pub async fn create_user(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "users", "create").await?;
    ensure_tenant_roles(&state, user.tenant_id(), &req.role_ids).await?;

    let password_hash = state.auth.hash_new_password(&req.password)?;
    let created = User::new(
        user.tenant_id(),
        &req.email,
        password_hash,
        req.display_name.filter(|n| !n.trim().is_empty()),
    );
    state.store.insert_user(&created, &req.role_ids).await?;

    tracing::info!(
        tenant_id = %created.tenant_id,
        user_id = %created.user_id,
        "User created"
    );

    state
        .audit
        .record(
            AuditLog::new(user.tenant_id(), AuditAction::UserCreate, AuditOutcome::Success)
                .actor(user.user_id())
                .resource("user", created.user_id)
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({ "email": created.email, "role_ids": req.role_ids })),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(UserDetailResponse {
            user: created.sanitized(),
            role_ids: req.role_ids,
        }),
    ))
}

/// GET /users/:user_id
pub async fn get_user(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "users", "read").await?;

    let found = find_user(&state, user.tenant_id(), user_id).await?;
    let role_ids = state.store.user_role_ids(user.tenant_id(), user_id).await?;

    Ok(Json(UserDetailResponse {
        user: found.sanitized(),
        role_ids,
    }))
}

/// PATCH /users/:user_id
pub async fn update_user(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    Path(user_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "users", "update").await?;

    let mut target = find_user(&state, user.tenant_id(), user_id).await?;

    if req.status == Some(UserStatus::Disabled) && user_id == user.user_id() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "You cannot disable your own account"
        )));
    }

    if let Some(display_name) = req.display_name {
        target.display_name = Some(display_name.trim().to_string()).filter(|n| !n.is_empty());
    }
    let disabling = req.status == Some(UserStatus::Disabled) && target.status != UserStatus::Disabled;
    if let Some(status) = req.status {
        target.status = status;
    }
    target.updated_utc = Utc::now();
    state.store.update_user(&target).await?;

    let revoked = if disabling {
        state
            .sessions
            .revoke_user(user.tenant_id(), user_id, None)
            .await?
    } else {
        0
    };

    state
        .audit
        .record(
            AuditLog::new(user.tenant_id(), AuditAction::UserUpdate, AuditOutcome::Success)
                .actor(user.user_id())
                .resource("user", user_id)
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({
                    "status": target.status.as_str(),
                    "sessions_revoked": revoked,
                })),
        )
        .await;

    Ok(Json(target.sanitized()))
}

/// DELETE /users/:user_id
///
/// Soft delete. The email becomes free for a new account.
pub async fn delete_user(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "users", "delete").await?;

    if user_id == user.user_id() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "You cannot delete your own account"
        )));
    }

    let mut target = find_user(&state, user.tenant_id(), user_id).await?;
    let now = Utc::now();
    target.deleted_utc = Some(now);
    target.updated_utc = now;
    state.store.update_user(&target).await?;

    let revoked = state
        .sessions
        .revoke_user(user.tenant_id(), user_id, None)
        .await?;

    tracing::info!(tenant_id = %user.tenant_id(), user_id = %user_id, "User deleted");

    state
        .audit
        .record(
            AuditLog::new(user.tenant_id(), AuditAction::UserDelete, AuditOutcome::Success)
                .actor(user.user_id())
                .resource("user", user_id)
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({ "sessions_revoked": revoked })),
        )
        .await;

    Ok((StatusCode::OK, Json(MessageResponse::new("User deleted"))))
}

/// PUT /users/:user_id/roles
pub async fn set_user_roles(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(req): Json<SetUserRolesRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "users", "update").await?;

    let target = find_user(&state, user.tenant_id(), user_id).await?;
    ensure_tenant_roles(&state, user.tenant_id(), &req.role_ids).await?;

    let mut role_ids = req.role_ids;
    role_ids.sort();
    role_ids.dedup();
    state
        .store
        .set_user_roles(user.tenant_id(), user_id, &role_ids)
        .await?;

    state
        .audit
        .record(
            AuditLog::new(user.tenant_id(), AuditAction::UserRolesUpdate, AuditOutcome::Success)
                .actor(user.user_id())
                .resource("user", user_id)
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({ "role_ids": role_ids })),
        )
        .await;

    Ok(Json(UserDetailResponse {
        user: target.sanitized(),
        role_ids,
    }))
}

/// DELETE /users/:user_id/sessions
pub async fn revoke_user_sessions(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "sessions", "delete").await?;

    find_user(&state, user.tenant_id(), user_id).await?;
    let revoked = state
        .sessions
        .revoke_user(user.tenant_id(), user_id, None)
        .await?;

    state
        .audit
        .record(
            AuditLog::new(user.tenant_id(), AuditAction::SessionRevoke, AuditOutcome::Success)
                .actor(user.user_id())
                .resource("user", user_id)
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({ "scope": "all", "revoked": revoked })),
        )
        .await;

    Ok(Json(RevokedSessionsResponse { revoked }))
}
