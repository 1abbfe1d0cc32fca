//! Role management. Authorization is always by permission key, never by role name.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::MessageResponse,
    middleware::{require_permission, AuthUser},
    models::{AuditAction, AuditLog, AuditOutcome, Role},
    utils::{validation::validate_permission_keys, ClientInfo, ValidatedJson},
    AppState,
};

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 64, message = "Role name must be 1-64 characters"))]
    pub name: String,
    #[validate(length(max = 256))]
    pub description: Option<String>,
    pub parent_role_id: Option<Uuid>,
    #[serde(default)]
    #[validate(custom(function = "validate_permission_keys"))]
    pub permissions: Vec<String>,
}

/// Absent fields are left alone; `"parent_role_id": null` detaches the parent.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRoleRequest {
    #[validate(length(min = 1, max = 64, message = "Role name must be 1-64 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 256))]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub parent_role_id: Option<Option<Uuid>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetRolePermissionsRequest {
    #[validate(custom(function = "validate_permission_keys"))]
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoleDetailResponse {
    #[serde(flatten)]
    pub role: Role,
    /// Granted to this role directly.
    pub permissions: Vec<String>,
    /// Direct grants plus everything inherited from ancestors.
    pub effective_permissions: Vec<String>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

async fn find_role(state: &AppState, tenant_id: Uuid, role_id: Uuid) -> Result<Role, AppError> {
    state
        .store
        .find_role(tenant_id, role_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Role not found")))
}

fn ensure_mutable(role: &Role) -> Result<(), AppError> {
    if role.is_system {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "System roles cannot be modified"
        )));
    }
    Ok(())
}

async fn role_detail(state: &AppState, role: Role) -> Result<RoleDetailResponse, AppError> {
    let permissions = state
        .store
        .role_permissions(role.tenant_id, role.role_id)
        .await?
        .iter()
        .map(ToString::to_string)
        .collect();
    let effective_permissions = state
        .permissions
        .role_effective_permissions(role.tenant_id, role.role_id)
        .await?
        .keys();
    Ok(RoleDetailResponse {
        role,
        permissions,
        effective_permissions,
    })
}

// ============================================================================
// Role Handlers
// ============================================================================

/// GET /roles
pub async fn list_roles(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "roles", "read").await?;
    let roles = state.store.list_roles(user.tenant_id()).await?;
    Ok(Json(roles))
}

/// POST /roles
pub async fn create_role(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<CreateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "roles", "create").await?;

    let permissions = state.permissions.catalog_keys(&req.permissions).await?;
    let role = Role::new(
        user.tenant_id(),
        req.name.trim().to_string(),
        req.description,
        req.parent_role_id,
    );
    state
        .permissions
        .ensure_acyclic(user.tenant_id(), role.role_id, role.parent_role_id)
        .await?;

    state.store.insert_role(&role, &permissions).await?;

    state
        .audit
        .record(
            AuditLog::new(user.tenant_id(), AuditAction::RoleCreate, AuditOutcome::Success)
                .actor(user.user_id())
                .resource("role", role.role_id)
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({
                    "name": role.name,
                    "permissions": permissions.iter().map(ToString::to_string).collect::<Vec<_>>(),
                })),
        )
        .await;

    Ok((StatusCode::CREATED, Json(role_detail(&state, role).await?)))
}

/// GET /roles/:role_id
pub async fn get_role(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    Path(role_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "roles", "read").await?;
    let role = find_role(&state, user.tenant_id(), role_id).await?;
    Ok(Json(role_detail(&state, role).await?))
}

/// PATCH /roles/:role_id
pub async fn update_role(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    Path(role_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "roles", "update").await?;

    let mut role = find_role(&state, user.tenant_id(), role_id).await?;
    ensure_mutable(&role)?;

    if let Some(parent) = req.parent_role_id {
        state
            .permissions
            .ensure_acyclic(user.tenant_id(), role_id, parent)
            .await?;
        role.parent_role_id = parent;
    }
    if let Some(name) = req.name {
        role.name = name.trim().to_string();
    }
    if let Some(description) = req.description {
        role.description = Some(description).filter(|d| !d.trim().is_empty());
    }
    role.updated_utc = Utc::now();
    state.store.update_role(&role).await?;

    state
        .audit
        .record(
            AuditLog::new(user.tenant_id(), AuditAction::RoleUpdate, AuditOutcome::Success)
                .actor(user.user_id())
                .resource("role", role_id)
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({ "name": role.name, "parent_role_id": role.parent_role_id })),
        )
        .await;

    Ok(Json(role_detail(&state, role).await?))
}

/// PUT /roles/:role_id/permissions
pub async fn set_role_permissions(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    Path(role_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<SetRolePermissionsRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "roles", "update").await?;

    let role = find_role(&state, user.tenant_id(), role_id).await?;
    ensure_mutable(&role)?;

    let permissions = state.permissions.catalog_keys(&req.permissions).await?;
    state
        .store
        .set_role_permissions(user.tenant_id(), role_id, &permissions)
        .await?;

    state
        .audit
        .record(
            AuditLog::new(
                user.tenant_id(),
                AuditAction::RolePermissionsUpdate,
                AuditOutcome::Success,
            )
            .actor(user.user_id())
            .resource("role", role_id)
            .client(client.ip_address.clone(), client.user_agent.clone())
            .details(json!({
                "permissions": permissions.iter().map(ToString::to_string).collect::<Vec<_>>(),
            })),
        )
        .await;

    Ok(Json(role_detail(&state, role).await?))
}

/// DELETE /roles/:role_id
pub async fn delete_role(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    Path(role_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "roles", "delete").await?;

    let role = find_role(&state, user.tenant_id(), role_id).await?;
    ensure_mutable(&role)?;

    let has_children = state
        .store
        .list_roles(user.tenant_id())
        .await?
        .iter()
        .any(|r| r.parent_role_id == Some(role_id));
    if has_children {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Role is the parent of another role"
        )));
    }

    state.store.delete_role(user.tenant_id(), role_id).await?;

    state
        .audit
        .record(
            AuditLog::new(user.tenant_id(), AuditAction::RoleDelete, AuditOutcome::Success)
                .actor(user.user_id())
                .resource("role", role_id)
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({ "name": role.name })),
        )
        .await;

    Ok((StatusCode::OK, Json(MessageResponse::new("Role deleted"))))
}
