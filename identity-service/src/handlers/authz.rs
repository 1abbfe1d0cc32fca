//! Permission catalog and self-service permission checks.

use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use crate::{
    middleware::{require_permission, AuthUser},
    utils::ClientInfo,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct PermissionCheck {
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthzCheckRequest {
    pub checks: Vec<PermissionCheck>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthzDecision {
    pub resource: String,
    pub action: String,
    pub allowed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthzCheckResponse {
    pub results: Vec<AuthzDecision>,
}

/// GET /permissions
pub async fn list_permissions(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "permissions", "read").await?;
    let permissions = state.store.list_permissions().await?;
    Ok(Json(permissions))
}

/// POST /authz/check
///
/// Answers for the caller only, so no permission is required.
pub async fn check(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<AuthzCheckRequest>,
) -> Result<impl IntoResponse, AppError> {
    let effective = state
        .permissions
        .effective_permissions(user.tenant_id(), user.user_id())
        .await?;

    let results = req
        .checks
        .into_iter()
        .map(|c| AuthzDecision {
            allowed: effective.allows(&c.resource, &c.action),
            resource: c.resource,
            action: c.action,
        })
        .collect();

    Ok(Json(AuthzCheckResponse { results }))
}
