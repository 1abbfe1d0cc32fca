use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use service_core::error::AppError;
use validator::Validate;

use crate::{
    middleware::{require_permission, AuthUser},
    models::{AuditAction, AuditLog, AuditOutcome, Tenant},
    utils::{ClientInfo, ValidatedJson},
    AppState,
};

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTenantRequest {
    #[validate(length(min = 1, max = 128, message = "Tenant name is required"))]
    pub name: String,
}

async fn current_tenant(state: &AppState, user: &AuthUser) -> Result<Tenant, AppError> {
    state
        .store
        .find_tenant(user.tenant_id())
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Tenant not found")))
}

/// GET /tenant
pub async fn get_tenant(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "tenant", "read").await?;
    Ok(Json(current_tenant(&state, &user).await?))
}

/// PATCH /tenant
pub async fn update_tenant(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<UpdateTenantRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "tenant", "update").await?;

    let mut tenant = current_tenant(&state, &user).await?;
    tenant.name = req.name.trim().to_string();
    tenant.updated_utc = Utc::now();
    state.store.update_tenant(&tenant).await?;

    state
        .audit
        .record(
            AuditLog::new(tenant.tenant_id, AuditAction::TenantUpdate, AuditOutcome::Success)
                .actor(user.user_id())
                .resource("tenant", tenant.tenant_id)
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({ "name": tenant.name })),
        )
        .await;

    Ok(Json(tenant))
}
