//! Platform operator endpoints, guarded by the admin API key.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    models::{AuditAction, AuditLog, AuditOutcome, TenantStatus},
    utils::ClientInfo,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct UpdateTenantStatusRequest {
    pub status: TenantStatus,
}

/// PUT /admin/tenants/:tenant_id/status
///
/// Suspending or canceling a tenant revokes every session in it.
pub async fn update_tenant_status(
    State(state): State<AppState>,
    client: ClientInfo,
    Path(tenant_id): Path<Uuid>,
    Json(req): Json<UpdateTenantStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut tenant = state
        .store
        .find_tenant(tenant_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Tenant not found")))?;

    let previous = tenant.status;
    tenant.status = req.status;
    tenant.updated_utc = Utc::now();
    state.store.update_tenant(&tenant).await?;

    let revoked = if tenant.status.allows_sign_in() {
        0
    } else {
        state.sessions.revoke_tenant(tenant_id).await?
    };

    tracing::info!(
        tenant_id = %tenant_id,
        from = previous.as_str(),
        to = tenant.status.as_str(),
        "Tenant status changed"
    );

    state
        .audit
        .record(
            AuditLog::new(tenant_id, AuditAction::TenantStatusChange, AuditOutcome::Success)
                .resource("tenant", tenant_id)
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({
                    "from": previous.as_str(),
                    "to": tenant.status.as_str(),
                    "sessions_revoked": revoked,
                })),
        )
        .await;

    Ok(Json(tenant))
}
