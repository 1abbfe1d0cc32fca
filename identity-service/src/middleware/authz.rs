use serde_json::json;
use service_core::error::AppError;

use crate::{
    middleware::AuthUser,
    models::{AuditAction, AuditLog, AuditOutcome},
    utils::ClientInfo,
    AppState,
};

/// Fail with 403 unless the caller holds `resource:action` in their tenant.
/// Denials are written to the audit log.
pub async fn require_permission(
    state: &AppState,
    user: &AuthUser,
    client: &ClientInfo,
    resource: &str,
    action: &str,
) -> Result<(), AppError> {
    let allowed = state
        .permissions
        .check(user.tenant_id(), user.user_id(), resource, action)
        .await?;

    if allowed {
        return Ok(());
    }

    tracing::warn!(
        user_id = %user.user_id(),
        tenant_id = %user.tenant_id(),
        permission = %format!("{}:{}", resource, action),
        "Permission denied"
    );

    state
        .audit
        .record(
            AuditLog::new(user.tenant_id(), AuditAction::AuthzDenied, AuditOutcome::Denied)
                .actor(user.user_id())
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({ "resource": resource, "action": action })),
        )
        .await;

    Err(AppError::Forbidden(anyhow::anyhow!(
        "Missing permission {}:{}",
        resource,
        action
    )))
}
