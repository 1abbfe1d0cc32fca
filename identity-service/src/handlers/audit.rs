use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    handlers::user::page_bounds,
    middleware::{require_permission, AuthUser},
    models::{AuditLog, AuditLogFilter, AuditOutcome},
    utils::ClientInfo,
    AppState,
};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub actor_user_id: Option<Uuid>,
    pub action: Option<String>,
    pub outcome: Option<AuditOutcome>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditLogListResponse {
    pub items: Vec<AuditLog>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// GET /audit-logs
///
/// Newest first.
pub async fn list_audit_logs(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    Query(query): Query<AuditLogQuery>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "audit_logs", "read").await?;

    let (limit, offset) = page_bounds(query.limit, query.offset, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
    let filter = AuditLogFilter {
        actor_user_id: query.actor_user_id,
        action: query.action.filter(|a| !a.is_empty()),
        outcome: query.outcome,
        from_utc: query.from,
        to_utc: query.to,
    };

    let page = state
        .audit
        .list(user.tenant_id(), &filter, limit, offset)
        .await?;

    Ok(Json(AuditLogListResponse {
        items: page.items,
        total: page.total,
        limit,
        offset,
    }))
}
