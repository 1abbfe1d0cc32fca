//! Invitations to join a tenant. Delivery of the token is left to the caller.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::MessageResponse,
    handlers::user::ensure_tenant_roles,
    middleware::{require_permission, AuthUser},
    models::{
        AuditAction, AuditLog, AuditOutcome, Invitation, InvitationResponse, InvitationStatus,
        User, UserResponse,
    },
    services::{ServiceError, TokenResponse},
    utils::{generate_random_token, hash_token, ClientInfo, Password, ValidatedJson},
    AppState,
};

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListInvitationsQuery {
    pub status: Option<InvitationStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvitationRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[serde(default)]
    pub role_ids: Vec<Uuid>,
    #[validate(range(min = 1, max = 720, message = "Expiry must be 1-720 hours"))]
    pub expires_in_hours: Option<i64>,
}

/// The plaintext token is only ever returned here.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateInvitationResponse {
    #[serde(flatten)]
    pub invitation: InvitationResponse,
    pub token: String,
    pub accept_url: String,
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvitationPreview {
    pub tenant_name: String,
    pub tenant_slug: String,
    pub email: String,
    pub status: InvitationStatus,
    pub expiry_utc: DateTime<Utc>,
    pub valid: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AcceptInvitationRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
    pub password: Password,
    #[validate(length(max = 128))]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AcceptInvitationResponse {
    pub user: UserResponse,
    pub tokens: TokenResponse,
}

async fn find_by_token(state: &AppState, token: &str) -> Result<Invitation, AppError> {
    state
        .store
        .find_invitation_by_token_hash(&hash_token(token))
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invitation not found")))
}

// ============================================================================
// Tenant-side Handlers
// ============================================================================

/// GET /invitations
pub async fn list_invitations(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    Query(query): Query<ListInvitationsQuery>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "invitations", "read").await?;

    let invitations = state
        .store
        .list_invitations(user.tenant_id(), query.status)
        .await?
        .into_iter()
        .map(InvitationResponse::from)
        .collect::<Vec<_>>();

    Ok(Json(invitations))
}

/// POST /invitations
pub async fn create_invitation(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<CreateInvitationRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "invitations", "create").await?;
    ensure_tenant_roles(&state, user.tenant_id(), &req.role_ids).await?;

    let email = req.email.trim().to_lowercase();

    if state
        .store
        .find_user_by_email(user.tenant_id(), &email)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "A user with this email already exists"
        )));
    }

    let pending = state
        .store
        .find_pending_invitation_by_email(user.tenant_id(), &email)
        .await?;
    if pending.is_some_and(|i| i.is_valid()) {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "A pending invitation for this email already exists"
        )));
    }

    let token = generate_random_token();
    let invitation = Invitation::new(
        user.tenant_id(),
        &email,
        req.role_ids,
        hash_token(&token),
        req.expires_in_hours
            .unwrap_or(state.config.invitations.expiry_hours),
        user.user_id(),
    );
    state.store.insert_invitation(&invitation).await?;

    tracing::info!(
        tenant_id = %invitation.tenant_id,
        invitation_id = %invitation.invitation_id,
        "Invitation created"
    );

    state
        .audit
        .record(
            AuditLog::new(user.tenant_id(), AuditAction::InvitationCreate, AuditOutcome::Success)
                .actor(user.user_id())
                .resource("invitation", invitation.invitation_id)
                .client(client.ip_address.clone(), client.user_agent.clone())
                .details(json!({ "email": invitation.email, "role_ids": invitation.role_ids })),
        )
        .await;

    let accept_url = format!("{}?token={}", state.config.invitations.accept_url, token);

    Ok((
        StatusCode::CREATED,
        Json(CreateInvitationResponse {
            invitation: InvitationResponse::from(invitation),
            token,
            accept_url,
        }),
    ))
}

/// DELETE /invitations/:invitation_id
pub async fn revoke_invitation(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    Path(invitation_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_permission(&state, &user, &client, "invitations", "delete").await?;

    let mut invitation = state
        .store
        .find_invitation(user.tenant_id(), invitation_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invitation not found")))?;

    if invitation.status != InvitationStatus::Pending {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Invitation is no longer pending"
        )));
    }

    invitation.status = InvitationStatus::Revoked;
    state.store.update_invitation(&invitation).await?;

    state
        .audit
        .record(
            AuditLog::new(user.tenant_id(), AuditAction::InvitationRevoke, AuditOutcome::Success)
                .actor(user.user_id())
                .resource("invitation", invitation_id)
                .client(client.ip_address.clone(), client.user_agent.clone()),
        )
        .await;

    Ok((StatusCode::OK, Json(MessageResponse::new("Invitation revoked"))))
}

// ============================================================================
// Public Handlers
// ============================================================================

/// GET /invitations/lookup?token=
pub async fn lookup_invitation(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> Result<impl IntoResponse, AppError> {
    let invitation = find_by_token(&state, &query.token).await?;
    let tenant = state
        .store
        .find_tenant(invitation.tenant_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invitation not found")))?;

    Ok(Json(InvitationPreview {
        tenant_name: tenant.name,
        tenant_slug: tenant.slug,
        status: invitation.effective_status(),
        valid: invitation.is_valid() && tenant.status.allows_sign_in(),
        email: invitation.email,
        expiry_utc: invitation.expiry_utc,
    }))
}

/// POST /invitations/accept
///
/// Creates the account, marks the invitation accepted and signs the new user in.
pub async fn accept_invitation(
    State(state): State<AppState>,
    client: ClientInfo,
    ValidatedJson(req): ValidatedJson<AcceptInvitationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut invitation = find_by_token(&state, &req.token).await?;

    if invitation.status != InvitationStatus::Pending {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Invitation is no longer pending"
        )));
    }

    if invitation.is_expired() {
        invitation.status = InvitationStatus::Expired;
        state.store.update_invitation(&invitation).await?;
        return Err(ServiceError::InvitationExpired.into());
    }

    let tenant = state
        .store
        .find_tenant(invitation.tenant_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invitation not found")))?;
    if !tenant.status.allows_sign_in() {
        return Err(ServiceError::TenantInactive.into());
    }

    if state
        .store
        .find_user_by_email(invitation.tenant_id, &invitation.email)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "A user with this email already exists"
        )));
    }

    let password_hash = state.auth.hash_new_password(&req.password)?;
    let new_user = User::new(
        invitation.tenant_id,
        &invitation.email,
        password_hash,
        req.display_name.filter(|n| !n.trim().is_empty()),
    );

    state
        .store
        .accept_invitation(&invitation, &new_user, &invitation.role_ids)
        .await?;

    tracing::info!(
        tenant_id = %invitation.tenant_id,
        user_id = %new_user.user_id,
        invitation_id = %invitation.invitation_id,
        "Invitation accepted"
    );

    state
        .audit
        .record(
            AuditLog::new(
                invitation.tenant_id,
                AuditAction::InvitationAccept,
                AuditOutcome::Success,
            )
            .actor(new_user.user_id)
            .resource("invitation", invitation.invitation_id)
            .client(client.ip_address.clone(), client.user_agent.clone()),
        )
        .await;

    let tokens = state.sessions.open(&new_user, &client).await?;

    Ok((
        StatusCode::CREATED,
        Json(AcceptInvitationResponse {
            user: new_user.sanitized(),
            tokens,
        }),
    ))
}
