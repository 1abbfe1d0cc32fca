//! Two-factor enrollment and management for the signed-in user.

use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;
use service_core::error::AppError;

use crate::{
    dtos::{
        me::{BackupCodesResponse, MfaCodeRequest, MfaDisableRequest, MfaEnrollResponse},
        MessageResponse,
    },
    handlers::me::load_current_user,
    middleware::AuthUser,
    models::{AuditAction, AuditLog, AuditOutcome, User},
    services::ServiceError,
    utils::{ClientInfo, ValidatedJson},
    AppState,
};

async fn record(
    state: &AppState,
    user: &User,
    action: AuditAction,
    outcome: AuditOutcome,
    client: &ClientInfo,
) {
    state
        .audit
        .record(
            AuditLog::new(user.tenant_id, action, outcome)
                .actor(user.user_id)
                .resource("user", user.user_id)
                .client(client.ip_address.clone(), client.user_agent.clone()),
        )
        .await;
}

/// Start TOTP enrollment
#[utoipa::path(
    post,
    path = "/me/mfa/enroll",
    responses(
        (status = 200, description = "New secret, not active until confirmed", body = MfaEnrollResponse),
        (status = 409, description = "Two-factor already enabled", body = ErrorResponse)
    ),
    tag = "Two-factor",
    security(("bearer_auth" = []))
)]
pub async fn enroll(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let mut current = load_current_user(&state, &user).await?;
    if current.mfa_enabled {
        return Err(ServiceError::MfaAlreadyEnabled.into());
    }

    let enrollment = state.mfa.enroll(&current.email)?;
    current.mfa_secret = Some(enrollment.secret.clone());
    current.updated_utc = Utc::now();
    state.store.update_mfa(&current).await?;

    record(&state, &current, AuditAction::MfaEnroll, AuditOutcome::Success, &client).await;

    Ok(Json(MfaEnrollResponse {
        secret: enrollment.secret,
        otpauth_url: enrollment.otpauth_url,
    }))
}

/// Confirm enrollment with a first code; returns backup codes once
#[utoipa::path(
    post,
    path = "/me/mfa/confirm",
    request_body = MfaCodeRequest,
    responses(
        (status = 200, description = "Two-factor enabled", body = BackupCodesResponse),
        (status = 400, description = "Enrollment not started", body = ErrorResponse),
        (status = 401, description = "Invalid code", body = ErrorResponse),
        (status = 409, description = "Two-factor already enabled", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Two-factor",
    security(("bearer_auth" = []))
)]
pub async fn confirm(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<MfaCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut current = load_current_user(&state, &user).await?;
    if current.mfa_enabled {
        return Err(ServiceError::MfaAlreadyEnabled.into());
    }
    let secret = current
        .mfa_secret
        .clone()
        .ok_or(ServiceError::MfaNotEnrolled)?;
    state.mfa.begin_attempt(current.user_id).await?;

    if !state
        .mfa
        .verify_totp(current.user_id, &secret, &req.code)
        .await?
    {
        record(&state, &current, AuditAction::MfaEnable, AuditOutcome::Failure, &client).await;
        return Err(ServiceError::InvalidMfaCode.into());
    }

    state.mfa.reset_attempts(current.user_id).await?;
    let (codes, hashes) = state.mfa.generate_backup_codes();
    current.mfa_enabled = true;
    current.backup_code_hashes = hashes;
    current.updated_utc = Utc::now();
    state.store.update_mfa(&current).await?;

    tracing::info!(user_id = %current.user_id, "Two-factor authentication enabled");
    record(&state, &current, AuditAction::MfaEnable, AuditOutcome::Success, &client).await;

    Ok(Json(BackupCodesResponse {
        backup_codes: codes,
    }))
}

/// Turn two-factor off; needs the password and a current code
#[utoipa::path(
    post,
    path = "/me/mfa/disable",
    request_body = MfaDisableRequest,
    responses(
        (status = 200, description = "Two-factor disabled", body = MessageResponse),
        (status = 400, description = "Two-factor is not enabled", body = ErrorResponse),
        (status = 401, description = "Invalid code", body = ErrorResponse),
        (status = 403, description = "Password is incorrect", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Two-factor",
    security(("bearer_auth" = []))
)]
pub async fn disable(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<MfaDisableRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut current = load_current_user(&state, &user).await?;
    if !current.mfa_enabled {
        return Err(ServiceError::MfaNotEnabled.into());
    }
    state.mfa.begin_attempt(current.user_id).await?;

    if let Err(e) = state.auth.check_password(&current, &req.password) {
        record(&state, &current, AuditAction::MfaDisable, AuditOutcome::Failure, &client).await;
        return Err(e.into());
    }
    if state
        .mfa
        .verify_second_factor(&mut current, &req.code)
        .await?
        .is_none()
    {
        record(&state, &current, AuditAction::MfaDisable, AuditOutcome::Failure, &client).await;
        return Err(ServiceError::InvalidMfaCode.into());
    }

    state.mfa.reset_attempts(current.user_id).await?;
    current.mfa_enabled = false;
    current.mfa_secret = None;
    current.backup_code_hashes.clear();
    current.updated_utc = Utc::now();
    state.store.update_mfa(&current).await?;

    tracing::info!(user_id = %current.user_id, "Two-factor authentication disabled");
    record(&state, &current, AuditAction::MfaDisable, AuditOutcome::Success, &client).await;

    Ok(Json(MessageResponse::new(
        "Two-factor authentication disabled",
    )))
}

/// Replace all backup codes
#[utoipa::path(
    post,
    path = "/me/mfa/backup-codes",
    request_body = MfaCodeRequest,
    responses(
        (status = 200, description = "New backup codes", body = BackupCodesResponse),
        (status = 400, description = "Two-factor is not enabled", body = ErrorResponse),
        (status = 401, description = "Invalid code", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Two-factor",
    security(("bearer_auth" = []))
)]
pub async fn regenerate_backup_codes(
    State(state): State<AppState>,
    client: ClientInfo,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<MfaCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut current = load_current_user(&state, &user).await?;
    if !current.mfa_enabled {
        return Err(ServiceError::MfaNotEnabled.into());
    }
    state.mfa.begin_attempt(current.user_id).await?;

    if state
        .mfa
        .verify_second_factor(&mut current, &req.code)
        .await?
        .is_none()
    {
        record(
            &state,
            &current,
            AuditAction::BackupCodesRegenerate,
            AuditOutcome::Failure,
            &client,
        )
        .await;
        return Err(ServiceError::InvalidMfaCode.into());
    }

    state.mfa.reset_attempts(current.user_id).await?;
    let (codes, hashes) = state.mfa.generate_backup_codes();
    current.backup_code_hashes = hashes;
    current.updated_utc = Utc::now();
    state.store.update_mfa(&current).await?;

    state
        .audit
        .record(
            AuditLog::new(
                current.tenant_id,
                AuditAction::BackupCodesRegenerate,
                AuditOutcome::Success,
            )
            .actor(current.user_id)
            .client(client.ip_address.clone(), client.user_agent.clone())
            .details(json!({ "count": codes.len() })),
        )
        .await;

    Ok(Json(BackupCodesResponse {
        backup_codes: codes,
    }))
}
