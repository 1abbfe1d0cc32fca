use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::MfaVerifyRequest,
    utils::{ClientInfo, ValidatedJson},
    AppState,
};

/// Complete sign-in with a TOTP or backup code
#[utoipa::path(
    post,
    path = "/auth/mfa/verify",
    request_body = MfaVerifyRequest,
    responses(
        (status = 200, description = "Second factor accepted", body = LoginResponse),
        (status = 401, description = "Invalid code or challenge token", body = ErrorResponse),
        (status = 403, description = "User disabled or tenant inactive", body = ErrorResponse),
        (status = 429, description = "Challenge exhausted, sign in again", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn verify_mfa(
    State(state): State<AppState>,
    client: ClientInfo,
    ValidatedJson(req): ValidatedJson<MfaVerifyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.verify_mfa(req, &client).await?;
    Ok((StatusCode::OK, Json(res)))
}
