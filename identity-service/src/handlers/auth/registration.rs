use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::RegisterRequest,
    utils::{ClientInfo, ValidatedJson},
    AppState,
};

/// Register a tenant together with its owner account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Tenant created and owner signed in", body = RegisterResponse),
        (status = 400, description = "Password does not meet policy", body = ErrorResponse),
        (status = 409, description = "Tenant slug already taken", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many registrations from this IP", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    client: ClientInfo,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.register(req, &client).await?;
    Ok((StatusCode::CREATED, Json(res)))
}
