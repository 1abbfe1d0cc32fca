use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::{Tenant, UserResponse};
use crate::services::TokenResponse;
use crate::utils::Password;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 128, message = "Tenant name is required"))]
    #[schema(example = "Acme Corp")]
    pub tenant_name: String,

    #[validate(custom(function = "crate::utils::validation::validate_slug"))]
    #[schema(example = "acme-corp")]
    pub tenant_slug: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "owner@acme.io")]
    pub email: String,

    #[schema(value_type = String, example = "correct-horse-42")]
    pub password: Password,

    #[validate(length(max = 128))]
    #[schema(example = "Alice Owner")]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub tenant: Tenant,
    pub user: UserResponse,
    pub tokens: TokenResponse,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Tenant is required"))]
    #[schema(example = "acme-corp")]
    pub tenant_slug: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "owner@acme.io")]
    pub email: String,

    #[schema(value_type = String, example = "correct-horse-42")]
    pub password: Password,
}

/// Either a token pair or, for MFA-enabled accounts, a challenge token to
/// present to `/auth/mfa/verify`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub mfa_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Lifetime in seconds of the access token, or of the challenge token.
    #[schema(example = 900)]
    pub expires_in: i64,
}

impl LoginResponse {
    pub fn challenge(mfa_token: String, expires_in: i64) -> Self {
        Self {
            mfa_required: true,
            mfa_token: Some(mfa_token),
            access_token: None,
            refresh_token: None,
            token_type: None,
            expires_in,
        }
    }

    pub fn tokens(tokens: TokenResponse) -> Self {
        Self {
            mfa_required: false,
            mfa_token: None,
            access_token: Some(tokens.access_token),
            refresh_token: Some(tokens.refresh_token),
            token_type: Some(tokens.token_type),
            expires_in: tokens.expires_in,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MfaVerifyRequest {
    #[validate(length(min = 1, message = "MFA token is required"))]
    pub mfa_token: String,

    /// Six-digit TOTP code or a backup code.
    #[validate(length(min = 6, max = 32, message = "Invalid code"))]
    #[schema(example = "123456")]
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IntrospectRequest {
    pub token: String,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct IntrospectResponse {
    #[schema(example = true)]
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = 1704326400)]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = 1704322800)]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl IntrospectResponse {
    pub fn inactive() -> Self {
        Self::default()
    }
}
