use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::UserResponse;
use crate::utils::Password;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    #[schema(example = json!(["owner"]))]
    pub roles: Vec<String>,
    #[schema(example = json!(["users:*", "tenant:read"]))]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 128))]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    #[schema(value_type = String)]
    pub current_password: Password,
    #[schema(value_type = String)]
    pub new_password: Password,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevokedSessionsResponse {
    #[schema(example = 2)]
    pub revoked: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MfaEnrollResponse {
    /// Base32 secret for manual entry.
    pub secret: String,
    /// Provisioning URI for QR rendering.
    pub otpauth_url: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MfaCodeRequest {
    #[validate(length(min = 6, max = 32, message = "Invalid code"))]
    #[schema(example = "123456")]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MfaDisableRequest {
    #[schema(value_type = String)]
    pub password: Password,
    #[validate(length(min = 6, max = 32, message = "Invalid code"))]
    pub code: String,
}

/// Plaintext backup codes. Shown once; only hashes are stored.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BackupCodesResponse {
    #[schema(example = json!(["ABCD-EFGH-JKLM"]))]
    pub backup_codes: Vec<String>,
}
