//! User model - tenant-scoped user accounts.

use super::UnknownCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// User account status. Deletion is tracked separately via `deleted_utc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Disabled => "disabled",
        }
    }
}

impl FromStr for UserStatus {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "disabled" => Ok(UserStatus::Disabled),
            other => Err(UnknownCode {
                kind: "user status",
                code: other.to_string(),
            }),
        }
    }
}

/// User entity (tenant-scoped).
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub status: UserStatus,
    pub mfa_enabled: bool,
    /// Base32 TOTP secret. Present but unused until `mfa_enabled`.
    pub mfa_secret: Option<String>,
    /// SHA-256 hashes of the unused backup codes.
    pub backup_code_hashes: Vec<String>,
    pub failed_login_count: i32,
    pub locked_until_utc: Option<DateTime<Utc>>,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

impl User {
    /// Create a new user. Emails are stored lowercased.
    pub fn new(
        tenant_id: Uuid,
        email: &str,
        password_hash: String,
        display_name: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            tenant_id,
            email: email.trim().to_lowercase(),
            password_hash,
            display_name,
            status: UserStatus::Active,
            mfa_enabled: false,
            mfa_secret: None,
            backup_code_hashes: Vec::new(),
            failed_login_count: 0,
            locked_until_utc: None,
            last_login_utc: None,
            created_utc: now,
            updated_utc: now,
            deleted_utc: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_utc.is_some()
    }

    /// Active and not soft-deleted.
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active && !self.is_deleted()
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until_utc.is_some_and(|until| until > now)
    }

    /// Convert to sanitized response (no secrets).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self)
    }
}

/// User response for API (without sensitive fields).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub status: UserStatus,
    pub mfa_enabled: bool,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(u: &User) -> Self {
        Self {
            user_id: u.user_id,
            tenant_id: u.tenant_id,
            email: u.email.clone(),
            display_name: u.display_name.clone(),
            status: u.status,
            mfa_enabled: u.mfa_enabled,
            last_login_utc: u.last_login_utc,
            created_utc: u.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user() -> User {
        User::new(Uuid::new_v4(), " Alice@Example.COM ", "hash".to_string(), None)
    }

    #[test]
    fn test_email_normalized() {
        assert_eq!(user().email, "alice@example.com");
    }

    #[test]
    fn test_soft_deleted_user_is_not_active() {
        let mut u = user();
        assert!(u.is_active());
        u.deleted_utc = Some(Utc::now());
        assert!(u.is_deleted());
        assert!(!u.is_active());
    }

    #[test]
    fn test_disabled_user_is_not_active() {
        let mut u = user();
        u.status = UserStatus::Disabled;
        assert!(!u.is_active());
    }

    #[test]
    fn test_lock_window() {
        let mut u = user();
        let now = Utc::now();
        assert!(!u.is_locked(now));
        u.locked_until_utc = Some(now + Duration::minutes(5));
        assert!(u.is_locked(now));
        assert!(!u.is_locked(now + Duration::minutes(6)));
    }

    #[test]
    fn test_sanitized_has_no_secrets() {
        let mut u = user();
        u.mfa_secret = Some("JBSWY3DPEHPK3PXP".to_string());
        let json = serde_json::to_string(&u.sanitized()).unwrap();
        assert!(!json.contains("hash"));
        assert!(!json.contains("JBSWY3DPEHPK3PXP"));
    }
}
