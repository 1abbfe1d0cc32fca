//! Tenant model - root of the multi-tenancy hierarchy.

use super::UnknownCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Tenant lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    PendingVerification,
    Active,
    Suspended,
    Canceled,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::PendingVerification => "pending_verification",
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Canceled => "canceled",
        }
    }

    /// Users of suspended or canceled tenants cannot sign in or refresh.
    pub fn allows_sign_in(&self) -> bool {
        matches!(
            self,
            TenantStatus::PendingVerification | TenantStatus::Active
        )
    }
}

impl FromStr for TenantStatus {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_verification" => Ok(TenantStatus::PendingVerification),
            "active" => Ok(TenantStatus::Active),
            "suspended" => Ok(TenantStatus::Suspended),
            "canceled" => Ok(TenantStatus::Canceled),
            other => Err(UnknownCode {
                kind: "tenant status",
                code: other.to_string(),
            }),
        }
    }
}

/// Tenant entity.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub slug: String,
    pub name: String,
    pub status: TenantStatus,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Tenant {
    /// New tenants start in `pending_verification`.
    pub fn new(slug: String, name: String) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: Uuid::new_v4(),
            slug,
            name,
            status: TenantStatus::PendingVerification,
            created_utc: now,
            updated_utc: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for status in [
            TenantStatus::PendingVerification,
            TenantStatus::Active,
            TenantStatus::Suspended,
            TenantStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<TenantStatus>().unwrap(), status);
        }
        assert!("deleted".parse::<TenantStatus>().is_err());
    }

    #[test]
    fn test_sign_in_allowed_only_for_live_tenants() {
        assert!(TenantStatus::PendingVerification.allows_sign_in());
        assert!(TenantStatus::Active.allows_sign_in());
        assert!(!TenantStatus::Suspended.allows_sign_in());
        assert!(!TenantStatus::Canceled.allows_sign_in());
    }

    #[test]
    fn test_new_tenant_is_pending() {
        let tenant = Tenant::new("acme".to_string(), "Acme".to_string());
        assert_eq!(tenant.status, TenantStatus::PendingVerification);
    }
}
