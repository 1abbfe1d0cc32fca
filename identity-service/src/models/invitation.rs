//! Invitation model - pending offers to join a tenant with pre-assigned roles.

use super::UnknownCode;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Invitation state codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Revoked,
    Expired,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Revoked => "revoked",
            InvitationStatus::Expired => "expired",
        }
    }
}

impl FromStr for InvitationStatus {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvitationStatus::Pending),
            "accepted" => Ok(InvitationStatus::Accepted),
            "revoked" => Ok(InvitationStatus::Revoked),
            "expired" => Ok(InvitationStatus::Expired),
            other => Err(UnknownCode {
                kind: "invitation status",
                code: other.to_string(),
            }),
        }
    }
}

/// Invitation entity.
#[derive(Debug, Clone)]
pub struct Invitation {
    pub invitation_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub role_ids: Vec<Uuid>,
    pub token_hash: String,
    pub status: InvitationStatus,
    pub invited_by_user_id: Uuid,
    pub expiry_utc: DateTime<Utc>,
    pub accepted_utc: Option<DateTime<Utc>>,
    pub accepted_user_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl Invitation {
    pub fn new(
        tenant_id: Uuid,
        email: &str,
        role_ids: Vec<Uuid>,
        token_hash: String,
        expires_in_hours: i64,
        invited_by_user_id: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            invitation_id: Uuid::new_v4(),
            tenant_id,
            email: email.trim().to_lowercase(),
            role_ids,
            token_hash,
            status: InvitationStatus::Pending,
            invited_by_user_id,
            expiry_utc: now + Duration::hours(expires_in_hours),
            accepted_utc: None,
            accepted_user_id: None,
            created_utc: now,
        }
    }

    /// Pending and not yet past its expiry.
    pub fn is_valid(&self) -> bool {
        self.status == InvitationStatus::Pending && !self.is_expired()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expiry_utc
    }

    /// Status as callers should see it: pending rows past expiry read as expired.
    pub fn effective_status(&self) -> InvitationStatus {
        if self.status == InvitationStatus::Pending && self.is_expired() {
            InvitationStatus::Expired
        } else {
            self.status
        }
    }
}

/// Invitation response for API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InvitationResponse {
    pub invitation_id: Uuid,
    pub email: String,
    pub role_ids: Vec<Uuid>,
    pub status: InvitationStatus,
    pub invited_by_user_id: Uuid,
    pub expiry_utc: DateTime<Utc>,
    pub accepted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl From<Invitation> for InvitationResponse {
    fn from(i: Invitation) -> Self {
        Self {
            status: i.effective_status(),
            invitation_id: i.invitation_id,
            email: i.email,
            role_ids: i.role_ids,
            invited_by_user_id: i.invited_by_user_id,
            expiry_utc: i.expiry_utc,
            accepted_utc: i.accepted_utc,
            created_utc: i.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invitation(hours: i64) -> Invitation {
        Invitation::new(
            Uuid::new_v4(),
            "New@Example.com",
            vec![],
            "hash".to_string(),
            hours,
            Uuid::new_v4(),
        )
    }

    #[test]
    fn test_pending_invitation_is_valid() {
        let inv = invitation(24);
        assert_eq!(inv.email, "new@example.com");
        assert!(inv.is_valid());
        assert_eq!(inv.effective_status(), InvitationStatus::Pending);
    }

    #[test]
    fn test_expired_invitation_reports_expired() {
        let mut inv = invitation(24);
        inv.expiry_utc = Utc::now() - Duration::minutes(1);
        assert!(!inv.is_valid());
        assert_eq!(inv.effective_status(), InvitationStatus::Expired);
    }

    #[test]
    fn test_revoked_invitation_is_invalid() {
        let mut inv = invitation(24);
        inv.status = InvitationStatus::Revoked;
        assert!(!inv.is_valid());
        assert_eq!(inv.effective_status(), InvitationStatus::Revoked);
    }
}
