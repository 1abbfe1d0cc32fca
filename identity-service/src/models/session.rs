//! Session model - one row per device login, carrying the current refresh token hash.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Refresh session entity.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub token_hash: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub last_used_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a session. The token hash is filled in once the refresh token is signed.
    pub fn new(
        user_id: Uuid,
        tenant_id: Uuid,
        expiry_days: i64,
        user_agent: Option<String>,
        ip_address: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            tenant_id,
            token_hash: String::new(),
            user_agent,
            ip_address,
            created_utc: now,
            last_used_utc: now,
            expiry_utc: now + Duration::days(expiry_days),
            revoked_utc: None,
        }
    }

    /// Check if session is valid (not expired, not revoked).
    pub fn is_valid(&self) -> bool {
        !self.is_revoked() && !self.is_expired()
    }

    pub fn is_expired(&self) -> bool {
        self.expiry_utc <= Utc::now()
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }
}

/// Session info for API responses.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub last_used_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub is_current: bool,
}

impl SessionInfo {
    pub fn from_session(s: Session, current_session_id: Option<Uuid>) -> Self {
        Self {
            is_current: current_session_id == Some(s.session_id),
            session_id: s.session_id,
            user_agent: s.user_agent,
            ip_address: s.ip_address,
            created_utc: s.created_utc,
            last_used_utc: s.last_used_utc,
            expiry_utc: s.expiry_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_validity() {
        let mut session = Session::new(Uuid::new_v4(), Uuid::new_v4(), 7, None, None);
        assert!(session.is_valid());

        session.revoked_utc = Some(Utc::now());
        assert!(session.is_revoked());
        assert!(!session.is_valid());
    }

    #[test]
    fn test_expired_session_is_invalid() {
        let mut session = Session::new(Uuid::new_v4(), Uuid::new_v4(), 7, None, None);
        session.expiry_utc = Utc::now() - Duration::seconds(1);
        assert!(session.is_expired());
        assert!(!session.is_valid());
    }

    #[test]
    fn test_session_info_marks_current() {
        let session = Session::new(Uuid::new_v4(), Uuid::new_v4(), 7, None, None);
        let id = session.session_id;
        assert!(SessionInfo::from_session(session.clone(), Some(id)).is_current);
        assert!(!SessionInfo::from_session(session, None).is_current);
    }
}
