//! Audit log model - append-only security trail.

use super::UnknownCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    TenantRegister,
    TenantUpdate,
    TenantStatusChange,
    Login,
    MfaVerify,
    Refresh,
    Logout,
    TokenReuse,
    UserCreate,
    UserUpdate,
    UserDelete,
    UserRolesUpdate,
    PasswordChange,
    MfaEnroll,
    MfaEnable,
    MfaDisable,
    BackupCodesRegenerate,
    RoleCreate,
    RoleUpdate,
    RoleDelete,
    RolePermissionsUpdate,
    SessionRevoke,
    InvitationCreate,
    InvitationRevoke,
    InvitationAccept,
    AuthzDenied,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::TenantRegister => "tenant.register",
            AuditAction::TenantUpdate => "tenant.update",
            AuditAction::TenantStatusChange => "tenant.status_change",
            AuditAction::Login => "auth.login",
            AuditAction::MfaVerify => "auth.mfa_verify",
            AuditAction::Refresh => "auth.refresh",
            AuditAction::Logout => "auth.logout",
            AuditAction::TokenReuse => "auth.token_reuse",
            AuditAction::UserCreate => "user.create",
            AuditAction::UserUpdate => "user.update",
            AuditAction::UserDelete => "user.delete",
            AuditAction::UserRolesUpdate => "user.roles_update",
            AuditAction::PasswordChange => "user.password_change",
            AuditAction::MfaEnroll => "mfa.enroll",
            AuditAction::MfaEnable => "mfa.enable",
            AuditAction::MfaDisable => "mfa.disable",
            AuditAction::BackupCodesRegenerate => "mfa.backup_codes_regenerate",
            AuditAction::RoleCreate => "role.create",
            AuditAction::RoleUpdate => "role.update",
            AuditAction::RoleDelete => "role.delete",
            AuditAction::RolePermissionsUpdate => "role.permissions_update",
            AuditAction::SessionRevoke => "session.revoke",
            AuditAction::InvitationCreate => "invitation.create",
            AuditAction::InvitationRevoke => "invitation.revoke",
            AuditAction::InvitationAccept => "invitation.accept",
            AuditAction::AuthzDenied => "authz.denied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::Denied => "denied",
        }
    }
}

impl FromStr for AuditOutcome {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AuditOutcome::Success),
            "failure" => Ok(AuditOutcome::Failure),
            "denied" => Ok(AuditOutcome::Denied),
            other => Err(UnknownCode {
                kind: "audit outcome",
                code: other.to_string(),
            }),
        }
    }
}

/// Audit log entry. Never updated once written.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditLog {
    pub log_id: Uuid,
    pub tenant_id: Uuid,
    pub actor_user_id: Option<Uuid>,
    pub action: String,
    pub outcome: AuditOutcome,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(tenant_id: Uuid, action: AuditAction, outcome: AuditOutcome) -> Self {
        Self {
            log_id: Uuid::new_v4(),
            tenant_id,
            actor_user_id: None,
            action: action.as_str().to_string(),
            outcome,
            resource_type: None,
            resource_id: None,
            ip_address: None,
            user_agent: None,
            details: serde_json::Value::Null,
            created_utc: Utc::now(),
        }
    }

    pub fn actor(mut self, user_id: Uuid) -> Self {
        self.actor_user_id = Some(user_id);
        self
    }

    pub fn resource(mut self, resource_type: &str, resource_id: impl ToString) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Filters accepted by the audit log listing.
#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub actor_user_id: Option<Uuid>,
    pub action: Option<String>,
    pub outcome: Option<AuditOutcome>,
    pub from_utc: Option<DateTime<Utc>>,
    pub to_utc: Option<DateTime<Utc>>,
}

impl AuditLogFilter {
    pub fn matches(&self, log: &AuditLog) -> bool {
        self.actor_user_id
            .map_or(true, |actor| log.actor_user_id == Some(actor))
            && self.action.as_deref().map_or(true, |a| log.action == a)
            && self.outcome.map_or(true, |o| log.outcome == o)
            && self.from_utc.map_or(true, |from| log.created_utc >= from)
            && self.to_utc.map_or(true, |to| log.created_utc <= to)
    }
}
