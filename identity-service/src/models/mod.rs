//! Domain entities. Every entity except the permission catalog is tenant-scoped.

pub mod audit_log;
pub mod invitation;
pub mod permission;
pub mod role;
pub mod session;
pub mod tenant;
pub mod user;

pub use audit_log::{AuditAction, AuditLog, AuditLogFilter, AuditOutcome};
pub use invitation::{Invitation, InvitationResponse, InvitationStatus};
pub use permission::{Permission, PermissionKey, PermissionSet, WILDCARD_ACTION};
pub use role::{Role, SystemRole};
pub use session::{Session, SessionInfo};
pub use tenant::{Tenant, TenantStatus};
pub use user::{User, UserResponse, UserStatus};

/// Error returned when a stored status code is not recognised.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} code: {code}")]
pub struct UnknownCode {
    pub kind: &'static str,
    pub code: String,
}
