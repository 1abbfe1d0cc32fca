//! Credential store: the persistence seam for tenants, users, roles, sessions,
//! invitations and audit logs.
//!
//! Every tenant-scoped lookup takes the tenant id, so a row belonging to another
//! tenant is indistinguishable from a missing row.

mod memory;
mod postgres;

pub use memory::MockCredentialStore;
pub use postgres::Database;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::ServiceError;
use crate::models::{
    AuditLog, AuditLogFilter, Invitation, InvitationStatus, Permission, PermissionKey, Role,
    Session, Tenant, User, UserStatus,
};

/// Everything created atomically by tenant registration.
#[derive(Debug, Clone)]
pub struct TenantRegistration {
    pub tenant: Tenant,
    pub roles: Vec<(Role, Vec<PermissionKey>)>,
    pub owner: User,
    pub owner_role_ids: Vec<Uuid>,
}

/// A role's parent link and direct permissions, used to resolve effective sets.
#[derive(Debug, Clone)]
pub struct RoleGrant {
    pub role_id: Uuid,
    pub parent_role_id: Option<Uuid>,
    pub permissions: Vec<PermissionKey>,
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub status: Option<UserStatus>,
    /// Case-insensitive substring of email or display name.
    pub search: Option<String>,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        let status_ok = self.status.map_or(true, |s| user.status == s);
        let search_ok = self.search.as_deref().map_or(true, |needle| {
            let needle = needle.to_lowercase();
            user.email.contains(&needle)
                || user
                    .display_name
                    .as_deref()
                    .is_some_and(|name| name.to_lowercase().contains(&needle))
        });
        status_ok && search_ok
    }
}

/// One page of results with the unpaged total.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn health_check(&self) -> Result<(), ServiceError>;

    // Tenants
    async fn register_tenant(&self, registration: &TenantRegistration) -> Result<(), ServiceError>;
    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, ServiceError>;
    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, ServiceError>;
    async fn update_tenant(&self, tenant: &Tenant) -> Result<(), ServiceError>;

    // Users. Lookups skip soft-deleted rows.
    async fn insert_user(&self, user: &User, role_ids: &[Uuid]) -> Result<(), ServiceError>;
    async fn find_user(&self, tenant_id: Uuid, user_id: Uuid)
        -> Result<Option<User>, ServiceError>;
    async fn find_user_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, ServiceError>;
    async fn list_users(
        &self,
        tenant_id: Uuid,
        filter: &UserFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<User>, ServiceError>;
    async fn update_user(&self, user: &User) -> Result<(), ServiceError>;
    /// Count a failed sign-in in one atomic step. Reaching `max_failures`
    /// sets `locked_until_utc = lock_until` and restarts the count. Returns
    /// whether this failure locked the account.
    async fn record_failed_login(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        max_failures: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;
    /// Clear the failure count and stamp `last_login_utc`, unless the account
    /// is locked at `now`. Returns `false` when a lock is in force.
    async fn record_successful_login(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;
    /// Remove one backup code hash. Returns `false` if it was not present,
    /// so two concurrent uses of a code cannot both succeed.
    async fn consume_backup_code(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        code_hash: &str,
    ) -> Result<bool, ServiceError>;
    /// Write only the two-factor columns of `user`.
    async fn update_mfa(&self, user: &User) -> Result<(), ServiceError>;
    async fn set_user_roles(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role_ids: &[Uuid],
    ) -> Result<(), ServiceError>;
    async fn user_role_ids(&self, tenant_id: Uuid, user_id: Uuid)
        -> Result<Vec<Uuid>, ServiceError>;

    // Roles
    async fn insert_role(
        &self,
        role: &Role,
        permissions: &[PermissionKey],
    ) -> Result<(), ServiceError>;
    async fn find_role(&self, tenant_id: Uuid, role_id: Uuid)
        -> Result<Option<Role>, ServiceError>;
    async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<Role>, ServiceError>;
    async fn update_role(&self, role: &Role) -> Result<(), ServiceError>;
    /// Removes the role together with its grants and user assignments.
    async fn delete_role(&self, tenant_id: Uuid, role_id: Uuid) -> Result<(), ServiceError>;
    async fn role_permissions(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
    ) -> Result<Vec<PermissionKey>, ServiceError>;
    async fn set_role_permissions(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        permissions: &[PermissionKey],
    ) -> Result<(), ServiceError>;
    async fn role_grants(&self, tenant_id: Uuid) -> Result<Vec<RoleGrant>, ServiceError>;

    // Permission catalog
    async fn list_permissions(&self) -> Result<Vec<Permission>, ServiceError>;
    async fn upsert_permissions(&self, permissions: &[Permission]) -> Result<(), ServiceError>;

    // Sessions
    async fn insert_session(&self, session: &Session) -> Result<(), ServiceError>;
    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, ServiceError>;
    /// Swap the refresh token hash only if the stored hash still equals
    /// `expected_hash` and the session is live. Returns whether the swap happened.
    async fn rotate_session_token(
        &self,
        session_id: Uuid,
        expected_hash: &str,
        new_hash: &str,
    ) -> Result<bool, ServiceError>;
    async fn list_active_sessions(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Session>, ServiceError>;
    /// Returns `false` when the session was already revoked or does not exist.
    async fn revoke_session(&self, session_id: Uuid) -> Result<bool, ServiceError>;
    /// Revokes every live session of the user except `keep`. Returns the revoked ids.
    async fn revoke_user_sessions(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        keep: Option<Uuid>,
    ) -> Result<Vec<Uuid>, ServiceError>;
    async fn revoke_tenant_sessions(&self, tenant_id: Uuid) -> Result<Vec<Uuid>, ServiceError>;

    // Invitations
    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), ServiceError>;
    async fn find_invitation(
        &self,
        tenant_id: Uuid,
        invitation_id: Uuid,
    ) -> Result<Option<Invitation>, ServiceError>;
    async fn find_invitation_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Invitation>, ServiceError>;
    async fn find_pending_invitation_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<Invitation>, ServiceError>;
    async fn list_invitations(
        &self,
        tenant_id: Uuid,
        status: Option<InvitationStatus>,
    ) -> Result<Vec<Invitation>, ServiceError>;
    async fn update_invitation(&self, invitation: &Invitation) -> Result<(), ServiceError>;
    /// Creates the user, assigns roles and marks the invitation accepted in one
    /// step. Fails with `Conflict` if the invitation is no longer pending.
    async fn accept_invitation(
        &self,
        invitation: &Invitation,
        user: &User,
        role_ids: &[Uuid],
    ) -> Result<(), ServiceError>;

    // Audit
    async fn insert_audit_log(&self, log: &AuditLog) -> Result<(), ServiceError>;
    async fn list_audit_logs(
        &self,
        tenant_id: Uuid,
        filter: &AuditLogFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<AuditLog>, ServiceError>;
}
