use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{CredentialStore, Page, RoleGrant, TenantRegistration, UserFilter};
use crate::models::{
    AuditLog, AuditLogFilter, Invitation, InvitationStatus, Permission, PermissionKey, Role,
    Session, Tenant, User,
};
use crate::services::ServiceError;

#[derive(Default)]
struct MemoryState {
    tenants: HashMap<Uuid, Tenant>,
    users: HashMap<Uuid, User>,
    user_roles: HashMap<Uuid, HashSet<Uuid>>,
    roles: HashMap<Uuid, Role>,
    role_permissions: HashMap<Uuid, Vec<PermissionKey>>,
    permissions: Vec<Permission>,
    sessions: HashMap<Uuid, Session>,
    invitations: HashMap<Uuid, Invitation>,
    audit_logs: Vec<AuditLog>,
}

impl MemoryState {
    fn live_user_mut(&mut self, tenant_id: Uuid, user_id: Uuid) -> Result<&mut User, ServiceError> {
        self.users
            .get_mut(&user_id)
            .filter(|u| u.tenant_id == tenant_id && !u.is_deleted())
            .ok_or(ServiceError::NotFound("User"))
    }

    fn email_taken(&self, tenant_id: Uuid, email: &str, except: Option<Uuid>) -> bool {
        self.users.values().any(|u| {
            u.tenant_id == tenant_id
                && !u.is_deleted()
                && u.email.eq_ignore_ascii_case(email)
                && Some(u.user_id) != except
        })
    }

    fn role_name_taken(&self, tenant_id: Uuid, name: &str, except: Option<Uuid>) -> bool {
        self.roles
            .values()
            .any(|r| r.tenant_id == tenant_id && r.name == name && Some(r.role_id) != except)
    }

    fn insert_user(&mut self, user: &User, role_ids: &[Uuid]) -> Result<(), ServiceError> {
        if self.email_taken(user.tenant_id, &user.email, None) {
            return Err(ServiceError::Conflict(
                "A user with this email already exists".to_string(),
            ));
        }
        self.users.insert(user.user_id, user.clone());
        self.assign_roles(user.tenant_id, user.user_id, role_ids);
        Ok(())
    }

    /// Keeps only roles that exist in the tenant.
    fn assign_roles(&mut self, tenant_id: Uuid, user_id: Uuid, role_ids: &[Uuid]) {
        let owned: HashSet<Uuid> = role_ids
            .iter()
            .copied()
            .filter(|id| self.roles.get(id).is_some_and(|r| r.tenant_id == tenant_id))
            .collect();
        self.user_roles.insert(user_id, owned);
    }

    fn insert_role(&mut self, role: &Role, permissions: &[PermissionKey]) -> Result<(), ServiceError> {
        if self.role_name_taken(role.tenant_id, &role.name, None) {
            return Err(ServiceError::Conflict(
                "A role with this name already exists".to_string(),
            ));
        }
        self.roles.insert(role.role_id, role.clone());
        self.role_permissions
            .insert(role.role_id, dedup(permissions));
        Ok(())
    }

    fn revoke_where<F>(&mut self, predicate: F) -> Vec<Uuid>
    where
        F: Fn(&Session) -> bool,
    {
        let now = Utc::now();
        self.sessions
            .values_mut()
            .filter(|s| !s.is_revoked() && predicate(s))
            .map(|s| {
                s.revoked_utc = Some(now);
                s.session_id
            })
            .collect()
    }
}

fn dedup(permissions: &[PermissionKey]) -> Vec<PermissionKey> {
    let mut keys = permissions.to_vec();
    keys.sort();
    keys.dedup();
    keys
}

fn paginate<T>(items: Vec<T>, limit: i64, offset: i64) -> Page<T> {
    let total = items.len() as i64;
    let items = items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect();
    Page { items, total }
}

/// In-memory credential store for tests and local runs. Enforces the same
/// uniqueness and tenant scoping rules as the PostgreSQL store.
#[derive(Default)]
pub struct MockCredentialStore {
    state: Mutex<MemoryState>,
}

impl MockCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, ServiceError> {
        self.state
            .lock()
            .map_err(|_| ServiceError::Internal(anyhow::anyhow!("credential store lock poisoned")))
    }
}

#[async_trait]
impl CredentialStore for MockCredentialStore {
    async fn health_check(&self) -> Result<(), ServiceError> {
        self.state().map(|_| ())
    }

    // ==================== Tenants ====================

    async fn register_tenant(&self, registration: &TenantRegistration) -> Result<(), ServiceError> {
        let mut state = self.state()?;
        let tenant = &registration.tenant;
        if state.tenants.values().any(|t| t.slug == tenant.slug) {
            return Err(ServiceError::Conflict(
                "Tenant slug is already taken".to_string(),
            ));
        }

        state.tenants.insert(tenant.tenant_id, tenant.clone());
        for (role, permissions) in &registration.roles {
            state.insert_role(role, permissions)?;
        }
        state.insert_user(&registration.owner, &registration.owner_role_ids)
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, ServiceError> {
        Ok(self.state()?.tenants.get(&tenant_id).cloned())
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, ServiceError> {
        Ok(self
            .state()?
            .tenants
            .values()
            .find(|t| t.slug == slug)
            .cloned())
    }

    async fn update_tenant(&self, tenant: &Tenant) -> Result<(), ServiceError> {
        let mut state = self.state()?;
        if let Some(existing) = state.tenants.get_mut(&tenant.tenant_id) {
            existing.name = tenant.name.clone();
            existing.status = tenant.status;
            existing.updated_utc = tenant.updated_utc;
        }
        Ok(())
    }

    // ==================== Users ====================

    async fn insert_user(&self, user: &User, role_ids: &[Uuid]) -> Result<(), ServiceError> {
        self.state()?.insert_user(user, role_ids)
    }

    async fn find_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<User>, ServiceError> {
        Ok(self
            .state()?
            .users
            .get(&user_id)
            .filter(|u| u.tenant_id == tenant_id && !u.is_deleted())
            .cloned())
    }

    async fn find_user_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, ServiceError> {
        let email = email.trim();
        Ok(self
            .state()?
            .users
            .values()
            .find(|u| {
                u.tenant_id == tenant_id && !u.is_deleted() && u.email.eq_ignore_ascii_case(email)
            })
            .cloned())
    }

    async fn list_users(
        &self,
        tenant_id: Uuid,
        filter: &UserFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<User>, ServiceError> {
        let state = self.state()?;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| u.tenant_id == tenant_id && !u.is_deleted() && filter.matches(u))
            .cloned()
            .collect();
        users.sort_by_key(|u| u.created_utc);
        Ok(paginate(users, limit, offset))
    }

    async fn update_user(&self, user: &User) -> Result<(), ServiceError> {
        let mut state = self.state()?;
        if !user.is_deleted() && state.email_taken(user.tenant_id, &user.email, Some(user.user_id))
        {
            return Err(ServiceError::Conflict(
                "A user with this email already exists".to_string(),
            ));
        }
        match state.users.get_mut(&user.user_id) {
            Some(existing) if existing.tenant_id == user.tenant_id => {
                *existing = user.clone();
                Ok(())
            }
            _ => Err(ServiceError::NotFound("User")),
        }
    }

    async fn record_failed_login(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        max_failures: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let mut state = self.state()?;
        let user = state.live_user_mut(tenant_id, user_id)?;
        user.failed_login_count += 1;
        let locked = user.failed_login_count as u32 >= max_failures;
        if locked {
            user.failed_login_count = 0;
            user.locked_until_utc = Some(lock_until);
        }
        user.updated_utc = Utc::now();
        Ok(locked)
    }

    async fn record_successful_login(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let mut state = self.state()?;
        let user = state.live_user_mut(tenant_id, user_id)?;
        if user.is_locked(now) {
            return Ok(false);
        }
        user.failed_login_count = 0;
        user.locked_until_utc = None;
        user.last_login_utc = Some(now);
        user.updated_utc = now;
        Ok(true)
    }

    async fn consume_backup_code(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        code_hash: &str,
    ) -> Result<bool, ServiceError> {
        let mut state = self.state()?;
        let user = state.live_user_mut(tenant_id, user_id)?;
        match user.backup_code_hashes.iter().position(|h| h == code_hash) {
            Some(idx) => {
                user.backup_code_hashes.remove(idx);
                user.updated_utc = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_mfa(&self, user: &User) -> Result<(), ServiceError> {
        let mut state = self.state()?;
        let existing = state.live_user_mut(user.tenant_id, user.user_id)?;
        existing.mfa_enabled = user.mfa_enabled;
        existing.mfa_secret = user.mfa_secret.clone();
        existing.backup_code_hashes = user.backup_code_hashes.clone();
        existing.updated_utc = user.updated_utc;
        Ok(())
    }

    async fn set_user_roles(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role_ids: &[Uuid],
    ) -> Result<(), ServiceError> {
        self.state()?.assign_roles(tenant_id, user_id, role_ids);
        Ok(())
    }

    async fn user_role_ids(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Uuid>, ServiceError> {
        let state = self.state()?;
        let mut roles: Vec<&Role> = state
            .user_roles
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.roles.get(id))
            .filter(|r| r.tenant_id == tenant_id)
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles.into_iter().map(|r| r.role_id).collect())
    }

    // ==================== Roles ====================

    async fn insert_role(
        &self,
        role: &Role,
        permissions: &[PermissionKey],
    ) -> Result<(), ServiceError> {
        self.state()?.insert_role(role, permissions)
    }

    async fn find_role(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
    ) -> Result<Option<Role>, ServiceError> {
        Ok(self
            .state()?
            .roles
            .get(&role_id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<Role>, ServiceError> {
        let mut roles: Vec<Role> = self
            .state()?
            .roles
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn update_role(&self, role: &Role) -> Result<(), ServiceError> {
        let mut state = self.state()?;
        if state.role_name_taken(role.tenant_id, &role.name, Some(role.role_id)) {
            return Err(ServiceError::Conflict(
                "A role with this name already exists".to_string(),
            ));
        }
        match state.roles.get_mut(&role.role_id) {
            Some(existing) if existing.tenant_id == role.tenant_id => {
                *existing = role.clone();
                Ok(())
            }
            _ => Err(ServiceError::NotFound("Role")),
        }
    }

    async fn delete_role(&self, tenant_id: Uuid, role_id: Uuid) -> Result<(), ServiceError> {
        let mut state = self.state()?;
        if !state.roles.get(&role_id).is_some_and(|r| r.tenant_id == tenant_id) {
            return Ok(());
        }
        state.roles.remove(&role_id);
        state.role_permissions.remove(&role_id);
        for assigned in state.user_roles.values_mut() {
            assigned.remove(&role_id);
        }
        Ok(())
    }

    async fn role_permissions(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
    ) -> Result<Vec<PermissionKey>, ServiceError> {
        let state = self.state()?;
        if !state.roles.get(&role_id).is_some_and(|r| r.tenant_id == tenant_id) {
            return Ok(Vec::new());
        }
        Ok(state
            .role_permissions
            .get(&role_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_role_permissions(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        permissions: &[PermissionKey],
    ) -> Result<(), ServiceError> {
        let mut state = self.state()?;
        if !state.roles.get(&role_id).is_some_and(|r| r.tenant_id == tenant_id) {
            return Err(ServiceError::NotFound("Role"));
        }
        state.role_permissions.insert(role_id, dedup(permissions));
        Ok(())
    }

    async fn role_grants(&self, tenant_id: Uuid) -> Result<Vec<RoleGrant>, ServiceError> {
        let state = self.state()?;
        Ok(state
            .roles
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| RoleGrant {
                role_id: r.role_id,
                parent_role_id: r.parent_role_id,
                permissions: state
                    .role_permissions
                    .get(&r.role_id)
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect())
    }

    // ==================== Permission catalog ====================

    async fn list_permissions(&self) -> Result<Vec<Permission>, ServiceError> {
        let mut permissions = self.state()?.permissions.clone();
        permissions.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(permissions)
    }

    async fn upsert_permissions(&self, permissions: &[Permission]) -> Result<(), ServiceError> {
        let mut state = self.state()?;
        for permission in permissions {
            match state
                .permissions
                .iter_mut()
                .find(|p| p.key() == permission.key())
            {
                Some(existing) => existing.description = permission.description.clone(),
                None => state.permissions.push(permission.clone()),
            }
        }
        Ok(())
    }

    // ==================== Sessions ====================

    async fn insert_session(&self, session: &Session) -> Result<(), ServiceError> {
        self.state()?
            .sessions
            .insert(session.session_id, session.clone());
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, ServiceError> {
        Ok(self.state()?.sessions.get(&session_id).cloned())
    }

    async fn rotate_session_token(
        &self,
        session_id: Uuid,
        expected_hash: &str,
        new_hash: &str,
    ) -> Result<bool, ServiceError> {
        let mut state = self.state()?;
        match state.sessions.get_mut(&session_id) {
            Some(session) if session.is_valid() && session.token_hash == expected_hash => {
                session.token_hash = new_hash.to_string();
                session.last_used_utc = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_active_sessions(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Session>, ServiceError> {
        let mut sessions: Vec<Session> = self
            .state()?
            .sessions
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.user_id == user_id && s.is_valid())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_used_utc.cmp(&a.last_used_utc));
        Ok(sessions)
    }

    async fn revoke_session(&self, session_id: Uuid) -> Result<bool, ServiceError> {
        Ok(!self
            .state()?
            .revoke_where(|s| s.session_id == session_id)
            .is_empty())
    }

    async fn revoke_user_sessions(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        keep: Option<Uuid>,
    ) -> Result<Vec<Uuid>, ServiceError> {
        Ok(self.state()?.revoke_where(|s| {
            s.tenant_id == tenant_id && s.user_id == user_id && Some(s.session_id) != keep
        }))
    }

    async fn revoke_tenant_sessions(&self, tenant_id: Uuid) -> Result<Vec<Uuid>, ServiceError> {
        Ok(self.state()?.revoke_where(|s| s.tenant_id == tenant_id))
    }

    // ==================== Invitations ====================

    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), ServiceError> {
        self.state()?
            .invitations
            .insert(invitation.invitation_id, invitation.clone());
        Ok(())
    }

    async fn find_invitation(
        &self,
        tenant_id: Uuid,
        invitation_id: Uuid,
    ) -> Result<Option<Invitation>, ServiceError> {
        Ok(self
            .state()?
            .invitations
            .get(&invitation_id)
            .filter(|i| i.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_invitation_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Invitation>, ServiceError> {
        Ok(self
            .state()?
            .invitations
            .values()
            .find(|i| i.token_hash == token_hash)
            .cloned())
    }

    async fn find_pending_invitation_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<Invitation>, ServiceError> {
        let email = email.trim();
        Ok(self
            .state()?
            .invitations
            .values()
            .filter(|i| {
                i.tenant_id == tenant_id && i.is_valid() && i.email.eq_ignore_ascii_case(email)
            })
            .max_by_key(|i| i.created_utc)
            .cloned())
    }

    async fn list_invitations(
        &self,
        tenant_id: Uuid,
        status: Option<InvitationStatus>,
    ) -> Result<Vec<Invitation>, ServiceError> {
        let mut invitations: Vec<Invitation> = self
            .state()?
            .invitations
            .values()
            .filter(|i| i.tenant_id == tenant_id)
            .filter(|i| status.map_or(true, |wanted| i.effective_status() == wanted))
            .cloned()
            .collect();
        invitations.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(invitations)
    }

    async fn update_invitation(&self, invitation: &Invitation) -> Result<(), ServiceError> {
        let mut state = self.state()?;
        match state.invitations.get_mut(&invitation.invitation_id) {
            Some(existing) if existing.tenant_id == invitation.tenant_id => {
                *existing = invitation.clone();
                Ok(())
            }
            _ => Err(ServiceError::NotFound("Invitation")),
        }
    }

    async fn accept_invitation(
        &self,
        invitation: &Invitation,
        user: &User,
        role_ids: &[Uuid],
    ) -> Result<(), ServiceError> {
        let mut state = self.state()?;
        let pending = state
            .invitations
            .get(&invitation.invitation_id)
            .is_some_and(|i| i.status == InvitationStatus::Pending);
        if !pending {
            return Err(ServiceError::Conflict(
                "Invitation is no longer pending".to_string(),
            ));
        }

        state.insert_user(user, role_ids)?;
        if let Some(stored) = state.invitations.get_mut(&invitation.invitation_id) {
            stored.status = InvitationStatus::Accepted;
            stored.accepted_utc = Some(Utc::now());
            stored.accepted_user_id = Some(user.user_id);
        }
        Ok(())
    }

    // ==================== Audit ====================

    async fn insert_audit_log(&self, log: &AuditLog) -> Result<(), ServiceError> {
        self.state()?.audit_logs.push(log.clone());
        Ok(())
    }

    async fn list_audit_logs(
        &self,
        tenant_id: Uuid,
        filter: &AuditLogFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<AuditLog>, ServiceError> {
        let state = self.state()?;
        // Newest first; the log is append-only so reverse insertion order.
        let logs: Vec<AuditLog> = state
            .audit_logs
            .iter()
            .rev()
            .filter(|l| l.tenant_id == tenant_id && filter.matches(l))
            .cloned()
            .collect();
        Ok(paginate(logs, limit, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SystemRole;

    fn registration(slug: &str) -> TenantRegistration {
        let tenant = Tenant::new(slug.to_string(), "Acme".to_string());
        let roles: Vec<(Role, Vec<PermissionKey>)> = SystemRole::ALL
            .iter()
            .map(|r| (r.to_role(tenant.tenant_id), r.permissions()))
            .collect();
        let owner_role_ids = vec![roles[0].0.role_id];
        let owner = User::new(tenant.tenant_id, "owner@acme.io", "hash".to_string(), None);
        TenantRegistration {
            tenant,
            roles,
            owner,
            owner_role_ids,
        }
    }

    #[tokio::test]
    async fn test_duplicate_slug_conflicts() {
        let store = MockCredentialStore::new();
        store.register_tenant(&registration("acme")).await.unwrap();
        let err = store.register_tenant(&registration("acme")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_users_are_tenant_scoped() {
        let store = MockCredentialStore::new();
        let reg = registration("acme");
        store.register_tenant(&reg).await.unwrap();

        let other_tenant = Uuid::new_v4();
        assert!(store
            .find_user(other_tenant, reg.owner.user_id)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_user_by_email(reg.tenant.tenant_id, "OWNER@acme.io")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_rotate_requires_current_hash() {
        let store = MockCredentialStore::new();
        let mut session = Session::new(Uuid::new_v4(), Uuid::new_v4(), 7, None, None);
        session.token_hash = "h1".to_string();
        store.insert_session(&session).await.unwrap();

        assert!(store
            .rotate_session_token(session.session_id, "h1", "h2")
            .await
            .unwrap());
        assert!(!store
            .rotate_session_token(session.session_id, "h1", "h3")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_revoke_user_sessions_keeps_current() {
        let store = MockCredentialStore::new();
        let (user, tenant) = (Uuid::new_v4(), Uuid::new_v4());
        let keep = Session::new(user, tenant, 7, None, None);
        let other = Session::new(user, tenant, 7, None, None);
        store.insert_session(&keep).await.unwrap();
        store.insert_session(&other).await.unwrap();

        let revoked = store
            .revoke_user_sessions(tenant, user, Some(keep.session_id))
            .await
            .unwrap();
        assert_eq!(revoked, vec![other.session_id]);
        assert_eq!(store.list_active_sessions(tenant, user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_accept_invitation_only_once() {
        let store = MockCredentialStore::new();
        let reg = registration("acme");
        store.register_tenant(&reg).await.unwrap();
        let tenant_id = reg.tenant.tenant_id;

        let invitation = Invitation::new(
            tenant_id,
            "new@acme.io",
            vec![],
            "th".to_string(),
            24,
            reg.owner.user_id,
        );
        store.insert_invitation(&invitation).await.unwrap();

        let first = User::new(tenant_id, "new@acme.io", "hash".to_string(), None);
        store.accept_invitation(&invitation, &first, &[]).await.unwrap();

        let second = User::new(tenant_id, "new@acme.io", "hash".to_string(), None);
        let err = store
            .accept_invitation(&invitation, &second, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_deleting_role_drops_assignments() {
        let store = MockCredentialStore::new();
        let reg = registration("acme");
        store.register_tenant(&reg).await.unwrap();
        let tenant_id = reg.tenant.tenant_id;
        let owner_role = reg.owner_role_ids[0];

        store.delete_role(tenant_id, owner_role).await.unwrap();
        assert!(store
            .user_role_ids(tenant_id, reg.owner.user_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failed_logins_lock_at_threshold() {
        let store = MockCredentialStore::new();
        let reg = registration("acme");
        store.register_tenant(&reg).await.unwrap();
        let (tenant_id, user_id) = (reg.tenant.tenant_id, reg.owner.user_id);
        let until = Utc::now() + chrono::Duration::minutes(15);

        assert!(!store.record_failed_login(tenant_id, user_id, 2, until).await.unwrap());
        assert!(store.record_failed_login(tenant_id, user_id, 2, until).await.unwrap());

        let user = store.find_user(tenant_id, user_id).await.unwrap().unwrap();
        assert_eq!(user.failed_login_count, 0);
        assert_eq!(user.locked_until_utc, Some(until));
        assert!(!store
            .record_successful_login(tenant_id, user_id, Utc::now())
            .await
            .unwrap());
        assert!(store
            .record_successful_login(tenant_id, user_id, until + chrono::Duration::seconds(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_backup_code_hash_consumed_once() {
        let store = MockCredentialStore::new();
        let mut reg = registration("acme");
        reg.owner.backup_code_hashes = vec!["aa".to_string(), "bb".to_string()];
        store.register_tenant(&reg).await.unwrap();
        let (tenant_id, user_id) = (reg.tenant.tenant_id, reg.owner.user_id);

        assert!(store.consume_backup_code(tenant_id, user_id, "bb").await.unwrap());
        assert!(!store.consume_backup_code(tenant_id, user_id, "bb").await.unwrap());
        let user = store.find_user(tenant_id, user_id).await.unwrap().unwrap();
        assert_eq!(user.backup_code_hashes, vec!["aa".to_string()]);
    }
}
