//! Role model - tenant-scoped roles with optional parent inheritance.

use super::permission::{Permission, PermissionKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Role entity (tenant-scoped).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub role_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub parent_role_id: Option<Uuid>,
    pub is_system: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Role {
    pub fn new(
        tenant_id: Uuid,
        name: String,
        description: Option<String>,
        parent_role_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            role_id: Uuid::new_v4(),
            tenant_id,
            name,
            description,
            parent_role_id,
            is_system: false,
            created_utc: now,
            updated_utc: now,
        }
    }
}

/// Roles seeded into every tenant at registration. They cannot be modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemRole {
    Owner,
    Admin,
    Member,
}

impl SystemRole {
    pub const ALL: [SystemRole; 3] = [SystemRole::Owner, SystemRole::Admin, SystemRole::Member];

    pub fn name(&self) -> &'static str {
        match self {
            SystemRole::Owner => "owner",
            SystemRole::Admin => "admin",
            SystemRole::Member => "member",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            SystemRole::Owner => "Full control of the tenant",
            SystemRole::Admin => "Manages users, roles and invitations",
            SystemRole::Member => "Standard tenant member",
        }
    }

    pub fn permissions(&self) -> Vec<PermissionKey> {
        let keys = |list: &[&str]| {
            list.iter()
                .filter_map(|k| k.parse::<PermissionKey>().ok())
                .collect::<Vec<_>>()
        };
        match self {
            SystemRole::Owner => Permission::all_resources_wildcard(),
            SystemRole::Admin => keys(&[
                "users:*",
                "roles:*",
                "invitations:*",
                "sessions:*",
                "audit_logs:read",
                "tenant:read",
                "permissions:read",
            ]),
            SystemRole::Member => keys(&["tenant:read", "users:read", "permissions:read"]),
        }
    }

    /// Build the tenant's role row for this system role.
    pub fn to_role(&self, tenant_id: Uuid) -> Role {
        let mut role = Role::new(
            tenant_id,
            self.name().to_string(),
            Some(self.description().to_string()),
            None,
        );
        role.is_system = true;
        role
    }
}
