//! Effective permission resolution over role assignments and the role hierarchy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use super::store::{CredentialStore, RoleGrant};
use super::ServiceError;
use crate::models::{PermissionKey, PermissionSet};

#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn CredentialStore>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Union of every assigned role's permissions, parents included.
    pub async fn effective_permissions(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<PermissionSet, ServiceError> {
        let role_ids = self.store.user_role_ids(tenant_id, user_id).await?;
        if role_ids.is_empty() {
            return Ok(PermissionSet::new());
        }
        let grants = index(self.store.role_grants(tenant_id).await?);
        Ok(resolve(&grants, &role_ids))
    }

    /// Permissions of a single role including everything it inherits.
    pub async fn role_effective_permissions(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
    ) -> Result<PermissionSet, ServiceError> {
        let grants = index(self.store.role_grants(tenant_id).await?);
        Ok(resolve(&grants, &[role_id]))
    }

    pub async fn check(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        resource: &str,
        action: &str,
    ) -> Result<bool, ServiceError> {
        Ok(self
            .effective_permissions(tenant_id, user_id)
            .await?
            .allows(resource, action))
    }

    /// Reject a parent link that would make `role_id` its own ancestor.
    pub async fn ensure_acyclic(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        new_parent: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let Some(parent) = new_parent else {
            return Ok(());
        };
        let grants = index(self.store.role_grants(tenant_id).await?);
        if !grants.contains_key(&parent) {
            return Err(ServiceError::Validation(
                "Parent role does not exist in this tenant".to_string(),
            ));
        }
        if creates_cycle(&grants, role_id, parent) {
            return Err(ServiceError::Validation(
                "Parent role would create a cycle in the role hierarchy".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse `resource:action` strings and require each to be in the catalog.
    pub async fn catalog_keys(&self, raw: &[String]) -> Result<Vec<PermissionKey>, ServiceError> {
        let catalog: HashSet<PermissionKey> = self
            .store
            .list_permissions()
            .await?
            .iter()
            .map(|p| p.key())
            .collect();

        let mut keys = Vec::with_capacity(raw.len());
        for entry in raw {
            let key: PermissionKey = entry.parse().map_err(ServiceError::Validation)?;
            if !catalog.contains(&key) {
                return Err(ServiceError::Validation(format!(
                    "Unknown permission '{}'",
                    key
                )));
            }
            keys.push(key);
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

fn index(grants: Vec<RoleGrant>) -> HashMap<Uuid, RoleGrant> {
    grants.into_iter().map(|g| (g.role_id, g)).collect()
}

/// Walk each role's parent chain once. A cycle in stored data ends the walk.
fn resolve(grants: &HashMap<Uuid, RoleGrant>, role_ids: &[Uuid]) -> PermissionSet {
    let mut set = PermissionSet::new();
    let mut visited = HashSet::new();

    for &start in role_ids {
        let mut current = Some(start);
        while let Some(role_id) = current {
            if !visited.insert(role_id) {
                break;
            }
            let Some(grant) = grants.get(&role_id) else {
                break;
            };
            set.extend(grant.permissions.iter().cloned());
            current = grant.parent_role_id;
        }
    }

    set
}

fn creates_cycle(grants: &HashMap<Uuid, RoleGrant>, role_id: Uuid, new_parent: Uuid) -> bool {
    let mut seen = HashSet::new();
    let mut current = Some(new_parent);
    while let Some(id) = current {
        if id == role_id {
            return true;
        }
        if !seen.insert(id) {
            return false;
        }
        current = grants.get(&id).and_then(|g| g.parent_role_id);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(role_id: Uuid, parent: Option<Uuid>, keys: &[&str]) -> RoleGrant {
        RoleGrant {
            role_id,
            parent_role_id: parent,
            permissions: keys.iter().map(|k| k.parse().unwrap()).collect(),
        }
    }

    #[test]
    fn test_union_over_roles() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let grants = index(vec![
            grant(a, None, &["users:read"]),
            grant(b, None, &["roles:read"]),
        ]);
        let set = resolve(&grants, &[a, b]);
        assert!(set.allows("users", "read"));
        assert!(set.allows("roles", "read"));
        assert!(!set.allows("users", "delete"));
    }

    #[test]
    fn test_wildcard_subsumes_actions() {
        let a = Uuid::new_v4();
        let set = resolve(&index(vec![grant(a, None, &["users:*"])]), &[a]);
        assert!(set.allows("users", "delete"));
        assert!(!set.allows("roles", "read"));
    }

    #[test]
    fn test_inherits_parent_chain() {
        let (root, mid, leaf) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let grants = index(vec![
            grant(root, None, &["audit_logs:read"]),
            grant(mid, Some(root), &["roles:read"]),
            grant(leaf, Some(mid), &["users:read"]),
        ]);
        let set = resolve(&grants, &[leaf]);
        assert!(set.allows("audit_logs", "read"));
        assert!(set.allows("roles", "read"));
    }

    #[test]
    fn test_stored_cycle_terminates() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let grants = index(vec![
            grant(a, Some(b), &["users:read"]),
            grant(b, Some(a), &["roles:read"]),
        ]);
        let set = resolve(&grants, &[a]);
        assert!(set.allows("roles", "read"));
    }

    #[test]
    fn test_cycle_detection() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let grants = index(vec![
            grant(a, None, &[]),
            grant(b, Some(a), &[]),
            grant(c, Some(b), &[]),
        ]);
        assert!(creates_cycle(&grants, a, c));
        assert!(creates_cycle(&grants, a, a));
        assert!(!creates_cycle(&grants, c, a));
    }
}
