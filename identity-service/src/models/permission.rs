//! Permission model - global `(resource, action)` catalog and effective sets.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Action that grants every action on its resource.
pub const WILDCARD_ACTION: &str = "*";

/// Resources and the concrete actions the service checks against them.
const CATALOG: &[(&str, &[&str])] = &[
    ("tenant", &["read", "update"]),
    ("users", &["read", "create", "update", "delete"]),
    ("roles", &["read", "create", "update", "delete"]),
    ("permissions", &["read"]),
    ("invitations", &["read", "create", "delete"]),
    ("sessions", &["read", "delete"]),
    ("audit_logs", &["read"]),
];

/// A single `resource:action` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermissionKey {
    pub resource: String,
    pub action: String,
}

impl PermissionKey {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.action == WILDCARD_ACTION
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

impl FromStr for PermissionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s
            .split_once(':')
            .ok_or_else(|| format!("Permission '{}' must be resource:action", s))?;
        if resource.is_empty() || action.is_empty() || action.contains(':') {
            return Err(format!("Permission '{}' must be resource:action", s));
        }
        Ok(Self::new(resource, action))
    }
}

impl Serialize for PermissionKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PermissionKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub resource: String,
    pub action: String,
    pub description: String,
}

impl Permission {
    pub fn key(&self) -> PermissionKey {
        PermissionKey::new(&self.resource, &self.action)
    }

    /// Built-in catalog: every concrete action plus a wildcard per resource.
    pub fn default_catalog() -> Vec<Permission> {
        CATALOG
            .iter()
            .flat_map(|(resource, actions)| {
                actions
                    .iter()
                    .map(move |action| Permission {
                        resource: resource.to_string(),
                        action: action.to_string(),
                        description: format!("{} {}", action, resource.replace('_', " ")),
                    })
                    .chain(std::iter::once(Permission {
                        resource: resource.to_string(),
                        action: WILDCARD_ACTION.to_string(),
                        description: format!("any action on {}", resource.replace('_', " ")),
                    }))
            })
            .collect()
    }

    /// Wildcard grant on every catalog resource.
    pub fn all_resources_wildcard() -> Vec<PermissionKey> {
        CATALOG
            .iter()
            .map(|(resource, _)| PermissionKey::new(*resource, WILDCARD_ACTION))
            .collect()
    }
}

/// Effective permissions of a user: resource -> granted actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    grants: HashMap<String, HashSet<String>>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: PermissionKey) {
        self.grants.entry(key.resource).or_default().insert(key.action);
    }

    pub fn extend<I: IntoIterator<Item = PermissionKey>>(&mut self, keys: I) {
        for key in keys {
            self.insert(key);
        }
    }

    /// True when the exact action or the resource wildcard has been granted.
    pub fn allows(&self, resource: &str, action: &str) -> bool {
        self.grants
            .get(resource)
            .is_some_and(|actions| actions.contains(action) || actions.contains(WILDCARD_ACTION))
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Sorted `resource:action` keys.
    pub fn keys(&self) -> Vec<String> {
        self.grants
            .iter()
            .flat_map(|(resource, actions)| {
                actions
                    .iter()
                    .map(move |action| PermissionKey::new(resource.as_str(), action.as_str()))
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|key| key.to_string())
            .collect()
    }
}

impl FromIterator<PermissionKey> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = PermissionKey>>(iter: I) -> Self {
        let mut set = PermissionSet::new();
        set.extend(iter);
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key() {
        let key: PermissionKey = "users:read".parse().unwrap();
        assert_eq!(key.resource, "users");
        assert_eq!(key.action, "read");
        assert!(!key.is_wildcard());
        assert!("users".parse::<PermissionKey>().is_err());
        assert!(":read".parse::<PermissionKey>().is_err());
        assert!("users:read:own".parse::<PermissionKey>().is_err());
    }

    #[test]
    fn test_wildcard_subsumes_actions() {
        let set: PermissionSet = [PermissionKey::new("users", "*")].into_iter().collect();
        assert!(set.allows("users", "read"));
        assert!(set.allows("users", "delete"));
        assert!(set.allows("users", "anything"));
        assert!(!set.allows("roles", "read"));
    }

    #[test]
    fn test_exact_match_only() {
        let set: PermissionSet = [PermissionKey::new("roles", "read")].into_iter().collect();
        assert!(set.allows("roles", "read"));
        assert!(!set.allows("roles", "update"));
    }

    #[test]
    fn test_catalog_contains_wildcards() {
        let catalog = Permission::default_catalog();
        assert!(catalog
            .iter()
            .any(|p| p.resource == "users" && p.action == WILDCARD_ACTION));
        assert!(catalog
            .iter()
            .any(|p| p.resource == "audit_logs" && p.action == "read"));
    }

    #[test]
    fn test_keys_sorted() {
        let set: PermissionSet = ["users:read", "audit_logs:read", "users:*"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(set.keys(), vec!["audit_logs:read", "users:*", "users:read"]);
    }
}
