//! PostgreSQL connection management.

use crate::config::DatabaseConfig;
use crate::models::Permission;
use crate::services::{CredentialStore, ServiceError};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!(
        max_connections = config.max_connections,
        "Connecting to PostgreSQL"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await?;

    tracing::info!("Successfully connected to PostgreSQL");

    Ok(pool)
}

/// Make sure the built-in permission catalog is present in the store.
pub async fn seed_permission_catalog(store: &dyn CredentialStore) -> Result<(), ServiceError> {
    let catalog = Permission::default_catalog();
    store.upsert_permissions(&catalog).await?;
    tracing::info!(count = catalog.len(), "Permission catalog seeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MockCredentialStore;

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = MockCredentialStore::new();
        seed_permission_catalog(&store).await.unwrap();
        seed_permission_catalog(&store).await.unwrap();

        let listed = store.list_permissions().await.unwrap();
        assert_eq!(listed.len(), Permission::default_catalog().len());
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn test_create_pool() {
        let config = DatabaseConfig {
            url: "postgres://localhost/identity_test".to_string(),
            max_connections: 5,
            min_connections: 1,
        };

        assert!(create_pool(&config).await.is_ok());
    }
}
