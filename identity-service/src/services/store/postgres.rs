//! PostgreSQL implementation of [`CredentialStore`] using sqlx runtime queries.
//!
//! Schema is provisioned outside this service. Expected layout:
//!
//! ```sql
//! tenants          (tenant_id UUID PK, slug TEXT UNIQUE, name TEXT, status_code TEXT,
//!                   created_utc TIMESTAMPTZ, updated_utc TIMESTAMPTZ)
//! users            (user_id UUID PK, tenant_id UUID, email TEXT, password_hash TEXT,
//!                   display_name TEXT NULL, status_code TEXT, mfa_enabled BOOL,
//!                   mfa_secret TEXT NULL, backup_code_hashes TEXT[], failed_login_count INT,
//!                   locked_until_utc, last_login_utc, created_utc, updated_utc, deleted_utc)
//!                   -- UNIQUE (tenant_id, email) WHERE deleted_utc IS NULL
//! roles            (role_id UUID PK, tenant_id UUID, name TEXT, description TEXT NULL,
//!                   parent_role_id UUID NULL, is_system BOOL, created_utc, updated_utc)
//!                   -- UNIQUE (tenant_id, name)
//! permissions      (resource TEXT, action TEXT, description TEXT, PK (resource, action))
//! role_permissions (role_id UUID, resource TEXT, action TEXT, PK (role_id, resource, action))
//! user_roles       (user_id UUID, role_id UUID, PK (user_id, role_id))
//! sessions         (session_id UUID PK, user_id UUID, tenant_id UUID, token_hash TEXT,
//!                   user_agent TEXT NULL, ip_address TEXT NULL, created_utc, last_used_utc,
//!                   expiry_utc, revoked_utc NULL)
//! invitations      (invitation_id UUID PK, tenant_id UUID, email TEXT, role_ids UUID[],
//!                   token_hash TEXT UNIQUE, status_code TEXT, invited_by_user_id UUID,
//!                   expiry_utc, accepted_utc NULL, accepted_user_id UUID NULL, created_utc)
//! audit_logs       (log_id UUID PK, tenant_id UUID, actor_user_id UUID NULL, action TEXT,
//!                   outcome_code TEXT, resource_type TEXT NULL, resource_id TEXT NULL,
//!                   ip_address TEXT NULL, user_agent TEXT NULL, details JSONB, created_utc)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{FromRow, PgConnection, Row};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use super::{CredentialStore, Page, RoleGrant, TenantRegistration, UserFilter};
use crate::models::{
    AuditLog, AuditLogFilter, Invitation, InvitationStatus, Permission, PermissionKey, Role,
    Session, Tenant, UnknownCode, User,
};
use crate::services::ServiceError;

const EMAIL_TAKEN: &str = "A user with this email already exists";
const ROLE_NAME_TAKEN: &str = "A role with this name already exists";

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_code<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = UnknownCode>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: UnknownCode| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

impl<'r> FromRow<'r, PgRow> for Tenant {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            tenant_id: row.try_get("tenant_id")?,
            slug: row.try_get("slug")?,
            name: row.try_get("name")?,
            status: decode_code(row, "status_code")?,
            created_utc: row.try_get("created_utc")?,
            updated_utc: row.try_get("updated_utc")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            user_id: row.try_get("user_id")?,
            tenant_id: row.try_get("tenant_id")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            display_name: row.try_get("display_name")?,
            status: decode_code(row, "status_code")?,
            mfa_enabled: row.try_get("mfa_enabled")?,
            mfa_secret: row.try_get("mfa_secret")?,
            backup_code_hashes: row.try_get("backup_code_hashes")?,
            failed_login_count: row.try_get("failed_login_count")?,
            locked_until_utc: row.try_get("locked_until_utc")?,
            last_login_utc: row.try_get("last_login_utc")?,
            created_utc: row.try_get("created_utc")?,
            updated_utc: row.try_get("updated_utc")?,
            deleted_utc: row.try_get("deleted_utc")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Role {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            role_id: row.try_get("role_id")?,
            tenant_id: row.try_get("tenant_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            parent_role_id: row.try_get("parent_role_id")?,
            is_system: row.try_get("is_system")?,
            created_utc: row.try_get("created_utc")?,
            updated_utc: row.try_get("updated_utc")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Permission {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            resource: row.try_get("resource")?,
            action: row.try_get("action")?,
            description: row.try_get("description")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Session {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            session_id: row.try_get("session_id")?,
            user_id: row.try_get("user_id")?,
            tenant_id: row.try_get("tenant_id")?,
            token_hash: row.try_get("token_hash")?,
            user_agent: row.try_get("user_agent")?,
            ip_address: row.try_get("ip_address")?,
            created_utc: row.try_get("created_utc")?,
            last_used_utc: row.try_get("last_used_utc")?,
            expiry_utc: row.try_get("expiry_utc")?,
            revoked_utc: row.try_get("revoked_utc")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Invitation {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            invitation_id: row.try_get("invitation_id")?,
            tenant_id: row.try_get("tenant_id")?,
            email: row.try_get("email")?,
            role_ids: row.try_get("role_ids")?,
            token_hash: row.try_get("token_hash")?,
            status: decode_code(row, "status_code")?,
            invited_by_user_id: row.try_get("invited_by_user_id")?,
            expiry_utc: row.try_get("expiry_utc")?,
            accepted_utc: row.try_get("accepted_utc")?,
            accepted_user_id: row.try_get("accepted_user_id")?,
            created_utc: row.try_get("created_utc")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for AuditLog {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            log_id: row.try_get("log_id")?,
            tenant_id: row.try_get("tenant_id")?,
            actor_user_id: row.try_get("actor_user_id")?,
            action: row.try_get("action")?,
            outcome: decode_code(row, "outcome_code")?,
            resource_type: row.try_get("resource_type")?,
            resource_id: row.try_get("resource_id")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            details: row.try_get("details")?,
            created_utc: row.try_get("created_utc")?,
        })
    }
}

fn split_keys(permissions: &[PermissionKey]) -> (Vec<String>, Vec<String>) {
    permissions
        .iter()
        .map(|k| (k.resource.clone(), k.action.clone()))
        .unzip()
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

async fn insert_user_row(conn: &mut PgConnection, user: &User) -> Result<(), ServiceError> {
    sqlx::query(
        r#"
        INSERT INTO users (user_id, tenant_id, email, password_hash, display_name, status_code,
                           mfa_enabled, mfa_secret, backup_code_hashes, failed_login_count,
                           locked_until_utc, last_login_utc, created_utc, updated_utc, deleted_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(user.user_id)
    .bind(user.tenant_id)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.display_name)
    .bind(user.status.as_str())
    .bind(user.mfa_enabled)
    .bind(&user.mfa_secret)
    .bind(&user.backup_code_hashes)
    .bind(user.failed_login_count)
    .bind(user.locked_until_utc)
    .bind(user.last_login_utc)
    .bind(user.created_utc)
    .bind(user.updated_utc)
    .bind(user.deleted_utc)
    .execute(&mut *conn)
    .await
    .map_err(|e| ServiceError::conflict_on_unique(e, EMAIL_TAKEN))?;
    Ok(())
}

/// Assign the subset of `role_ids` that exist in the tenant.
async fn insert_user_roles(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    user_id: Uuid,
    role_ids: &[Uuid],
) -> Result<(), ServiceError> {
    sqlx::query(
        r#"
        INSERT INTO user_roles (user_id, role_id)
        SELECT $1, role_id FROM roles WHERE tenant_id = $2 AND role_id = ANY($3)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(tenant_id)
    .bind(role_ids)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_role_row(
    conn: &mut PgConnection,
    role: &Role,
    permissions: &[PermissionKey],
) -> Result<(), ServiceError> {
    sqlx::query(
        r#"
        INSERT INTO roles (role_id, tenant_id, name, description, parent_role_id, is_system,
                           created_utc, updated_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(role.role_id)
    .bind(role.tenant_id)
    .bind(&role.name)
    .bind(&role.description)
    .bind(role.parent_role_id)
    .bind(role.is_system)
    .bind(role.created_utc)
    .bind(role.updated_utc)
    .execute(&mut *conn)
    .await
    .map_err(|e| ServiceError::conflict_on_unique(e, ROLE_NAME_TAKEN))?;

    insert_role_permissions(conn, role.role_id, permissions).await
}

async fn insert_role_permissions(
    conn: &mut PgConnection,
    role_id: Uuid,
    permissions: &[PermissionKey],
) -> Result<(), ServiceError> {
    if permissions.is_empty() {
        return Ok(());
    }
    let (resources, actions) = split_keys(permissions);
    sqlx::query(
        r#"
        INSERT INTO role_permissions (role_id, resource, action)
        SELECT $1, r, a FROM UNNEST($2::text[], $3::text[]) AS t(r, a)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(role_id)
    .bind(&resources)
    .bind(&actions)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl CredentialStore for Database {
    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            ServiceError::Database(e)
        })?;
        Ok(())
    }

    // ==================== Tenants ====================

    async fn register_tenant(&self, registration: &TenantRegistration) -> Result<(), ServiceError> {
        let tenant = &registration.tenant;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO tenants (tenant_id, slug, name, status_code, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.slug)
        .bind(&tenant.name)
        .bind(tenant.status.as_str())
        .bind(tenant.created_utc)
        .bind(tenant.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| ServiceError::conflict_on_unique(e, "Tenant slug is already taken"))?;

        for (role, permissions) in &registration.roles {
            insert_role_row(&mut tx, role, permissions).await?;
        }

        insert_user_row(&mut tx, &registration.owner).await?;
        insert_user_roles(
            &mut tx,
            tenant.tenant_id,
            registration.owner.user_id,
            &registration.owner_role_ids,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn update_tenant(&self, tenant: &Tenant) -> Result<(), ServiceError> {
        sqlx::query(
            "UPDATE tenants SET name = $2, status_code = $3, updated_utc = $4 WHERE tenant_id = $1",
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.name)
        .bind(tenant.status.as_str())
        .bind(tenant.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Users ====================

    async fn insert_user(&self, user: &User, role_ids: &[Uuid]) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;
        insert_user_row(&mut tx, user).await?;
        insert_user_roles(&mut tx, user.tenant_id, user.user_id, role_ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<User>, ServiceError> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE tenant_id = $1 AND user_id = $2 AND deleted_utc IS NULL",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_user_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, ServiceError> {
        Ok(sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE tenant_id = $1 AND LOWER(email) = LOWER($2) AND deleted_utc IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_users(
        &self,
        tenant_id: Uuid,
        filter: &UserFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<User>, ServiceError> {
        const WHERE: &str = r#"
            WHERE tenant_id = $1 AND deleted_utc IS NULL
              AND ($2::text IS NULL OR status_code = $2)
              AND ($3::text IS NULL OR email ILIKE $3 OR display_name ILIKE $3)
        "#;
        let status = filter.status.map(|s| s.as_str());
        let search = filter.search.as_deref().map(like_pattern);

        let items = sqlx::query_as::<_, User>(&format!(
            "SELECT * FROM users {} ORDER BY created_utc ASC LIMIT $4 OFFSET $5",
            WHERE
        ))
        .bind(tenant_id)
        .bind(status)
        .bind(&search)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM users {}", WHERE))
            .bind(tenant_id)
            .bind(status)
            .bind(&search)
            .fetch_one(&self.pool)
            .await?;

        Ok(Page { items, total })
    }

    async fn update_user(&self, user: &User) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE users SET
                email = $3, password_hash = $4, display_name = $5, status_code = $6,
                mfa_enabled = $7, mfa_secret = $8, backup_code_hashes = $9,
                failed_login_count = $10, locked_until_utc = $11, last_login_utc = $12,
                updated_utc = $13, deleted_utc = $14
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(user.tenant_id)
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(user.status.as_str())
        .bind(user.mfa_enabled)
        .bind(&user.mfa_secret)
        .bind(&user.backup_code_hashes)
        .bind(user.failed_login_count)
        .bind(user.locked_until_utc)
        .bind(user.last_login_utc)
        .bind(user.updated_utc)
        .bind(user.deleted_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| ServiceError::conflict_on_unique(e, EMAIL_TAKEN))?;
        Ok(())
    }

    async fn record_failed_login(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        max_failures: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        // Every SET expression sees the pre-update row; the row lock serializes
        // concurrent failures.
        let count = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE users SET
                failed_login_count = CASE WHEN failed_login_count + 1 >= $3 THEN 0
                                          ELSE failed_login_count + 1 END,
                locked_until_utc = CASE WHEN failed_login_count + 1 >= $3 THEN $4
                                        ELSE locked_until_utc END,
                updated_utc = NOW()
            WHERE tenant_id = $1 AND user_id = $2 AND deleted_utc IS NULL
            RETURNING failed_login_count
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(max_failures as i32)
        .bind(lock_until)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServiceError::NotFound("User"))?;

        Ok(count == 0)
    }

    async fn record_successful_login(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                failed_login_count = 0, locked_until_utc = NULL,
                last_login_utc = $3, updated_utc = $3
            WHERE tenant_id = $1 AND user_id = $2 AND deleted_utc IS NULL
              AND (locked_until_utc IS NULL OR locked_until_utc <= $3)
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn consume_backup_code(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        code_hash: &str,
    ) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                backup_code_hashes = array_remove(backup_code_hashes, $3),
                updated_utc = NOW()
            WHERE tenant_id = $1 AND user_id = $2 AND deleted_utc IS NULL
              AND $3 = ANY(backup_code_hashes)
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(code_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_mfa(&self, user: &User) -> Result<(), ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                mfa_enabled = $3, mfa_secret = $4, backup_code_hashes = $5, updated_utc = $6
            WHERE tenant_id = $1 AND user_id = $2 AND deleted_utc IS NULL
            "#,
        )
        .bind(user.tenant_id)
        .bind(user.user_id)
        .bind(user.mfa_enabled)
        .bind(&user.mfa_secret)
        .bind(&user.backup_code_hashes)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("User"));
        }
        Ok(())
    }

    async fn set_user_roles(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role_ids: &[Uuid],
    ) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM user_roles
            WHERE user_id = $1 AND role_id IN (SELECT role_id FROM roles WHERE tenant_id = $2)
            "#,
        )
        .bind(user_id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;
        insert_user_roles(&mut tx, tenant_id, user_id, role_ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn user_role_ids(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Uuid>, ServiceError> {
        Ok(sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT ur.role_id FROM user_roles ur
            JOIN roles r ON r.role_id = ur.role_id
            WHERE ur.user_id = $1 AND r.tenant_id = $2
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // ==================== Roles ====================

    async fn insert_role(
        &self,
        role: &Role,
        permissions: &[PermissionKey],
    ) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;
        insert_role_row(&mut tx, role, permissions).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_role(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
    ) -> Result<Option<Role>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE tenant_id = $1 AND role_id = $2")
                .bind(tenant_id)
                .bind(role_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<Role>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE tenant_id = $1 ORDER BY name")
                .bind(tenant_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn update_role(&self, role: &Role) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE roles SET name = $3, description = $4, parent_role_id = $5, updated_utc = $6
            WHERE tenant_id = $1 AND role_id = $2
            "#,
        )
        .bind(role.tenant_id)
        .bind(role.role_id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.parent_role_id)
        .bind(role.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| ServiceError::conflict_on_unique(e, ROLE_NAME_TAKEN))?;
        Ok(())
    }

    async fn delete_role(&self, tenant_id: Uuid, role_id: Uuid) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM user_roles WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM roles WHERE tenant_id = $1 AND role_id = $2")
            .bind(tenant_id)
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn role_permissions(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
    ) -> Result<Vec<PermissionKey>, ServiceError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT rp.resource, rp.action FROM role_permissions rp
            JOIN roles r ON r.role_id = rp.role_id
            WHERE r.tenant_id = $1 AND rp.role_id = $2
            ORDER BY rp.resource, rp.action
            "#,
        )
        .bind(tenant_id)
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(resource, action)| PermissionKey::new(resource, action))
            .collect())
    }

    async fn set_role_permissions(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        permissions: &[PermissionKey],
    ) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;
        let owned: Option<Uuid> =
            sqlx::query_scalar("SELECT role_id FROM roles WHERE tenant_id = $1 AND role_id = $2")
                .bind(tenant_id)
                .bind(role_id)
                .fetch_optional(&mut *tx)
                .await?;
        if owned.is_none() {
            return Err(ServiceError::NotFound("Role"));
        }

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        insert_role_permissions(&mut tx, role_id, permissions).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn role_grants(&self, tenant_id: Uuid) -> Result<Vec<RoleGrant>, ServiceError> {
        let rows = sqlx::query_as::<_, (Uuid, Option<Uuid>, Option<String>, Option<String>)>(
            r#"
            SELECT r.role_id, r.parent_role_id, rp.resource, rp.action
            FROM roles r
            LEFT JOIN role_permissions rp ON rp.role_id = r.role_id
            WHERE r.tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let mut grants: HashMap<Uuid, RoleGrant> = HashMap::new();
        for (role_id, parent_role_id, resource, action) in rows {
            let grant = grants.entry(role_id).or_insert_with(|| RoleGrant {
                role_id,
                parent_role_id,
                permissions: Vec::new(),
            });
            if let (Some(resource), Some(action)) = (resource, action) {
                grant.permissions.push(PermissionKey::new(resource, action));
            }
        }

        Ok(grants.into_values().collect())
    }

    // ==================== Permission catalog ====================

    async fn list_permissions(&self) -> Result<Vec<Permission>, ServiceError> {
        Ok(sqlx::query_as::<_, Permission>(
            "SELECT resource, action, description FROM permissions ORDER BY resource, action",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn upsert_permissions(&self, permissions: &[Permission]) -> Result<(), ServiceError> {
        let resources: Vec<&str> = permissions.iter().map(|p| p.resource.as_str()).collect();
        let actions: Vec<&str> = permissions.iter().map(|p| p.action.as_str()).collect();
        let descriptions: Vec<&str> = permissions.iter().map(|p| p.description.as_str()).collect();

        sqlx::query(
            r#"
            INSERT INTO permissions (resource, action, description)
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[])
            ON CONFLICT (resource, action) DO UPDATE SET description = EXCLUDED.description
            "#,
        )
        .bind(&resources)
        .bind(&actions)
        .bind(&descriptions)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Sessions ====================

    async fn insert_session(&self, session: &Session) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, user_id, tenant_id, token_hash, user_agent,
                                  ip_address, created_utc, last_used_utc, expiry_utc, revoked_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(session.session_id)
        .bind(session.user_id)
        .bind(session.tenant_id)
        .bind(&session.token_hash)
        .bind(&session.user_agent)
        .bind(&session.ip_address)
        .bind(session.created_utc)
        .bind(session.last_used_utc)
        .bind(session.expiry_utc)
        .bind(session.revoked_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn rotate_session_token(
        &self,
        session_id: Uuid,
        expected_hash: &str,
        new_hash: &str,
    ) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET token_hash = $3, last_used_utc = NOW()
            WHERE session_id = $1 AND token_hash = $2
              AND revoked_utc IS NULL AND expiry_utc > NOW()
            "#,
        )
        .bind(session_id)
        .bind(expected_hash)
        .bind(new_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_active_sessions(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Session>, ServiceError> {
        Ok(sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE tenant_id = $1 AND user_id = $2 AND revoked_utc IS NULL AND expiry_utc > NOW()
            ORDER BY last_used_utc DESC
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn revoke_session(&self, session_id: Uuid) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_utc = $2 WHERE session_id = $1 AND revoked_utc IS NULL",
        )
        .bind(session_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_user_sessions(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        keep: Option<Uuid>,
    ) -> Result<Vec<Uuid>, ServiceError> {
        Ok(sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE sessions SET revoked_utc = NOW()
            WHERE tenant_id = $1 AND user_id = $2 AND revoked_utc IS NULL
              AND ($3::uuid IS NULL OR session_id <> $3)
            RETURNING session_id
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(keep)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn revoke_tenant_sessions(&self, tenant_id: Uuid) -> Result<Vec<Uuid>, ServiceError> {
        Ok(sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE sessions SET revoked_utc = NOW()
            WHERE tenant_id = $1 AND revoked_utc IS NULL
            RETURNING session_id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // ==================== Invitations ====================

    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO invitations (invitation_id, tenant_id, email, role_ids, token_hash,
                                     status_code, invited_by_user_id, expiry_utc, accepted_utc,
                                     accepted_user_id, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(invitation.invitation_id)
        .bind(invitation.tenant_id)
        .bind(&invitation.email)
        .bind(&invitation.role_ids)
        .bind(&invitation.token_hash)
        .bind(invitation.status.as_str())
        .bind(invitation.invited_by_user_id)
        .bind(invitation.expiry_utc)
        .bind(invitation.accepted_utc)
        .bind(invitation.accepted_user_id)
        .bind(invitation.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_invitation(
        &self,
        tenant_id: Uuid,
        invitation_id: Uuid,
    ) -> Result<Option<Invitation>, ServiceError> {
        Ok(sqlx::query_as::<_, Invitation>(
            "SELECT * FROM invitations WHERE tenant_id = $1 AND invitation_id = $2",
        )
        .bind(tenant_id)
        .bind(invitation_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_invitation_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Invitation>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE token_hash = $1")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_pending_invitation_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<Invitation>, ServiceError> {
        Ok(sqlx::query_as::<_, Invitation>(
            r#"
            SELECT * FROM invitations
            WHERE tenant_id = $1 AND LOWER(email) = LOWER($2)
              AND status_code = 'pending' AND expiry_utc > NOW()
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_invitations(
        &self,
        tenant_id: Uuid,
        status: Option<InvitationStatus>,
    ) -> Result<Vec<Invitation>, ServiceError> {
        let invitations = sqlx::query_as::<_, Invitation>(
            "SELECT * FROM invitations WHERE tenant_id = $1 ORDER BY created_utc DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        // Filter on the effective status so lapsed pending rows list as expired.
        Ok(match status {
            Some(wanted) => invitations
                .into_iter()
                .filter(|i| i.effective_status() == wanted)
                .collect(),
            None => invitations,
        })
    }

    async fn update_invitation(&self, invitation: &Invitation) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE invitations
            SET status_code = $3, accepted_utc = $4, accepted_user_id = $5
            WHERE tenant_id = $1 AND invitation_id = $2
            "#,
        )
        .bind(invitation.tenant_id)
        .bind(invitation.invitation_id)
        .bind(invitation.status.as_str())
        .bind(invitation.accepted_utc)
        .bind(invitation.accepted_user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn accept_invitation(
        &self,
        invitation: &Invitation,
        user: &User,
        role_ids: &[Uuid],
    ) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE invitations
            SET status_code = 'accepted', accepted_utc = $3, accepted_user_id = $4
            WHERE tenant_id = $1 AND invitation_id = $2 AND status_code = 'pending'
            "#,
        )
        .bind(invitation.tenant_id)
        .bind(invitation.invitation_id)
        .bind(Utc::now())
        .bind(user.user_id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() != 1 {
            return Err(ServiceError::Conflict(
                "Invitation is no longer pending".to_string(),
            ));
        }

        insert_user_row(&mut tx, user).await?;
        insert_user_roles(&mut tx, user.tenant_id, user.user_id, role_ids).await?;

        tx.commit().await?;
        Ok(())
    }

    // ==================== Audit ====================

    async fn insert_audit_log(&self, log: &AuditLog) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (log_id, tenant_id, actor_user_id, action, outcome_code,
                                    resource_type, resource_id, ip_address, user_agent, details,
                                    created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(log.log_id)
        .bind(log.tenant_id)
        .bind(log.actor_user_id)
        .bind(&log.action)
        .bind(log.outcome.as_str())
        .bind(&log.resource_type)
        .bind(&log.resource_id)
        .bind(&log.ip_address)
        .bind(&log.user_agent)
        .bind(&log.details)
        .bind(log.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_audit_logs(
        &self,
        tenant_id: Uuid,
        filter: &AuditLogFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<AuditLog>, ServiceError> {
        const WHERE: &str = r#"
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR actor_user_id = $2)
              AND ($3::text IS NULL OR action = $3)
              AND ($4::text IS NULL OR outcome_code = $4)
              AND ($5::timestamptz IS NULL OR created_utc >= $5)
              AND ($6::timestamptz IS NULL OR created_utc <= $6)
        "#;
        let outcome = filter.outcome.map(|o| o.as_str());

        let items = sqlx::query_as::<_, AuditLog>(&format!(
            "SELECT * FROM audit_logs {} ORDER BY created_utc DESC LIMIT $7 OFFSET $8",
            WHERE
        ))
        .bind(tenant_id)
        .bind(filter.actor_user_id)
        .bind(&filter.action)
        .bind(outcome)
        .bind(filter.from_utc)
        .bind(filter.to_utc)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM audit_logs {}", WHERE))
                .bind(tenant_id)
                .bind(filter.actor_user_id)
                .bind(&filter.action)
                .bind(outcome)
                .bind(filter.from_utc)
                .bind(filter.to_utc)
                .fetch_one(&self.pool)
                .await?;

        Ok(Page { items, total })
    }
}
