//! SQLite storage backend
//!
//! Tables are created on connect with `CREATE TABLE IF NOT EXISTS`. Cascades
//! are declared as foreign keys, so the pool always runs with
//! `PRAGMA foreign_keys = ON`.

use super::{StorageBackend, StorageError};
use crate::model::{
    ApiKey, ApiKeyScope, Invitation, InvitationStatus, PermissionRecord, Role, RoleAssignment,
    Tenant, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tenants (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        slug TEXT NOT NULL UNIQUE,
        description TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE COLLATE NOCASE,
        password_hash TEXT NOT NULL,
        full_name TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        is_superuser INTEGER NOT NULL DEFAULT 0,
        last_login TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS roles (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        is_system INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS permissions (
        id TEXT PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        description TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS role_permissions (
        role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        permission_id TEXT NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
        PRIMARY KEY (role_id, permission_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_tenant_roles (
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
        role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL,
        PRIMARY KEY (user_id, tenant_id, role_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS api_keys (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        key_prefix TEXT NOT NULL,
        key_hash TEXT NOT NULL UNIQUE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        tenant_id TEXT REFERENCES tenants(id) ON DELETE CASCADE,
        scope TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        expires_at TEXT,
        last_used_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invitations (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL,
        token_hash TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL,
        tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
        inviter_id TEXT NOT NULL,
        user_id TEXT,
        role_id TEXT REFERENCES roles(id) ON DELETE SET NULL,
        expires_at TEXT NOT NULL,
        accepted_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_user_tenant_roles_tenant ON user_tenant_roles (tenant_id)",
    "CREATE INDEX IF NOT EXISTS idx_invitations_tenant ON invitations (tenant_id, email)",
];

#[derive(FromRow)]
struct ApiKeyRow {
    id: String,
    name: String,
    description: Option<String>,
    key_prefix: String,
    key_hash: String,
    user_id: String,
    tenant_id: Option<String>,
    scope: String,
    is_active: bool,
    expires_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ApiKeyRow> for ApiKey {
    type Error = StorageError;

    fn try_from(row: ApiKeyRow) -> Result<Self, Self::Error> {
        let scope = ApiKeyScope::from_str(&row.scope).map_err(StorageError::Serialization)?;
        Ok(ApiKey {
            id: row.id,
            name: row.name,
            description: row.description,
            key_prefix: row.key_prefix,
            key_hash: row.key_hash,
            user_id: row.user_id,
            tenant_id: row.tenant_id,
            scope,
            is_active: row.is_active,
            expires_at: row.expires_at,
            last_used_at: row.last_used_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct InvitationRow {
    id: String,
    email: String,
    token_hash: String,
    status: String,
    tenant_id: String,
    inviter_id: String,
    user_id: Option<String>,
    role_id: Option<String>,
    expires_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InvitationRow> for Invitation {
    type Error = StorageError;

    fn try_from(row: InvitationRow) -> Result<Self, Self::Error> {
        let status =
            InvitationStatus::from_str(&row.status).map_err(StorageError::Serialization)?;
        Ok(Invitation {
            id: row.id,
            email: row.email,
            token_hash: row.token_hash,
            status,
            tenant_id: row.tenant_id,
            inviter_id: row.inviter_id,
            user_id: row.user_id,
            role_id: row.role_id,
            expires_at: row.expires_at,
            accepted_at: row.accepted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StorageError>
where
    T: TryFrom<R, Error = StorageError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Map "no row changed" to NotFound
fn expect_changed(rows: u64, what: &str, id: &str) -> Result<(), StorageError> {
    if rows == 0 {
        Err(StorageError::NotFound(format!("{} {}", what, id)))
    } else {
        Ok(())
    }
}

/// Storage backed by a SQLite database
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Connect to `url` (e.g. `sqlite://tenantry.db` or `sqlite::memory:`)
    /// and create missing tables
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        if !url.starts_with("sqlite:") {
            return Err(StorageError::InvalidConfig(format!(
                "Not a SQLite database URL: {}",
                url
            )));
        }
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StorageError::InvalidConfig(format!("{}: {}", url, e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to an in-memory database is a separate database,
        // so keep exactly one alive for the life of the pool
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        let storage = Self { pool };
        storage.create_tables().await?;
        Ok(storage)
    }

    /// Connect to a private in-memory database
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::connect("sqlite::memory:").await
    }

    async fn create_tables(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        tracing::debug!(tables = SCHEMA.len(), "SQLite schema ensured");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    async fn health_check(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ==================== Tenants ====================

    async fn create_tenant(&self, tenant: &Tenant) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO tenants (id, name, slug, description, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.slug)
        .bind(&tenant.description)
        .bind(tenant.is_active)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>, StorageError> {
        Ok(sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StorageError> {
        Ok(sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>, StorageError> {
        Ok(sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>, StorageError> {
        Ok(
            sqlx::query_as::<_, Tenant>("SELECT * FROM tenants ORDER BY created_at, id")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn update_tenant(&self, tenant: &Tenant) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE tenants SET name = ?, slug = ?, description = ?, is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&tenant.name)
        .bind(&tenant.slug)
        .bind(&tenant.description)
        .bind(tenant.is_active)
        .bind(tenant.updated_at)
        .bind(&tenant.id)
        .execute(&self.pool)
        .await?;
        expect_changed(result.rows_affected(), "tenant", &tenant.id)
    }

    async fn delete_tenant(&self, id: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM tenants WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_changed(result.rows_affected(), "tenant", id)
    }

    // ==================== Users ====================

    async fn create_user(&self, user: &User) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, full_name, is_active, is_superuser,
                                last_login, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(user.is_active)
        .bind(user.is_superuser)
        .bind(user.last_login)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StorageError> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_users(&self) -> Result<Vec<User>, StorageError> {
        Ok(
            sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at, id")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn update_user(&self, user: &User) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE users SET email = ?, password_hash = ?, full_name = ?, is_active = ?,
                              is_superuser = ?, last_login = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(user.is_active)
        .bind(user.is_superuser)
        .bind(user.last_login)
        .bind(user.updated_at)
        .bind(&user.id)
        .execute(&self.pool)
        .await?;
        expect_changed(result.rows_affected(), "user", &user.id)
    }

    async fn delete_user(&self, id: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_changed(result.rows_affected(), "user", id)
    }

    // ==================== Roles ====================

    async fn create_role(&self, role: &Role) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO roles (id, name, description, is_system, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&role.id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_system)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_role(&self, id: &str) -> Result<Option<Role>, StorageError> {
        Ok(sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, StorageError> {
        Ok(sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StorageError> {
        Ok(sqlx::query_as::<_, Role>("SELECT * FROM roles ORDER BY name")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn update_role(&self, role: &Role) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE roles SET name = ?, description = ?, is_system = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_system)
        .bind(role.updated_at)
        .bind(&role.id)
        .execute(&self.pool)
        .await?;
        expect_changed(result.rows_affected(), "role", &role.id)
    }

    async fn delete_role(&self, id: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_changed(result.rows_affected(), "role", id)
    }

    // ==================== Permission catalog ====================

    async fn create_permission(&self, permission: &PermissionRecord) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO permissions (id, code, name, description) VALUES (?, ?, ?, ?)")
            .bind(&permission.id)
            .bind(&permission.code)
            .bind(&permission.name)
            .bind(&permission.description)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_permission(&self, id: &str) -> Result<Option<PermissionRecord>, StorageError> {
        Ok(
            sqlx::query_as::<_, PermissionRecord>("SELECT * FROM permissions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn get_permission_by_code(
        &self,
        code: &str,
    ) -> Result<Option<PermissionRecord>, StorageError> {
        Ok(
            sqlx::query_as::<_, PermissionRecord>("SELECT * FROM permissions WHERE code = ?")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_permissions(&self) -> Result<Vec<PermissionRecord>, StorageError> {
        Ok(
            sqlx::query_as::<_, PermissionRecord>("SELECT * FROM permissions ORDER BY code")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn add_role_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<bool, StorageError> {
        if self.get_role(role_id).await?.is_none() {
            return Err(StorageError::NotFound(format!("role {}", role_id)));
        }
        if self.get_permission(permission_id).await?.is_none() {
            return Err(StorageError::NotFound(format!("permission {}", permission_id)));
        }
        let result = sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) VALUES (?, ?)
             ON CONFLICT (role_id, permission_id) DO NOTHING",
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_role_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<bool, StorageError> {
        let result =
            sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?")
                .bind(role_id)
                .bind(permission_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_role_permissions(
        &self,
        role_id: &str,
    ) -> Result<Vec<PermissionRecord>, StorageError> {
        Ok(sqlx::query_as::<_, PermissionRecord>(
            "SELECT p.* FROM permissions p
             JOIN role_permissions rp ON rp.permission_id = p.id
             WHERE rp.role_id = ?
             ORDER BY p.code",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // ==================== Role assignments ====================

    async fn add_role_assignment(&self, assignment: &RoleAssignment) -> Result<bool, StorageError> {
        if self.get_user(&assignment.user_id).await?.is_none() {
            return Err(StorageError::NotFound(format!("user {}", assignment.user_id)));
        }
        if self.get_tenant(&assignment.tenant_id).await?.is_none() {
            return Err(StorageError::NotFound(format!("tenant {}", assignment.tenant_id)));
        }
        if self.get_role(&assignment.role_id).await?.is_none() {
            return Err(StorageError::NotFound(format!("role {}", assignment.role_id)));
        }
        let result = sqlx::query(
            "INSERT INTO user_tenant_roles (user_id, tenant_id, role_id, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (user_id, tenant_id, role_id) DO NOTHING",
        )
        .bind(&assignment.user_id)
        .bind(&assignment.tenant_id)
        .bind(&assignment.role_id)
        .bind(assignment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_role_assignment(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_id: &str,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "DELETE FROM user_tenant_roles WHERE user_id = ? AND tenant_id = ? AND role_id = ?",
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(role_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_user_from_tenant(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<usize, StorageError> {
        let result = sqlx::query("DELETE FROM user_tenant_roles WHERE user_id = ? AND tenant_id = ?")
            .bind(user_id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn list_user_roles(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<Role>, StorageError> {
        Ok(sqlx::query_as::<_, Role>(
            "SELECT r.* FROM roles r
             JOIN user_tenant_roles utr ON utr.role_id = r.id
             WHERE utr.user_id = ? AND utr.tenant_id = ?
             ORDER BY r.name",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_tenant_assignments(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<RoleAssignment>, StorageError> {
        Ok(sqlx::query_as::<_, RoleAssignment>(
            "SELECT * FROM user_tenant_roles WHERE tenant_id = ? ORDER BY created_at",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_user_assignments(
        &self,
        user_id: &str,
    ) -> Result<Vec<RoleAssignment>, StorageError> {
        Ok(sqlx::query_as::<_, RoleAssignment>(
            "SELECT * FROM user_tenant_roles WHERE user_id = ? ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_user_permission_codes(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<String>, StorageError> {
        Ok(sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT p.code FROM permissions p
             JOIN role_permissions rp ON rp.permission_id = p.id
             JOIN user_tenant_roles utr ON utr.role_id = rp.role_id
             WHERE utr.user_id = ? AND utr.tenant_id = ?
             ORDER BY p.code",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // ==================== API keys ====================

    async fn create_api_key(&self, key: &ApiKey) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO api_keys (id, name, description, key_prefix, key_hash, user_id, tenant_id,
                                   scope, is_active, expires_at, last_used_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&key.id)
        .bind(&key.name)
        .bind(&key.description)
        .bind(&key.key_prefix)
        .bind(&key.key_hash)
        .bind(&key.user_id)
        .bind(&key.tenant_id)
        .bind(key.scope.to_string())
        .bind(key.is_active)
        .bind(key.expires_at)
        .bind(key.last_used_at)
        .bind(key.created_at)
        .bind(key.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_api_key(&self, id: &str) -> Result<Option<ApiKey>, StorageError> {
        sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ApiKey::try_from)
            .transpose()
    }

    async fn get_api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKey>, StorageError> {
        sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys WHERE key_hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?
            .map(ApiKey::try_from)
            .transpose()
    }

    async fn list_api_keys(&self) -> Result<Vec<ApiKey>, StorageError> {
        let rows = sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn update_api_key(&self, key: &ApiKey) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE api_keys SET name = ?, description = ?, is_active = ?, expires_at = ?,
                                 last_used_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&key.name)
        .bind(&key.description)
        .bind(key.is_active)
        .bind(key.expires_at)
        .bind(key.last_used_at)
        .bind(key.updated_at)
        .bind(&key.id)
        .execute(&self.pool)
        .await?;
        expect_changed(result.rows_affected(), "API key", &key.id)
    }

    async fn delete_api_key(&self, id: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_changed(result.rows_affected(), "API key", id)
    }

    async fn touch_api_key(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_changed(result.rows_affected(), "API key", id)
    }

    // ==================== Invitations ====================

    async fn create_invitation(&self, invitation: &Invitation) -> Result<(), StorageError> {
        if self.get_tenant(&invitation.tenant_id).await?.is_none() {
            return Err(StorageError::NotFound(format!("tenant {}", invitation.tenant_id)));
        }
        sqlx::query(
            "INSERT INTO invitations (id, email, token_hash, status, tenant_id, inviter_id, user_id,
                                      role_id, expires_at, accepted_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&invitation.id)
        .bind(&invitation.email)
        .bind(&invitation.token_hash)
        .bind(invitation.status.to_string())
        .bind(&invitation.tenant_id)
        .bind(&invitation.inviter_id)
        .bind(&invitation.user_id)
        .bind(&invitation.role_id)
        .bind(invitation.expires_at)
        .bind(invitation.accepted_at)
        .bind(invitation.created_at)
        .bind(invitation.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_invitation(&self, id: &str) -> Result<Option<Invitation>, StorageError> {
        sqlx::query_as::<_, InvitationRow>("SELECT * FROM invitations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Invitation::try_from)
            .transpose()
    }

    async fn get_invitation_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Invitation>, StorageError> {
        sqlx::query_as::<_, InvitationRow>("SELECT * FROM invitations WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?
            .map(Invitation::try_from)
            .transpose()
    }

    async fn list_invitations(&self, tenant_id: &str) -> Result<Vec<Invitation>, StorageError> {
        let rows = sqlx::query_as::<_, InvitationRow>(
            "SELECT * FROM invitations WHERE tenant_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn update_invitation(&self, invitation: &Invitation) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE invitations SET email = ?, token_hash = ?, status = ?, user_id = ?, role_id = ?,
                                    expires_at = ?, accepted_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&invitation.email)
        .bind(&invitation.token_hash)
        .bind(invitation.status.to_string())
        .bind(&invitation.user_id)
        .bind(&invitation.role_id)
        .bind(invitation.expires_at)
        .bind(invitation.accepted_at)
        .bind(invitation.updated_at)
        .bind(&invitation.id)
        .execute(&self.pool)
        .await?;
        expect_changed(result.rows_affected(), "invitation", &invitation.id)
    }
}
