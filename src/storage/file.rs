//! File-backed storage backend
//!
//! Keeps every table in memory and, when given a path, snapshots the whole
//! state as JSON after each write. Without a path it is a purely in-memory
//! store, which is what the tests and `--ephemeral` runs use.

use super::{StorageBackend, StorageError};
use crate::model::{ApiKey, Invitation, PermissionRecord, Role, RoleAssignment, Tenant, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Current snapshot format version
const SNAPSHOT_VERSION: u32 = 1;

/// JSON snapshot storage
pub struct FileStorage {
    /// Snapshot location; None keeps everything in memory
    path: Option<PathBuf>,
    cache: RwLock<StorageCache>,
    /// Held by writers from mutation through the snapshot rename, so
    /// snapshots land on disk in the order their mutations were applied
    persist: Mutex<()>,
}

/// In-memory copy of all tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StorageCache {
    #[serde(default)]
    tenants: HashMap<String, Tenant>,
    #[serde(default)]
    users: HashMap<String, User>,
    #[serde(default)]
    roles: HashMap<String, Role>,
    #[serde(default)]
    permissions: HashMap<String, PermissionRecord>,
    /// (role_id, permission_id) pairs
    #[serde(default)]
    role_permissions: HashSet<(String, String)>,
    #[serde(default)]
    assignments: Vec<RoleAssignment>,
    #[serde(default)]
    api_keys: HashMap<String, ApiKey>,
    #[serde(default)]
    invitations: HashMap<String, Invitation>,

    // Secondary indexes (not serialized, rebuilt on load)
    /// Index: tenant slug -> tenant ID
    #[serde(skip)]
    tenant_slug_index: HashMap<String, String>,
    /// Index: tenant name -> tenant ID
    #[serde(skip)]
    tenant_name_index: HashMap<String, String>,
    /// Index: lowercased email -> user ID
    #[serde(skip)]
    email_index: HashMap<String, String>,
    /// Index: role name -> role ID
    #[serde(skip)]
    role_name_index: HashMap<String, String>,
    /// Index: permission code -> permission ID
    #[serde(skip)]
    permission_code_index: HashMap<String, String>,
    /// Index: API key hash -> API key ID
    #[serde(skip)]
    api_key_hash_index: HashMap<String, String>,
    /// Index: invitation token hash -> invitation ID
    #[serde(skip)]
    invitation_token_index: HashMap<String, String>,
}

/// On-disk format of the snapshot file
#[derive(Debug, Serialize, Deserialize)]
struct StorageFile<T> {
    version: u32,
    data: T,
}

fn email_key(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Reject `value` if the index already maps it to a different record
fn ensure_unique(
    index: &HashMap<String, String>,
    value: &str,
    id: &str,
    what: &str,
) -> Result<(), StorageError> {
    match index.get(value) {
        Some(existing) if existing != id => {
            Err(StorageError::AlreadyExists(format!("{} '{}'", what, value)))
        }
        _ => Ok(()),
    }
}

fn by_created<T>(mut items: Vec<T>, created: impl Fn(&T) -> (DateTime<Utc>, String)) -> Vec<T> {
    items.sort_by_key(|item| created(item));
    items
}

impl StorageCache {
    /// Rebuild all secondary indexes from primary data
    fn rebuild_indexes(&mut self) {
        self.tenant_slug_index = self
            .tenants
            .values()
            .map(|t| (t.slug.clone(), t.id.clone()))
            .collect();
        self.tenant_name_index = self
            .tenants
            .values()
            .map(|t| (t.name.clone(), t.id.clone()))
            .collect();
        self.email_index = self
            .users
            .values()
            .map(|u| (email_key(&u.email), u.id.clone()))
            .collect();
        self.role_name_index = self
            .roles
            .values()
            .map(|r| (r.name.clone(), r.id.clone()))
            .collect();
        self.permission_code_index = self
            .permissions
            .values()
            .map(|p| (p.code.clone(), p.id.clone()))
            .collect();
        self.api_key_hash_index = self
            .api_keys
            .values()
            .map(|k| (k.key_hash.clone(), k.id.clone()))
            .collect();
        self.invitation_token_index = self
            .invitations
            .values()
            .map(|i| (i.token_hash.clone(), i.id.clone()))
            .collect();
    }

    fn put_tenant(&mut self, tenant: &Tenant) -> Result<(), StorageError> {
        ensure_unique(&self.tenant_slug_index, &tenant.slug, &tenant.id, "tenant slug")?;
        ensure_unique(&self.tenant_name_index, &tenant.name, &tenant.id, "tenant name")?;

        if let Some(old) = self.tenants.get(&tenant.id) {
            self.tenant_slug_index.remove(&old.slug);
            self.tenant_name_index.remove(&old.name);
        }
        self.tenant_slug_index.insert(tenant.slug.clone(), tenant.id.clone());
        self.tenant_name_index.insert(tenant.name.clone(), tenant.id.clone());
        self.tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(())
    }

    fn put_user(&mut self, user: &User) -> Result<(), StorageError> {
        let key = email_key(&user.email);
        ensure_unique(&self.email_index, &key, &user.id, "email")?;

        if let Some(old) = self.users.get(&user.id) {
            self.email_index.remove(&email_key(&old.email));
        }
        self.email_index.insert(key, user.id.clone());
        self.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    fn put_role(&mut self, role: &Role) -> Result<(), StorageError> {
        ensure_unique(&self.role_name_index, &role.name, &role.id, "role")?;

        if let Some(old) = self.roles.get(&role.id) {
            self.role_name_index.remove(&old.name);
        }
        self.role_name_index.insert(role.name.clone(), role.id.clone());
        self.roles.insert(role.id.clone(), role.clone());
        Ok(())
    }

    fn put_api_key(&mut self, key: &ApiKey) -> Result<(), StorageError> {
        ensure_unique(&self.api_key_hash_index, &key.key_hash, &key.id, "API key")?;

        if let Some(old) = self.api_keys.get(&key.id) {
            self.api_key_hash_index.remove(&old.key_hash);
        }
        self.api_key_hash_index.insert(key.key_hash.clone(), key.id.clone());
        self.api_keys.insert(key.id.clone(), key.clone());
        Ok(())
    }

    fn put_invitation(&mut self, invitation: &Invitation) -> Result<(), StorageError> {
        ensure_unique(
            &self.invitation_token_index,
            &invitation.token_hash,
            &invitation.id,
            "invitation token",
        )?;

        if let Some(old) = self.invitations.get(&invitation.id) {
            self.invitation_token_index.remove(&old.token_hash);
        }
        self.invitation_token_index
            .insert(invitation.token_hash.clone(), invitation.id.clone());
        self.invitations.insert(invitation.id.clone(), invitation.clone());
        Ok(())
    }

    fn remove_api_keys_where(&mut self, predicate: impl Fn(&ApiKey) -> bool) {
        let doomed: Vec<String> = self
            .api_keys
            .values()
            .filter(|k| predicate(k))
            .map(|k| k.id.clone())
            .collect();
        for id in doomed {
            if let Some(key) = self.api_keys.remove(&id) {
                self.api_key_hash_index.remove(&key.key_hash);
            }
        }
    }
}

impl FileStorage {
    /// Create an in-memory store that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            cache: RwLock::new(StorageCache::default()),
            persist: Mutex::new(()),
        }
    }

    /// Open a snapshot file, creating it if it does not exist
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let storage = Self {
            path: Some(path.clone()),
            cache: RwLock::new(StorageCache::default()),
            persist: Mutex::new(()),
        };

        if path.exists() {
            storage.reload().await?;
        } else {
            storage.save().await?;
        }

        Ok(storage)
    }

    /// Reload data from disk (for picking up external changes)
    pub async fn reload(&self) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _persist = self.persist.lock().await;
        let content = fs::read_to_string(path).await?;
        let file: StorageFile<StorageCache> = serde_json::from_str(&content)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        if file.version > SNAPSHOT_VERSION {
            return Err(StorageError::InvalidConfig(format!(
                "Snapshot version {} is newer than supported version {}",
                file.version, SNAPSHOT_VERSION
            )));
        }

        let mut cache = file.data;
        cache.rebuild_indexes();
        *self.cache.write() = cache;

        Ok(())
    }

    /// Save the current state to disk
    async fn save(&self) -> Result<(), StorageError> {
        let _persist = self.persist.lock().await;
        self.save_snapshot().await
    }

    /// Serialize and atomically replace the snapshot. Callers hold `persist`
    async fn save_snapshot(&self) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = {
            let cache = self.cache.read();
            let file = StorageFile {
                version: SNAPSHOT_VERSION,
                data: &*cache,
            };
            serde_json::to_string_pretty(&file)
                .map_err(|e| StorageError::Serialization(e.to_string()))?
        };

        // Write atomically by writing to temp file first
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, path).await?;

        Ok(())
    }

    /// Apply a mutation to the cache and persist it. A failed save rolls
    /// the cache back, so memory never holds a write the caller saw fail
    async fn write<T>(
        &self,
        f: impl FnOnce(&mut StorageCache) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        if self.path.is_none() {
            return f(&mut self.cache.write());
        }

        let _persist = self.persist.lock().await;
        let (result, previous) = {
            let mut cache = self.cache.write();
            let previous = cache.clone();
            match f(&mut cache) {
                Ok(result) => (result, previous),
                Err(e) => {
                    *cache = previous;
                    return Err(e);
                }
            }
        };

        if let Err(e) = self.save_snapshot().await {
            *self.cache.write() = previous;
            tracing::warn!(error = %e, "Snapshot write failed, mutation rolled back");
            return Err(e);
        }
        Ok(result)
    }

    fn read<T>(&self, f: impl FnOnce(&StorageCache) -> T) -> T {
        f(&self.cache.read())
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn health_check(&self) -> Result<(), StorageError> {
        if let Some(path) = &self.path {
            if !path.exists() {
                return Err(StorageError::Unavailable(
                    "Storage file does not exist".to_string(),
                ));
            }
            fs::metadata(path).await?;
        }
        Ok(())
    }

    // ==================== Tenants ====================

    async fn create_tenant(&self, tenant: &Tenant) -> Result<(), StorageError> {
        self.write(|cache| {
            if cache.tenants.contains_key(&tenant.id) {
                return Err(StorageError::AlreadyExists(format!("tenant {}", tenant.id)));
            }
            cache.put_tenant(tenant)
        })
        .await
    }

    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>, StorageError> {
        Ok(self.read(|cache| cache.tenants.get(id).cloned()))
    }

    async fn get_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StorageError> {
        Ok(self.read(|cache| {
            cache
                .tenant_slug_index
                .get(slug)
                .and_then(|id| cache.tenants.get(id))
                .cloned()
        }))
    }

    async fn get_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>, StorageError> {
        Ok(self.read(|cache| {
            cache
                .tenant_name_index
                .get(name)
                .and_then(|id| cache.tenants.get(id))
                .cloned()
        }))
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>, StorageError> {
        let tenants = self.read(|cache| cache.tenants.values().cloned().collect());
        Ok(by_created(tenants, |t: &Tenant| (t.created_at, t.id.clone())))
    }

    async fn update_tenant(&self, tenant: &Tenant) -> Result<(), StorageError> {
        self.write(|cache| {
            if !cache.tenants.contains_key(&tenant.id) {
                return Err(StorageError::NotFound(format!("tenant {}", tenant.id)));
            }
            cache.put_tenant(tenant)
        })
        .await
    }

    async fn delete_tenant(&self, id: &str) -> Result<(), StorageError> {
        self.write(|cache| {
            let tenant = cache
                .tenants
                .remove(id)
                .ok_or_else(|| StorageError::NotFound(format!("tenant {}", id)))?;
            cache.tenant_slug_index.remove(&tenant.slug);
            cache.tenant_name_index.remove(&tenant.name);

            cache.assignments.retain(|a| a.tenant_id != id);
            cache.remove_api_keys_where(|k| k.tenant_id.as_deref() == Some(id));

            let invitations: Vec<String> = cache
                .invitations
                .values()
                .filter(|i| i.tenant_id == id)
                .map(|i| i.id.clone())
                .collect();
            for invitation_id in invitations {
                if let Some(invitation) = cache.invitations.remove(&invitation_id) {
                    cache.invitation_token_index.remove(&invitation.token_hash);
                }
            }
            Ok(())
        })
        .await
    }

    // ==================== Users ====================

    async fn create_user(&self, user: &User) -> Result<(), StorageError> {
        self.write(|cache| {
            if cache.users.contains_key(&user.id) {
                return Err(StorageError::AlreadyExists(format!("user {}", user.id)));
            }
            cache.put_user(user)
        })
        .await
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StorageError> {
        Ok(self.read(|cache| cache.users.get(id).cloned()))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        Ok(self.read(|cache| {
            cache
                .email_index
                .get(&email_key(email))
                .and_then(|id| cache.users.get(id))
                .cloned()
        }))
    }

    async fn list_users(&self) -> Result<Vec<User>, StorageError> {
        let users = self.read(|cache| cache.users.values().cloned().collect());
        Ok(by_created(users, |u: &User| (u.created_at, u.id.clone())))
    }

    async fn update_user(&self, user: &User) -> Result<(), StorageError> {
        self.write(|cache| {
            if !cache.users.contains_key(&user.id) {
                return Err(StorageError::NotFound(format!("user {}", user.id)));
            }
            cache.put_user(user)
        })
        .await
    }

    async fn delete_user(&self, id: &str) -> Result<(), StorageError> {
        self.write(|cache| {
            let user = cache
                .users
                .remove(id)
                .ok_or_else(|| StorageError::NotFound(format!("user {}", id)))?;
            cache.email_index.remove(&email_key(&user.email));
            cache.assignments.retain(|a| a.user_id != id);
            cache.remove_api_keys_where(|k| k.user_id == id);
            Ok(())
        })
        .await
    }

    // ==================== Roles ====================

    async fn create_role(&self, role: &Role) -> Result<(), StorageError> {
        self.write(|cache| {
            if cache.roles.contains_key(&role.id) {
                return Err(StorageError::AlreadyExists(format!("role {}", role.id)));
            }
            cache.put_role(role)
        })
        .await
    }

    async fn get_role(&self, id: &str) -> Result<Option<Role>, StorageError> {
        Ok(self.read(|cache| cache.roles.get(id).cloned()))
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, StorageError> {
        Ok(self.read(|cache| {
            cache
                .role_name_index
                .get(name)
                .and_then(|id| cache.roles.get(id))
                .cloned()
        }))
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StorageError> {
        let mut roles: Vec<Role> = self.read(|cache| cache.roles.values().cloned().collect());
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn update_role(&self, role: &Role) -> Result<(), StorageError> {
        self.write(|cache| {
            if !cache.roles.contains_key(&role.id) {
                return Err(StorageError::NotFound(format!("role {}", role.id)));
            }
            cache.put_role(role)
        })
        .await
    }

    async fn delete_role(&self, id: &str) -> Result<(), StorageError> {
        self.write(|cache| {
            let role = cache
                .roles
                .remove(id)
                .ok_or_else(|| StorageError::NotFound(format!("role {}", id)))?;
            cache.role_name_index.remove(&role.name);
            cache.assignments.retain(|a| a.role_id != id);
            cache.role_permissions.retain(|(role_id, _)| role_id != id);
            for invitation in cache.invitations.values_mut() {
                if invitation.role_id.as_deref() == Some(id) {
                    invitation.role_id = None;
                }
            }
            Ok(())
        })
        .await
    }

    // ==================== Permission catalog ====================

    async fn create_permission(&self, permission: &PermissionRecord) -> Result<(), StorageError> {
        self.write(|cache| {
            if cache.permissions.contains_key(&permission.id) {
                return Err(StorageError::AlreadyExists(format!(
                    "permission {}",
                    permission.id
                )));
            }
            ensure_unique(
                &cache.permission_code_index,
                &permission.code,
                &permission.id,
                "permission",
            )?;
            cache
                .permission_code_index
                .insert(permission.code.clone(), permission.id.clone());
            cache
                .permissions
                .insert(permission.id.clone(), permission.clone());
            Ok(())
        })
        .await
    }

    async fn get_permission(&self, id: &str) -> Result<Option<PermissionRecord>, StorageError> {
        Ok(self.read(|cache| cache.permissions.get(id).cloned()))
    }

    async fn get_permission_by_code(
        &self,
        code: &str,
    ) -> Result<Option<PermissionRecord>, StorageError> {
        Ok(self.read(|cache| {
            cache
                .permission_code_index
                .get(code)
                .and_then(|id| cache.permissions.get(id))
                .cloned()
        }))
    }

    async fn list_permissions(&self) -> Result<Vec<PermissionRecord>, StorageError> {
        let mut permissions: Vec<PermissionRecord> =
            self.read(|cache| cache.permissions.values().cloned().collect());
        permissions.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(permissions)
    }

    async fn add_role_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<bool, StorageError> {
        self.write(|cache| {
            if !cache.roles.contains_key(role_id) {
                return Err(StorageError::NotFound(format!("role {}", role_id)));
            }
            if !cache.permissions.contains_key(permission_id) {
                return Err(StorageError::NotFound(format!("permission {}", permission_id)));
            }
            Ok(cache
                .role_permissions
                .insert((role_id.to_string(), permission_id.to_string())))
        })
        .await
    }

    async fn remove_role_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<bool, StorageError> {
        self.write(|cache| {
            Ok(cache
                .role_permissions
                .remove(&(role_id.to_string(), permission_id.to_string())))
        })
        .await
    }

    async fn list_role_permissions(
        &self,
        role_id: &str,
    ) -> Result<Vec<PermissionRecord>, StorageError> {
        let mut permissions: Vec<PermissionRecord> = self.read(|cache| {
            cache
                .role_permissions
                .iter()
                .filter(|(r, _)| r == role_id)
                .filter_map(|(_, p)| cache.permissions.get(p).cloned())
                .collect()
        });
        permissions.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(permissions)
    }

    // ==================== Role assignments ====================

    async fn add_role_assignment(&self, assignment: &RoleAssignment) -> Result<bool, StorageError> {
        self.write(|cache| {
            if !cache.users.contains_key(&assignment.user_id) {
                return Err(StorageError::NotFound(format!("user {}", assignment.user_id)));
            }
            if !cache.tenants.contains_key(&assignment.tenant_id) {
                return Err(StorageError::NotFound(format!(
                    "tenant {}",
                    assignment.tenant_id
                )));
            }
            if !cache.roles.contains_key(&assignment.role_id) {
                return Err(StorageError::NotFound(format!("role {}", assignment.role_id)));
            }
            if cache.assignments.iter().any(|a| a.key() == assignment.key()) {
                return Ok(false);
            }
            cache.assignments.push(assignment.clone());
            Ok(true)
        })
        .await
    }

    async fn remove_role_assignment(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_id: &str,
    ) -> Result<bool, StorageError> {
        self.write(|cache| {
            let before = cache.assignments.len();
            cache
                .assignments
                .retain(|a| a.key() != (user_id, tenant_id, role_id));
            Ok(cache.assignments.len() != before)
        })
        .await
    }

    async fn remove_user_from_tenant(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<usize, StorageError> {
        self.write(|cache| {
            let before = cache.assignments.len();
            cache
                .assignments
                .retain(|a| !(a.user_id == user_id && a.tenant_id == tenant_id));
            Ok(before - cache.assignments.len())
        })
        .await
    }

    async fn list_user_roles(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<Role>, StorageError> {
        let mut roles: Vec<Role> = self.read(|cache| {
            cache
                .assignments
                .iter()
                .filter(|a| a.user_id == user_id && a.tenant_id == tenant_id)
                .filter_map(|a| cache.roles.get(&a.role_id).cloned())
                .collect()
        });
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn list_tenant_assignments(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<RoleAssignment>, StorageError> {
        Ok(self.read(|cache| {
            cache
                .assignments
                .iter()
                .filter(|a| a.tenant_id == tenant_id)
                .cloned()
                .collect()
        }))
    }

    async fn list_user_assignments(
        &self,
        user_id: &str,
    ) -> Result<Vec<RoleAssignment>, StorageError> {
        Ok(self.read(|cache| {
            cache
                .assignments
                .iter()
                .filter(|a| a.user_id == user_id)
                .cloned()
                .collect()
        }))
    }

    async fn list_user_permission_codes(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<String>, StorageError> {
        Ok(self.read(|cache| {
            let roles: HashSet<&str> = cache
                .assignments
                .iter()
                .filter(|a| a.user_id == user_id && a.tenant_id == tenant_id)
                .map(|a| a.role_id.as_str())
                .collect();

            let codes: BTreeSet<String> = cache
                .role_permissions
                .iter()
                .filter(|(role_id, _)| roles.contains(role_id.as_str()))
                .filter_map(|(_, permission_id)| cache.permissions.get(permission_id))
                .map(|p| p.code.clone())
                .collect();

            codes.into_iter().collect()
        }))
    }

    // ==================== API keys ====================

    async fn create_api_key(&self, key: &ApiKey) -> Result<(), StorageError> {
        self.write(|cache| {
            if cache.api_keys.contains_key(&key.id) {
                return Err(StorageError::AlreadyExists(format!("API key {}", key.id)));
            }
            cache.put_api_key(key)
        })
        .await
    }

    async fn get_api_key(&self, id: &str) -> Result<Option<ApiKey>, StorageError> {
        Ok(self.read(|cache| cache.api_keys.get(id).cloned()))
    }

    async fn get_api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKey>, StorageError> {
        Ok(self.read(|cache| {
            cache
                .api_key_hash_index
                .get(hash)
                .and_then(|id| cache.api_keys.get(id))
                .cloned()
        }))
    }

    async fn list_api_keys(&self) -> Result<Vec<ApiKey>, StorageError> {
        let keys = self.read(|cache| cache.api_keys.values().cloned().collect());
        Ok(by_created(keys, |k: &ApiKey| (k.created_at, k.id.clone())))
    }

    async fn update_api_key(&self, key: &ApiKey) -> Result<(), StorageError> {
        self.write(|cache| {
            if !cache.api_keys.contains_key(&key.id) {
                return Err(StorageError::NotFound(format!("API key {}", key.id)));
            }
            cache.put_api_key(key)
        })
        .await
    }

    async fn delete_api_key(&self, id: &str) -> Result<(), StorageError> {
        self.write(|cache| {
            let key = cache
                .api_keys
                .remove(id)
                .ok_or_else(|| StorageError::NotFound(format!("API key {}", id)))?;
            cache.api_key_hash_index.remove(&key.key_hash);
            Ok(())
        })
        .await
    }

    async fn touch_api_key(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.write(|cache| {
            let key = cache
                .api_keys
                .get_mut(id)
                .ok_or_else(|| StorageError::NotFound(format!("API key {}", id)))?;
            key.last_used_at = Some(at);
            Ok(())
        })
        .await
    }

    // ==================== Invitations ====================

    async fn create_invitation(&self, invitation: &Invitation) -> Result<(), StorageError> {
        self.write(|cache| {
            if cache.invitations.contains_key(&invitation.id) {
                return Err(StorageError::AlreadyExists(format!(
                    "invitation {}",
                    invitation.id
                )));
            }
            if !cache.tenants.contains_key(&invitation.tenant_id) {
                return Err(StorageError::NotFound(format!(
                    "tenant {}",
                    invitation.tenant_id
                )));
            }
            cache.put_invitation(invitation)
        })
        .await
    }

    async fn get_invitation(&self, id: &str) -> Result<Option<Invitation>, StorageError> {
        Ok(self.read(|cache| cache.invitations.get(id).cloned()))
    }

    async fn get_invitation_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Invitation>, StorageError> {
        Ok(self.read(|cache| {
            cache
                .invitation_token_index
                .get(token_hash)
                .and_then(|id| cache.invitations.get(id))
                .cloned()
        }))
    }

    async fn list_invitations(&self, tenant_id: &str) -> Result<Vec<Invitation>, StorageError> {
        let mut invitations: Vec<Invitation> = self.read(|cache| {
            cache
                .invitations
                .values()
                .filter(|i| i.tenant_id == tenant_id)
                .cloned()
                .collect()
        });
        invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(invitations)
    }

    async fn update_invitation(&self, invitation: &Invitation) -> Result<(), StorageError> {
        self.write(|cache| {
            if !cache.invitations.contains_key(&invitation.id) {
                return Err(StorageError::NotFound(format!(
                    "invitation {}",
                    invitation.id
                )));
            }
            cache.put_invitation(invitation)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::conformance;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_uniqueness() {
        conformance::uniqueness(&FileStorage::in_memory()).await;
    }

    #[tokio::test]
    async fn test_effective_permissions() {
        conformance::effective_permissions(&FileStorage::in_memory()).await;
    }

    #[tokio::test]
    async fn test_cascades() {
        conformance::cascades(&FileStorage::in_memory()).await;
    }

    #[tokio::test]
    async fn test_api_keys_and_invitations() {
        conformance::api_keys_and_invitations(&FileStorage::in_memory()).await;
    }

    #[tokio::test]
    async fn test_file_storage_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("tenantry.json");

        let tenant = Tenant::new("Acme", None);
        let user = User::new("alice@example.com", "hash");
        let role = Role::new("ops");

        {
            let storage = FileStorage::open(&path).await.unwrap();
            storage.create_tenant(&tenant).await.unwrap();
            storage.create_user(&user).await.unwrap();
            storage.create_role(&role).await.unwrap();
            storage
                .add_role_assignment(&RoleAssignment::new(&user.id, &tenant.id, &role.id))
                .await
                .unwrap();
        }

        let storage = FileStorage::open(&path).await.unwrap();
        storage.health_check().await.unwrap();

        // indexes are rebuilt on load
        let loaded = storage.get_tenant_by_slug("acme").await.unwrap().unwrap();
        assert_eq!(loaded.id, tenant.id);
        assert!(storage.get_user_by_email("ALICE@example.com").await.unwrap().is_some());
        assert_eq!(
            storage.list_user_roles(&user.id, &tenant.id).await.unwrap()[0].name,
            "ops"
        );
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_reload_picks_up_external_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tenantry.json");

        let reader = FileStorage::open(&path).await.unwrap();
        let writer = FileStorage::open(&path).await.unwrap();
        writer.create_tenant(&Tenant::new("Acme", None)).await.unwrap();

        assert!(reader.list_tenants().await.unwrap().is_empty());
        reader.reload().await.unwrap();
        assert_eq!(reader.list_tenants().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_all_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tenantry.json");
        let storage = std::sync::Arc::new(FileStorage::open(&path).await.unwrap());

        let writers: Vec<_> = (0..16)
            .map(|i| {
                let storage = storage.clone();
                tokio::spawn(async move {
                    storage
                        .create_tenant(&Tenant::new(&format!("Tenant {}", i), None))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let reopened = FileStorage::open(&path).await.unwrap();
        assert_eq!(reopened.list_tenants().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_failed_save_rolls_back() {
        let dir = tempdir().unwrap();
        let state = dir.path().join("state");
        let storage = FileStorage::open(state.join("tenantry.json")).await.unwrap();
        storage.create_tenant(&Tenant::new("Acme", None)).await.unwrap();

        std::fs::remove_dir_all(&state).unwrap();
        let result = storage.create_tenant(&Tenant::new("Globex", None)).await;
        assert!(result.is_err());

        let names: Vec<_> = storage
            .list_tenants()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["Acme".to_string()]);
        assert!(storage.get_tenant_by_slug("globex").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_assignment_requires_existing_records() {
        let storage = FileStorage::in_memory();
        let result = storage
            .add_role_assignment(&RoleAssignment::new("ghost", "nowhere", "none"))
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
