use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A globally defined, named bundle of permissions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: String,
    /// Unique across the system (e.g. "tenant_admin", "billing-reader")
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Built-in roles cannot be modified or deleted
    #[serde(default)]
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: super::new_id(),
            name: name.into(),
            description: None,
            is_system: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }
}

/// A row of the permission catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PermissionRecord {
    pub id: String,
    /// Capability string, e.g. `vm:read`
    pub code: String,
    /// Human-readable label
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A role granted to a user inside one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RoleAssignment {
    pub user_id: String,
    pub tenant_id: String,
    pub role_id: String,
    pub created_at: DateTime<Utc>,
}

impl RoleAssignment {
    pub fn new(
        user_id: impl Into<String>,
        tenant_id: impl Into<String>,
        role_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            role_id: role_id.into(),
            created_at: Utc::now(),
        }
    }

    /// The uniqueness key of an assignment
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.user_id, &self.tenant_id, &self.role_id)
    }
}
