use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An isolated customer account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: String,
    /// Display name, unique across the system
    pub name: String,
    /// URL-safe identifier, unique across the system
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Inactive tenants deny every tenant-scoped request
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Create an active tenant; the slug is derived from the name when not given
    pub fn new(name: impl Into<String>, slug: Option<String>) -> Self {
        let name = name.into();
        let slug = slug.unwrap_or_else(|| slugify(&name));
        let now = Utc::now();
        Self {
            id: super::new_id(),
            name,
            slug,
            description: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Turn a display name into a slug.
///
/// Runs of whitespace and underscores collapse to a single `-`, everything is
/// lowercased, and characters other than ASCII alphanumerics and `-` are dropped.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;

    for c in value.trim().chars() {
        if c.is_whitespace() || c == '_' {
            pending_dash = true;
            continue;
        }
        if !(c.is_ascii_alphanumeric() || c == '-') {
            continue;
        }
        if pending_dash && !slug.is_empty() {
            slug.push('-');
        }
        pending_dash = false;
        slug.push(c.to_ascii_lowercase());
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Acme Corp"), "acme-corp");
        assert_eq!(slugify("  Acme   Corp  "), "acme-corp");
        assert_eq!(slugify("acme_corp_eu"), "acme-corp-eu");
        assert_eq!(slugify("Acme, Inc."), "acme-inc");
        assert_eq!(slugify("already-slugged"), "already-slugged");
    }

    #[test]
    fn test_new_tenant_derives_slug() {
        let tenant = Tenant::new("Blue Sky Labs", None);
        assert_eq!(tenant.slug, "blue-sky-labs");
        assert!(tenant.is_active);

        let tenant = Tenant::new("Blue Sky Labs", Some("bsl".to_string()));
        assert_eq!(tenant.slug, "bsl");
    }
}
