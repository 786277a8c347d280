//! Domain records persisted by the storage layer
//!
//! These are plain data types. Anything that needs storage access lives in
//! [`crate::service`]; anything deciding access lives in [`crate::authz`].

mod api_key;
mod invitation;
mod role;
mod tenant;
mod user;

pub use api_key::{ApiKey, ApiKeyScope, ApiKeyView};
pub use invitation::{Invitation, InvitationStatus};
pub use role::{PermissionRecord, Role, RoleAssignment};
pub use tenant::{slugify, Tenant};
pub use user::{User, UserView};

/// Generate a new record identifier
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Offset/limit window for list operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: usize,
    pub limit: usize,
}

impl Page {
    /// Largest page a caller may request
    pub const MAX_LIMIT: usize = 100;

    /// Build a page, clamping the limit to `1..=MAX_LIMIT`
    pub fn new(skip: usize, limit: usize) -> Self {
        Self {
            skip,
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    /// Apply the window to an already ordered list
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.skip).take(self.limit).collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: Self::MAX_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_clamps_limit() {
        assert_eq!(Page::new(0, 0).limit, 1);
        assert_eq!(Page::new(0, 500).limit, Page::MAX_LIMIT);
        assert_eq!(Page::new(3, 20), Page { skip: 3, limit: 20 });
    }

    #[test]
    fn test_page_apply() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(Page::new(2, 3).apply(items.clone()), vec![2, 3, 4]);
        assert!(Page::new(20, 3).apply(items).is_empty());
    }
}
