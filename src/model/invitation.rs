use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of an invitation. Only `Pending` may transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Expired,
    Revoked,
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvitationStatus::Pending => write!(f, "pending"),
            InvitationStatus::Accepted => write!(f, "accepted"),
            InvitationStatus::Expired => write!(f, "expired"),
            InvitationStatus::Revoked => write!(f, "revoked"),
        }
    }
}

impl FromStr for InvitationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvitationStatus::Pending),
            "accepted" => Ok(InvitationStatus::Accepted),
            "expired" => Ok(InvitationStatus::Expired),
            "revoked" => Ok(InvitationStatus::Revoked),
            other => Err(format!("Unknown invitation status: {}", other)),
        }
    }
}

/// An offer for an email address to join a tenant with a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: String,
    /// Invitee address, stored lowercased
    pub email: String,
    /// SHA-256 hex digest of the token sent to the invitee
    pub token_hash: String,
    pub status: InvitationStatus,
    pub tenant_id: String,
    pub inviter_id: String,
    /// Set on acceptance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Role assigned on acceptance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invitation {
    pub fn new(
        email: &str,
        tenant_id: impl Into<String>,
        inviter_id: impl Into<String>,
        role_id: Option<String>,
        token_hash: impl Into<String>,
        expires_in: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: super::new_id(),
            email: email.trim().to_lowercase(),
            token_hash: token_hash.into(),
            status: InvitationStatus::Pending,
            tenant_id: tenant_id.into(),
            inviter_id: inviter_id.into(),
            user_id: None,
            role_id,
            expires_at: now + expires_in,
            accepted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Expired once `now` is strictly past `expires_at`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Still usable: pending and not expired
    pub fn is_pending(&self, now: DateTime<Utc>) -> bool {
        self.status == InvitationStatus::Pending && !self.is_expired(now)
    }
}
