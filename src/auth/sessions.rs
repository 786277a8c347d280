//! In-process session token store
//!
//! Tokens are kept only as hashes. Sessions do not survive a restart.

use super::tokens::{generate_session_token, hash_token};
use super::AuthError;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Session tokens by hash
pub struct SessionStore {
    ttl: Duration,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start a session for a user, returning the raw token once
    pub fn issue(&self, user_id: &str) -> (String, Session) {
        let token = generate_session_token();
        let now = Utc::now();
        let session = Session {
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.sessions
            .write()
            .insert(hash_token(&token), session.clone());
        (token, session)
    }

    /// Look up a live session. Expired sessions are removed on sight
    pub fn resolve(&self, token: &str, now: DateTime<Utc>) -> Result<Session, AuthError> {
        let hash = hash_token(token);
        let session = self
            .sessions
            .read()
            .get(&hash)
            .cloned()
            .ok_or(AuthError::InvalidToken)?;

        if session.is_expired(now) {
            self.sessions.write().remove(&hash);
            return Err(AuthError::TokenExpired);
        }

        Ok(session)
    }

    /// Revoke one token. Returns false if it was unknown
    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.write().remove(&hash_token(token)).is_some()
    }

    /// Revoke every session of a user
    pub fn revoke_user(&self, user_id: &str) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.user_id != user_id);
        before - sessions.len()
    }

    /// Drop expired sessions (call periodically to bound memory)
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_resolve() {
        let store = SessionStore::new(Duration::minutes(30));
        let (token, session) = store.issue("user-1");

        let resolved = store.resolve(&token, Utc::now()).unwrap();
        assert_eq!(resolved, session);
        assert!(matches!(
            store.resolve("ts_unknown", Utc::now()),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired_session_rejected_and_purged() {
        let store = SessionStore::new(Duration::minutes(30));
        let (token, _) = store.issue("user-1");

        let later = Utc::now() + Duration::minutes(31);
        assert!(matches!(
            store.resolve(&token, later),
            Err(AuthError::TokenExpired)
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_revoke() {
        let store = SessionStore::new(Duration::minutes(30));
        let (token, _) = store.issue("user-1");
        store.issue("user-1");
        let (other, _) = store.issue("user-2");

        assert!(store.revoke(&token));
        assert!(!store.revoke(&token));
        assert!(store.resolve(&token, Utc::now()).is_err());

        assert_eq!(store.revoke_user("user-1"), 1);
        assert!(store.resolve(&other, Utc::now()).is_ok());
    }

    #[test]
    fn test_purge_expired() {
        let store = SessionStore::new(Duration::minutes(5));
        store.issue("a");
        store.issue("b");
        assert_eq!(store.purge_expired(Utc::now()), 0);
        assert_eq!(store.purge_expired(Utc::now() + Duration::minutes(6)), 2);
    }
}
