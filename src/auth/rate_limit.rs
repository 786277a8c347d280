use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Rate limiter for login attempts
///
/// Tracks failed logins by client IP. Once a client reaches the maximum
/// number of failures within the window it is locked out for one window.
#[derive(Debug, Clone)]
pub struct LoginRateLimiter {
    max_attempts: usize,
    window: Duration,
    state: Arc<Mutex<LimiterState>>,
}

/// Failure timestamps and lockout starts, updated together
#[derive(Debug, Default)]
struct LimiterState {
    attempts: HashMap<IpAddr, Vec<Instant>>,
    lockouts: HashMap<IpAddr, Instant>,
}

impl LoginRateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1) as usize,
            window,
            state: Arc::new(Mutex::new(LimiterState::default())),
        }
    }

    /// Check if a login attempt is allowed.
    /// Returns Err with the seconds to wait if blocked
    pub async fn check(&self, ip: &IpAddr) -> Result<(), u64> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if let Some(lockout_start) = state.lockouts.get(ip) {
            let elapsed = now.duration_since(*lockout_start);
            if elapsed < self.window {
                return Err(retry_after(self.window - elapsed));
            }
        }

        if let Some(ip_attempts) = state.attempts.get_mut(ip) {
            ip_attempts.retain(|t| now.duration_since(*t) < self.window);

            if ip_attempts.len() >= self.max_attempts {
                if let Some(oldest) = ip_attempts.first() {
                    let remaining = self.window.saturating_sub(now.duration_since(*oldest));
                    return Err(retry_after(remaining));
                }
            }
        }

        Ok(())
    }

    /// Record a failed login attempt
    pub async fn record_failure(&self, ip: &IpAddr) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = Instant::now();

        let ip_attempts = state.attempts.entry(*ip).or_default();
        ip_attempts.retain(|t| now.duration_since(*t) < self.window);
        ip_attempts.push(now);

        if ip_attempts.len() >= self.max_attempts {
            state.lockouts.insert(*ip, now);
            tracing::warn!(client = %ip, "Login locked out after repeated failures");
        }
    }

    /// Clear attempts for an IP after successful login
    pub async fn clear(&self, ip: &IpAddr) {
        let mut state = self.state.lock().await;
        state.attempts.remove(ip);
        state.lockouts.remove(ip);
    }

    /// Clean up old entries (call periodically to prevent memory leaks)
    pub async fn cleanup(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        state.attempts.retain(|_, timestamps| {
            timestamps.retain(|t| now.duration_since(*t) < self.window);
            !timestamps.is_empty()
        });
        state
            .lockouts
            .retain(|_, start| now.duration_since(*start) < self.window);
    }
}

/// Whole seconds to wait, never 0 while blocked
fn retry_after(remaining: Duration) -> u64 {
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}
