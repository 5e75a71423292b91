//! Per-client connection state (§3 ClientConnection) and the token-bucket
//! rate limiter keyed by method class (§4.9).

use std::collections::HashSet;
use std::time::Instant;

use crate::auth::Role;

/// §4.9: status methods (reads) and control methods (writes) are rate
/// limited independently so a burst of `get_status` polling can't starve a
/// client's ability to `stop_recording`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodClass {
    Status,
    Control,
}

pub struct ClientConnection {
    pub client_id: String,
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub role: Option<Role>,
    pub auth_method: Option<String>,
    pub connected_at: chrono::DateTime<chrono::Utc>,
    pub subscriptions: HashSet<String>,
    pub auth_failures: u32,
    status_bucket: TokenBucket,
    control_bucket: TokenBucket,
}

impl ClientConnection {
    pub fn new(client_id: String, status_capacity: u32, status_refill_per_sec: f64, control_capacity: u32, control_refill_per_sec: f64) -> Self {
        Self {
            client_id,
            authenticated: false,
            user_id: None,
            role: None,
            auth_method: None,
            connected_at: chrono::Utc::now(),
            // No method in the dispatch table lets a client narrow this
            // (§4.9 lists no subscribe/unsubscribe method), so every
            // connection starts subscribed to every topic by default.
            subscriptions: HashSet::from(["*".to_string()]),
            auth_failures: 0,
            status_bucket: TokenBucket::new(status_capacity, status_refill_per_sec),
            control_bucket: TokenBucket::new(control_capacity, control_refill_per_sec),
        }
    }

    pub fn authenticate(&mut self, user_id: String, role: Role, auth_method: String) {
        self.authenticated = true;
        self.user_id = Some(user_id);
        self.role = Some(role);
        self.auth_method = Some(auth_method);
    }

    pub fn take_token(&mut self, class: MethodClass) -> bool {
        match class {
            MethodClass::Status => self.status_bucket.try_take(),
            MethodClass::Control => self.control_bucket.try_take(),
        }
    }
}

/// Simple token bucket: capacity tokens, refilled continuously at
/// `refill_per_sec`. `try_take` drains one token and reports whether one
/// was available.
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_exhausts_then_refills() {
        let mut bucket = TokenBucket::new(2, 1000.0);
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(bucket.try_take());
    }

    #[test]
    fn status_and_control_buckets_are_independent() {
        let mut conn = ClientConnection::new("c1".to_string(), 1, 0.0, 1, 0.0);
        assert!(conn.take_token(MethodClass::Status));
        assert!(!conn.take_token(MethodClass::Status));
        assert!(conn.take_token(MethodClass::Control));
    }
}
