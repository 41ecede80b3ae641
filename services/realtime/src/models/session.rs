//! Session model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-side record of a successful credential check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: Uuid,
    pub device_info: String,
    pub ip_address: String,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Session {
    /// A session is usable iff it is active and not yet expired
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(expires_in: Duration, is_active: bool) -> Session {
        let now = Utc::now();
        Session {
            session_id: "s".to_string(),
            user_id: Uuid::new_v4(),
            device_info: String::new(),
            ip_address: "127.0.0.1".to_string(),
            last_activity_at: now,
            expires_at: now + expires_in,
            is_active,
        }
    }

    #[test]
    fn usable_only_when_active_and_unexpired() {
        let now = Utc::now();
        assert!(session(Duration::hours(1), true).is_usable(now));
        assert!(!session(Duration::hours(1), false).is_usable(now));
        assert!(!session(Duration::hours(-1), true).is_usable(now));
    }
}
