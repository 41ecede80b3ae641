//! Login session lifecycle on top of a [`SessionRepository`]

use chrono::{Duration, Utc};
use common::error::DatabaseResult;
use rand::{Rng, distributions::Alphanumeric};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::Session;
use crate::repositories::SessionRepository;

const SESSION_ID_LEN: usize = 48;

/// Creates, validates and invalidates login sessions.
///
/// The store only fails on storage faults. A missing, inactive or expired
/// session is reported as `None`, never as an error.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<dyn SessionRepository>,
    ttl: Duration,
}

impl SessionStore {
    /// Create a session store whose sessions live for `ttl_days`
    pub fn new(sessions: Arc<dyn SessionRepository>, ttl_days: i64) -> Self {
        Self::with_ttl(sessions, Duration::days(ttl_days))
    }

    pub fn with_ttl(sessions: Arc<dyn SessionRepository>, ttl: Duration) -> Self {
        Self { sessions, ttl }
    }

    /// Create a fresh session for an already verified user
    pub async fn create_session(
        &self,
        user_id: Uuid,
        ip_address: &str,
        device_info: &str,
    ) -> DatabaseResult<Session> {
        let now = Utc::now();
        let session = Session {
            session_id: generate_session_id(),
            user_id,
            device_info: device_info.to_string(),
            ip_address: ip_address.to_string(),
            last_activity_at: now,
            expires_at: now + self.ttl,
            is_active: true,
        };

        self.sessions.insert(&session).await?;
        info!(user_id = %user_id, "Created session expiring at {}", session.expires_at);
        Ok(session)
    }

    /// Look up a usable session and refresh its activity timestamp
    pub async fn validate_session(&self, session_id: &str) -> DatabaseResult<Option<Session>> {
        if session_id.is_empty() {
            return Ok(None);
        }

        let session = self.sessions.touch_if_usable(session_id, Utc::now()).await?;
        if session.is_none() {
            debug!("Rejected unknown, inactive or expired session");
        }
        Ok(session)
    }

    /// Deactivate one session; deactivating an inactive session is a no-op
    pub async fn deactivate_session(&self, session_id: &str) -> DatabaseResult<()> {
        let flipped = self.sessions.deactivate(session_id).await?;
        debug!("Deactivated {} session(s)", flipped);
        Ok(())
    }

    /// Deactivate every session of a user, optionally keeping one
    pub async fn deactivate_all_sessions(
        &self,
        user_id: Uuid,
        except_session_id: Option<&str>,
    ) -> DatabaseResult<u64> {
        let flipped = self
            .sessions
            .deactivate_for_user(user_id, except_session_id)
            .await?;
        info!(user_id = %user_id, "Deactivated {} session(s)", flipped);
        Ok(flipped)
    }

    /// Mark every expired session inactive
    pub async fn sweep_expired(&self) -> DatabaseResult<u64> {
        self.sessions.deactivate_expired(Utc::now()).await
    }

    /// Active, unexpired sessions of a user, most recently used first
    pub async fn active_sessions_for(&self, user_id: Uuid) -> DatabaseResult<Vec<Session>> {
        self.sessions.active_for_user(user_id, Utc::now()).await
    }
}

fn generate_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}
