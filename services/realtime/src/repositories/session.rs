//! PostgreSQL session repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::DatabaseResult;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::SessionRepository;
use crate::models::Session;

/// Session repository backed by the `sessions` table
#[derive(Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    /// Create a new session repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn session_from_row(row: &PgRow) -> Session {
    Session {
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        device_info: row.get("device_info"),
        ip_address: row.get("ip_address"),
        last_activity_at: row.get("last_activity_at"),
        expires_at: row.get("expires_at"),
        is_active: row.get("is_active"),
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn insert(&self, session: &Session) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions
                (session_id, user_id, device_info, ip_address, last_activity_at, expires_at, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&session.session_id)
        .bind(session.user_id)
        .bind(&session.device_info)
        .bind(&session.ip_address)
        .bind(session.last_activity_at)
        .bind(session.expires_at)
        .bind(session.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch_if_usable(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Option<Session>> {
        let row = sqlx::query(
            r#"
            UPDATE sessions
            SET last_activity_at = $2
            WHERE session_id = $1 AND is_active AND expires_at > $2
            RETURNING session_id, user_id, device_info, ip_address,
                      last_activity_at, expires_at, is_active
            "#,
        )
        .bind(session_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(session_from_row))
    }

    async fn deactivate(&self, session_id: &str) -> DatabaseResult<u64> {
        let result =
            sqlx::query("UPDATE sessions SET is_active = FALSE WHERE session_id = $1 AND is_active")
                .bind(session_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    async fn deactivate_for_user(
        &self,
        user_id: Uuid,
        except_session_id: Option<&str>,
    ) -> DatabaseResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET is_active = FALSE
            WHERE user_id = $1
              AND is_active
              AND ($2::TEXT IS NULL OR session_id <> $2)
            "#,
        )
        .bind(user_id)
        .bind(except_session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> DatabaseResult<u64> {
        // Single conditional update: rows still valid at `now` are never touched
        let result =
            sqlx::query("UPDATE sessions SET is_active = FALSE WHERE is_active AND expires_at <= $1")
                .bind(now)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    async fn active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Vec<Session>> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, user_id, device_info, ip_address,
                   last_activity_at, expires_at, is_active
            FROM sessions
            WHERE user_id = $1 AND is_active AND expires_at > $2
            ORDER BY last_activity_at DESC
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(session_from_row).collect())
    }
}
