//! PostgreSQL message repository

use async_trait::async_trait;
use auth::UserSummary;
use chrono::Utc;
use common::error::DatabaseResult;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::MessageRepository;
use super::conversation::lock_participants;
use crate::models::{AppendOutcome, MessageView, UnreadCount};

const SELECT_MESSAGE: &str = r#"
    SELECT m.id, m.conversation_id, m.sender_id, m.content, m.is_read, m.created_at,
           u.first_name, u.last_name, u.email
    FROM messages m
    JOIN users u ON u.id = m.sender_id
"#;

/// Message repository backed by the `messages` table
#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    /// Create a new message repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn message_from_row(row: &PgRow) -> MessageView {
    let sender_id: Uuid = row.get("sender_id");
    MessageView {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_id,
        content: row.get("content"),
        is_read: row.get("is_read"),
        created_at: row.get("created_at"),
        sender: UserSummary {
            id: sender_id,
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            email: row.get("email"),
        },
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn append(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> DatabaseResult<AppendOutcome> {
        let mut tx = self.pool.begin().await?;

        // Serializes appends and membership changes per conversation, so
        // `participants` holds until commit
        let Some(participants) = lock_participants(&mut tx, conversation_id).await? else {
            return Ok(AppendOutcome::ConversationMissing);
        };
        if !participants.contains(&sender_id) {
            return Ok(AppendOutcome::NotParticipant);
        }

        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, is_read, created_at)
            VALUES ($1, $2, $3, $4, FALSE, $5)
            "#,
        )
        .bind(id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET last_message_id = $2, updated_at = $3 WHERE id = $1")
            .bind(conversation_id)
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(&format!("{} WHERE m.id = $1", SELECT_MESSAGE))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(AppendOutcome::Appended {
            message: message_from_row(&row),
            participants,
        })
    }

    async fn find(&self, message_id: Uuid) -> DatabaseResult<Option<MessageView>> {
        let row = sqlx::query(&format!("{} WHERE m.id = $1", SELECT_MESSAGE))
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(message_from_row))
    }

    async fn list(
        &self,
        conversation_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> DatabaseResult<Vec<MessageView>> {
        let rows = sqlx::query(&format!(
            "{} WHERE m.conversation_id = $1 ORDER BY m.created_at DESC, m.id DESC LIMIT $2 OFFSET $3",
            SELECT_MESSAGE
        ))
        .bind(conversation_id)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(message_from_row).collect())
    }

    async fn mark_read(&self, conversation_id: Uuid, reader_id: Uuid) -> DatabaseResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET is_read = TRUE
            WHERE conversation_id = $1 AND sender_id <> $2 AND NOT is_read
            "#,
        )
        .bind(conversation_id)
        .bind(reader_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn unread_counts(&self, user_id: Uuid) -> DatabaseResult<Vec<UnreadCount>> {
        let rows = sqlx::query(
            r#"
            SELECT m.conversation_id, COUNT(*) AS unread
            FROM messages m
            JOIN conversation_participants p
              ON p.conversation_id = m.conversation_id AND p.user_id = $1
            WHERE m.sender_id <> $1 AND NOT m.is_read
            GROUP BY m.conversation_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| UnreadCount {
                conversation_id: row.get("conversation_id"),
                count: row.get("unread"),
            })
            .collect())
    }
}
