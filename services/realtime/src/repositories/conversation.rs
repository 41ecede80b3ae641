//! PostgreSQL conversation repository

use async_trait::async_trait;
use chrono::Utc;
use common::error::DatabaseResult;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::ConversationRepository;
use crate::models::{Conversation, NewConversation, ParticipantChange};

const SELECT_CONVERSATION: &str = r#"
    SELECT c.id, c.name, c.is_group, c.last_message_id, c.created_at, c.updated_at,
           ARRAY(
               SELECT p.user_id FROM conversation_participants p
               WHERE p.conversation_id = c.id
           ) AS participants
    FROM conversations c
"#;

/// Conversation repository backed by `conversations` and `conversation_participants`
#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    /// Create a new conversation repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn conversation_from_row(row: &PgRow) -> Conversation {
    let participants: Vec<Uuid> = row.get("participants");
    Conversation {
        id: row.get("id"),
        name: row.get("name"),
        is_group: row.get("is_group"),
        participants: participants.into_iter().collect(),
        last_message_id: row.get("last_message_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

async fn load(conn: &mut PgConnection, id: Uuid) -> DatabaseResult<Option<Conversation>> {
    let row = sqlx::query(&format!("{} WHERE c.id = $1", SELECT_CONVERSATION))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.as_ref().map(conversation_from_row))
}

/// Lock the conversation row and return its current participants
/// Lock the conversation row and read its members. Every membership change
/// and every message append goes through this lock.
pub(super) async fn lock_participants(
    conn: &mut PgConnection,
    conversation_id: Uuid,
) -> DatabaseResult<Option<BTreeSet<Uuid>>> {
    let exists = sqlx::query("SELECT id FROM conversations WHERE id = $1 FOR UPDATE")
        .bind(conversation_id)
        .fetch_optional(&mut *conn)
        .await?;

    if exists.is_none() {
        return Ok(None);
    }

    let members: Vec<Uuid> = sqlx::query_scalar(
        "SELECT user_id FROM conversation_participants WHERE conversation_id = $1",
    )
    .bind(conversation_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(members.into_iter().collect()))
}

async fn touch(conn: &mut PgConnection, conversation_id: Uuid) -> DatabaseResult<()> {
    sqlx::query("UPDATE conversations SET updated_at = $2 WHERE id = $1")
        .bind(conversation_id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn find(&self, id: Uuid) -> DatabaseResult<Option<Conversation>> {
        let mut conn = self.pool.acquire().await?;
        load(&mut conn, id).await
    }

    async fn create_or_get(&self, new: NewConversation) -> DatabaseResult<(Conversation, bool)> {
        let key = new.direct_key();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // The unique direct_key makes concurrent creation of the same direct
        // conversation collapse into a single row
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO conversations (id, name, is_group, direct_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (direct_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(new.is_group)
        .bind(&key)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(id) = inserted else {
            tx.rollback().await?;
            let existing = sqlx::query(&format!("{} WHERE c.direct_key = $1", SELECT_CONVERSATION))
                .bind(&key)
                .fetch_one(&self.pool)
                .await?;
            return Ok((conversation_from_row(&existing), false));
        };

        for user_id in &new.participants {
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, user_id) VALUES ($1, $2)",
            )
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        let conversation = load(&mut tx, id).await?;
        tx.commit().await?;

        let conversation = conversation.ok_or(sqlx::Error::RowNotFound)?;
        Ok((conversation, true))
    }

    async fn list_for_user(&self, user_id: Uuid) -> DatabaseResult<Vec<Conversation>> {
        let rows = sqlx::query(&format!(
            r#"{}
            WHERE EXISTS (
                SELECT 1 FROM conversation_participants me
                WHERE me.conversation_id = c.id AND me.user_id = $1
            )
            ORDER BY c.updated_at DESC
            "#,
            SELECT_CONVERSATION
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(conversation_from_row).collect())
    }

    async fn add_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> DatabaseResult<Option<ParticipantChange>> {
        let mut tx = self.pool.begin().await?;

        let Some(before) = lock_participants(&mut tx, conversation_id).await? else {
            return Ok(None);
        };

        let mut after = before.clone();
        if after.insert(user_id) {
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, user_id) VALUES ($1, $2)",
            )
            .bind(conversation_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
            touch(&mut tx, conversation_id).await?;
        }

        tx.commit().await?;
        Ok(Some(ParticipantChange { before, after }))
    }

    async fn remove_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> DatabaseResult<Option<ParticipantChange>> {
        let mut tx = self.pool.begin().await?;

        let Some(before) = lock_participants(&mut tx, conversation_id).await? else {
            return Ok(None);
        };

        let mut after = before.clone();
        if after.remove(&user_id) {
            sqlx::query(
                "DELETE FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2",
            )
            .bind(conversation_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
            touch(&mut tx, conversation_id).await?;
        }

        tx.commit().await?;
        Ok(Some(ParticipantChange { before, after }))
    }
}
