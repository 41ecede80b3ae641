//! In-memory storage for tests and single-process development
//!
//! One lock guards sessions, conversations and messages together, so every
//! trait method is atomic with respect to every other.

use async_trait::async_trait;
use auth::{AuthError, UserRepository};
use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ConversationRepository, MessageRepository, SessionRepository};
use crate::models::{
    AppendOutcome, Conversation, MessageView, NewConversation, ParticipantChange, Session,
    UnreadCount,
};

#[derive(Default)]
struct State {
    sessions: HashMap<String, Session>,
    conversations: HashMap<Uuid, Conversation>,
    direct: HashMap<String, Uuid>,
    /// Messages per conversation, oldest first
    messages: HashMap<Uuid, Vec<MessageView>>,
}

/// Session, conversation and message storage kept in process memory
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    users: Arc<dyn UserRepository>,
}

impl InMemoryStore {
    /// `users` provides sender data for stored messages
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            users,
        }
    }
}

fn storage_error(err: AuthError) -> DatabaseError {
    match err {
        AuthError::Storage(db) => db,
        other => DatabaseError::Configuration(other.to_string()),
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn insert(&self, session: &Session) -> DatabaseResult<()> {
        let mut state = self.state.write().await;
        state
            .sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn touch_if_usable(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Option<Session>> {
        let mut state = self.state.write().await;
        Ok(state
            .sessions
            .get_mut(session_id)
            .filter(|session| session.is_usable(now))
            .map(|session| {
                session.last_activity_at = now;
                session.clone()
            }))
    }

    async fn deactivate(&self, session_id: &str) -> DatabaseResult<u64> {
        let mut state = self.state.write().await;
        match state.sessions.get_mut(session_id) {
            Some(session) if session.is_active => {
                session.is_active = false;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn deactivate_for_user(
        &self,
        user_id: Uuid,
        except_session_id: Option<&str>,
    ) -> DatabaseResult<u64> {
        let mut state = self.state.write().await;
        let mut flipped = 0;
        for session in state.sessions.values_mut() {
            if session.user_id == user_id
                && session.is_active
                && except_session_id != Some(session.session_id.as_str())
            {
                session.is_active = false;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> DatabaseResult<u64> {
        let mut state = self.state.write().await;
        let mut flipped = 0;
        for session in state.sessions.values_mut() {
            if session.is_active && session.expires_at <= now {
                session.is_active = false;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Vec<Session>> {
        let state = self.state.read().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|session| session.user_id == user_id && session.is_usable(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }
}

#[async_trait]
impl ConversationRepository for InMemoryStore {
    async fn find(&self, id: Uuid) -> DatabaseResult<Option<Conversation>> {
        Ok(self.state.read().await.conversations.get(&id).cloned())
    }

    async fn create_or_get(&self, new: NewConversation) -> DatabaseResult<(Conversation, bool)> {
        let key = new.direct_key();
        let mut state = self.state.write().await;

        if let Some(existing) = key
            .as_ref()
            .and_then(|key| state.direct.get(key))
            .and_then(|id| state.conversations.get(id))
        {
            return Ok((existing.clone(), false));
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            name: new.name,
            is_group: new.is_group,
            participants: new.participants,
            last_message_id: None,
            created_at: now,
            updated_at: now,
        };

        if let Some(key) = key {
            state.direct.insert(key, conversation.id);
        }
        state
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok((conversation, true))
    }

    async fn list_for_user(&self, user_id: Uuid) -> DatabaseResult<Vec<Conversation>> {
        let state = self.state.read().await;
        let mut conversations: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|conversation| conversation.is_participant(user_id))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn add_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> DatabaseResult<Option<ParticipantChange>> {
        let mut state = self.state.write().await;
        let Some(conversation) = state.conversations.get_mut(&conversation_id) else {
            return Ok(None);
        };

        let before = conversation.participants.clone();
        if conversation.participants.insert(user_id) {
            conversation.updated_at = Utc::now();
        }

        Ok(Some(ParticipantChange {
            before,
            after: conversation.participants.clone(),
        }))
    }

    async fn remove_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> DatabaseResult<Option<ParticipantChange>> {
        let mut state = self.state.write().await;
        let Some(conversation) = state.conversations.get_mut(&conversation_id) else {
            return Ok(None);
        };

        let before = conversation.participants.clone();
        if conversation.participants.remove(&user_id) {
            conversation.updated_at = Utc::now();
        }

        Ok(Some(ParticipantChange {
            before,
            after: conversation.participants.clone(),
        }))
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn append(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> DatabaseResult<AppendOutcome> {
        // Resolved before taking the lock; the lock is never held across
        // a call into another store
        let sender = self
            .users
            .find_by_id(sender_id)
            .await
            .map_err(storage_error)?
            .ok_or(DatabaseError::Query(sqlx::Error::RowNotFound))?;

        let mut state = self.state.write().await;
        let now = Utc::now();

        let Some(conversation) = state.conversations.get_mut(&conversation_id) else {
            return Ok(AppendOutcome::ConversationMissing);
        };
        if !conversation.is_participant(sender_id) {
            return Ok(AppendOutcome::NotParticipant);
        }

        let message = MessageView {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: content.to_string(),
            is_read: false,
            created_at: now,
            sender: sender.summary(),
        };

        conversation.last_message_id = Some(message.id);
        conversation.updated_at = now;
        let participants = conversation.participants.clone();
        state
            .messages
            .entry(conversation_id)
            .or_default()
            .push(message.clone());

        Ok(AppendOutcome::Appended {
            message,
            participants,
        })
    }

    async fn find(&self, message_id: Uuid) -> DatabaseResult<Option<MessageView>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .values()
            .flatten()
            .find(|message| message.id == message_id)
            .cloned())
    }

    async fn list(
        &self,
        conversation_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> DatabaseResult<Vec<MessageView>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .get(&conversation_id)
            .map(|messages| {
                messages
                    .iter()
                    .rev()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn mark_read(&self, conversation_id: Uuid, reader_id: Uuid) -> DatabaseResult<u64> {
        let mut state = self.state.write().await;
        let mut flipped = 0;
        if let Some(messages) = state.messages.get_mut(&conversation_id) {
            for message in messages
                .iter_mut()
                .filter(|message| message.sender_id != reader_id && !message.is_read)
            {
                message.is_read = true;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn unread_counts(&self, user_id: Uuid) -> DatabaseResult<Vec<UnreadCount>> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .values()
            .filter(|conversation| conversation.is_participant(user_id))
            .filter_map(|conversation| {
                let count = state
                    .messages
                    .get(&conversation.id)?
                    .iter()
                    .filter(|message| message.sender_id != user_id && !message.is_read)
                    .count() as i64;
                (count > 0).then_some(UnreadCount {
                    conversation_id: conversation.id,
                    count,
                })
            })
            .collect())
    }
}
