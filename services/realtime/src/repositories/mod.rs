//! Storage contracts and their PostgreSQL and in-memory implementations
//!
//! Services only see the traits below. Every method is a potential
//! suspension point; none of them is ever awaited while the connection
//! registry lock is held.

pub mod conversation;
pub mod memory;
pub mod message;
pub mod session;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::DatabaseResult;
use uuid::Uuid;

use crate::models::{
    AppendOutcome, Conversation, MessageView, NewConversation, ParticipantChange, Session,
    UnreadCount,
};

pub use conversation::PgConversationRepository;
pub use memory::InMemoryStore;
pub use message::PgMessageRepository;
pub use session::PgSessionRepository;

/// Persistence for login sessions
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: &Session) -> DatabaseResult<()>;

    /// Refresh `last_activity_at` of a usable session in one conditional
    /// update and return it. `None` when missing, inactive or expired.
    async fn touch_if_usable(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Option<Session>>;

    /// Returns the number of sessions flipped to inactive
    async fn deactivate(&self, session_id: &str) -> DatabaseResult<u64>;

    async fn deactivate_for_user(
        &self,
        user_id: Uuid,
        except_session_id: Option<&str>,
    ) -> DatabaseResult<u64>;

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> DatabaseResult<u64>;

    async fn active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Vec<Session>>;
}

/// Persistence for conversations and their participant sets
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find(&self, id: Uuid) -> DatabaseResult<Option<Conversation>>;

    /// Create a conversation. For a direct conversation that already exists
    /// the stored one is returned with `false`.
    async fn create_or_get(&self, new: NewConversation) -> DatabaseResult<(Conversation, bool)>;

    /// Conversations `user_id` participates in, most recently active first
    async fn list_for_user(&self, user_id: Uuid) -> DatabaseResult<Vec<Conversation>>;

    /// `None` when the conversation does not exist
    async fn add_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> DatabaseResult<Option<ParticipantChange>>;

    /// `None` when the conversation does not exist
    async fn remove_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> DatabaseResult<Option<ParticipantChange>>;
}

/// Persistence for messages and read state
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Check that `sender_id` is a participant, insert the message and move
    /// the conversation's `last_message_id`, all in one atomic step. Nothing
    /// is stored unless the outcome is `Appended`.
    async fn append(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> DatabaseResult<AppendOutcome>;

    async fn find(&self, message_id: Uuid) -> DatabaseResult<Option<MessageView>>;

    /// Newest first
    async fn list(
        &self,
        conversation_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> DatabaseResult<Vec<MessageView>>;

    /// Flip unread messages not authored by `reader_id`; returns the count flipped
    async fn mark_read(&self, conversation_id: Uuid, reader_id: Uuid) -> DatabaseResult<u64>;

    async fn unread_counts(&self, user_id: Uuid) -> DatabaseResult<Vec<UnreadCount>>;
}
