//! Message Ledger: appends messages, tracks read state and unread counts

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::config::GatewaySettings;
use crate::error::{RealtimeError, RealtimeResult};
use crate::models::{AppendOutcome, Conversation, MessageView, UnreadCount};
use crate::repositories::MessageRepository;

#[derive(Clone)]
pub struct MessageLedger {
    messages: Arc<dyn MessageRepository>,
    max_message_len: usize,
    default_page_size: u32,
    max_page_size: u32,
}

impl MessageLedger {
    pub fn new(messages: Arc<dyn MessageRepository>, settings: &GatewaySettings) -> Self {
        Self {
            messages,
            max_message_len: settings.max_message_len,
            default_page_size: settings.default_page_size,
            max_page_size: settings.max_page_size.max(1),
        }
    }

    /// Append a message and return it with sender data, together with the
    /// participant set it was stored against. A sender who is not a
    /// participant at that moment gets Forbidden and nothing is stored.
    pub async fn append(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> RealtimeResult<(MessageView, BTreeSet<Uuid>)> {
        let content = content.trim();
        if content.is_empty() {
            return Err(RealtimeError::BadRequest(
                "Message content must not be empty".to_string(),
            ));
        }
        if content.chars().count() > self.max_message_len {
            return Err(RealtimeError::BadRequest(format!(
                "Message content exceeds {} characters",
                self.max_message_len
            )));
        }

        match self
            .messages
            .append(conversation_id, sender_id, content)
            .await?
        {
            AppendOutcome::Appended {
                message,
                participants,
            } => {
                debug!(conversation_id = %conversation_id, message_id = %message.id, "Stored message");
                Ok((message, participants))
            }
            AppendOutcome::ConversationMissing => Err(RealtimeError::NotFound("Conversation")),
            AppendOutcome::NotParticipant => Err(RealtimeError::Forbidden(
                "You are not a participant of this conversation".to_string(),
            )),
        }
    }

    /// Mark every unread message not authored by `reader_id` as read
    pub async fn mark_read(&self, conversation_id: Uuid, reader_id: Uuid) -> RealtimeResult<u64> {
        Ok(self.messages.mark_read(conversation_id, reader_id).await?)
    }

    /// One page of messages, newest first
    pub async fn list(
        &self,
        conversation_id: Uuid,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> RealtimeResult<Vec<MessageView>> {
        let limit = self.page_size(limit);
        Ok(self
            .messages
            .list(conversation_id, limit, offset.unwrap_or(0))
            .await?)
    }

    pub async fn last_message(
        &self,
        conversation: &Conversation,
    ) -> RealtimeResult<Option<MessageView>> {
        match conversation.last_message_id {
            Some(id) => Ok(self.messages.find(id).await?),
            None => Ok(None),
        }
    }

    pub async fn unread_counts(&self, user_id: Uuid) -> RealtimeResult<Vec<UnreadCount>> {
        Ok(self.messages.unread_counts(user_id).await?)
    }

    fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }
}
