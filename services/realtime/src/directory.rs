//! Conversation Directory
//!
//! Resolves conversations and their participant sets and applies the
//! membership rules. Never touches the connection registry.

use auth::{IdentityService, UserSummary};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{RealtimeError, RealtimeResult};
use crate::ledger::MessageLedger;
use crate::models::{Conversation, ConversationOverview, NewConversation, ParticipantChange};
use crate::repositories::ConversationRepository;

#[derive(Clone)]
pub struct ConversationDirectory {
    conversations: Arc<dyn ConversationRepository>,
    identity: IdentityService,
}

impl ConversationDirectory {
    pub fn new(conversations: Arc<dyn ConversationRepository>, identity: IdentityService) -> Self {
        Self {
            conversations,
            identity,
        }
    }

    /// Load a conversation or fail with `NotFound`
    pub async fn get(&self, conversation_id: Uuid) -> RealtimeResult<Conversation> {
        self.conversations
            .find(conversation_id)
            .await?
            .ok_or(RealtimeError::NotFound("Conversation"))
    }

    /// Load a conversation `user_id` currently participates in
    pub async fn require_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> RealtimeResult<Conversation> {
        let conversation = self.get(conversation_id).await?;
        if !conversation.is_participant(user_id) {
            return Err(RealtimeError::Forbidden(
                "You are not a participant of this conversation".to_string(),
            ));
        }
        Ok(conversation)
    }

    /// Create a conversation on behalf of `creator`.
    ///
    /// The creator is always a participant. For a direct conversation that
    /// already exists the stored one is returned together with `false`.
    pub async fn create(
        &self,
        creator: Uuid,
        participant_ids: &[Uuid],
        name: Option<String>,
        is_group: bool,
    ) -> RealtimeResult<(Conversation, bool)> {
        let mut participants: BTreeSet<Uuid> = participant_ids.iter().copied().collect();
        participants.insert(creator);

        if !is_group && participants.len() != 2 {
            return Err(RealtimeError::BadRequest(
                "A direct conversation needs exactly two distinct participants".to_string(),
            ));
        }

        let ids: Vec<Uuid> = participants.iter().copied().collect();
        let known = self.identity.summaries(&ids).await?;
        if known.len() != participants.len() {
            return Err(RealtimeError::NotFound("User"));
        }

        let name = name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        let (conversation, created) = self
            .conversations
            .create_or_get(NewConversation {
                name,
                is_group,
                participants,
            })
            .await?;

        if created {
            info!(
                conversation_id = %conversation.id,
                creator = %creator,
                "Created {} conversation with {} participants",
                if is_group { "group" } else { "direct" },
                conversation.participants.len()
            );
        }
        Ok((conversation, created))
    }

    /// Conversations of `user_id` with members, last message and unread count
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        ledger: &MessageLedger,
    ) -> RealtimeResult<Vec<ConversationOverview>> {
        let conversations = self.conversations.list_for_user(user_id).await?;

        let everyone: Vec<Uuid> = conversations
            .iter()
            .flat_map(|conversation| conversation.participants.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let summaries: HashMap<Uuid, UserSummary> = self
            .identity
            .summaries(&everyone)
            .await?
            .into_iter()
            .map(|summary| (summary.id, summary))
            .collect();

        let unread: HashMap<Uuid, i64> = ledger
            .unread_counts(user_id)
            .await?
            .into_iter()
            .map(|entry| (entry.conversation_id, entry.count))
            .collect();

        let mut overviews = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let last_message = ledger.last_message(&conversation).await?;
            let members = conversation
                .participants
                .iter()
                .filter_map(|id| summaries.get(id).cloned())
                .collect();
            let unread_count = unread.get(&conversation.id).copied().unwrap_or(0);
            overviews.push(ConversationOverview {
                conversation,
                members,
                last_message,
                unread_count,
            });
        }
        Ok(overviews)
    }

    /// Add `user_id` to a group conversation on behalf of `actor`
    pub async fn add_participant(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> RealtimeResult<ParticipantChange> {
        let conversation = self.get(conversation_id).await?;
        ensure_group(&conversation)?;
        if !conversation.is_participant(actor) {
            return Err(RealtimeError::Forbidden(
                "Only participants can add members".to_string(),
            ));
        }
        if self.identity.find_by_id(user_id).await?.is_none() {
            return Err(RealtimeError::NotFound("User"));
        }

        let change = self
            .conversations
            .add_participant(conversation_id, user_id)
            .await?
            .ok_or(RealtimeError::NotFound("Conversation"))?;

        if !change.is_noop() {
            info!(conversation_id = %conversation_id, actor = %actor, user_id = %user_id, "Participant added");
        }
        Ok(change)
    }

    /// Remove `user_id` from a group conversation on behalf of `actor`.
    ///
    /// Anyone may remove themselves; removing others requires participation.
    pub async fn remove_participant(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> RealtimeResult<ParticipantChange> {
        let conversation = self.get(conversation_id).await?;
        ensure_group(&conversation)?;
        if actor != user_id && !conversation.is_participant(actor) {
            return Err(RealtimeError::Forbidden(
                "Only participants can remove members".to_string(),
            ));
        }

        let change = self
            .conversations
            .remove_participant(conversation_id, user_id)
            .await?
            .ok_or(RealtimeError::NotFound("Conversation"))?;

        if !change.is_noop() {
            info!(conversation_id = %conversation_id, actor = %actor, user_id = %user_id, "Participant removed");
        }
        Ok(change)
    }
}

fn ensure_group(conversation: &Conversation) -> RealtimeResult<()> {
    if conversation.is_group {
        Ok(())
    } else {
        Err(RealtimeError::Forbidden(
            "Direct conversations have fixed participants".to_string(),
        ))
    }
}
