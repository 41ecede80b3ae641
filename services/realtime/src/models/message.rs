//! Message models

use auth::UserSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A stored message together with its sender's display data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub sender: UserSummary,
}

/// Unread messages of one conversation for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub conversation_id: Uuid,
    pub count: i64,
}

/// Result of appending a message under the conversation's lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored. `participants` is the membership the append committed against.
    Appended {
        message: MessageView,
        participants: BTreeSet<Uuid>,
    },
    ConversationMissing,
    /// The sender was not a participant when the lock was taken
    NotParticipant,
}
