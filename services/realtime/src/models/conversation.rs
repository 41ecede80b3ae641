//! Conversation models

use auth::UserSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::message::MessageView;

/// A direct or group conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub name: Option<String>,
    pub is_group: bool,
    pub participants: BTreeSet<Uuid>,
    pub last_message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }
}

/// Conversation creation payload
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub name: Option<String>,
    pub is_group: bool,
    pub participants: BTreeSet<Uuid>,
}

impl NewConversation {
    /// Uniqueness key of a direct conversation, `None` for groups
    pub fn direct_key(&self) -> Option<String> {
        if self.is_group {
            return None;
        }
        let mut members = self.participants.iter();
        match (members.next(), members.next(), members.next()) {
            (Some(a), Some(b), None) => Some(direct_key(*a, *b)),
            _ => None,
        }
    }
}

/// Order-independent key identifying the direct conversation between two users
fn direct_key(a: Uuid, b: Uuid) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", low, high)
}

/// Membership before and after a participant change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantChange {
    pub before: BTreeSet<Uuid>,
    pub after: BTreeSet<Uuid>,
}

impl ParticipantChange {
    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }

    /// Everyone who was or is a participant
    pub fn audience(&self) -> BTreeSet<Uuid> {
        self.before.union(&self.after).copied().collect()
    }
}

/// Conversation as listed for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationOverview {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub members: Vec<UserSummary>,
    pub last_message: Option<MessageView>,
    pub unread_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_key_ignores_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(direct_key(a, b), direct_key(b, a));
    }

    #[test]
    fn groups_have_no_direct_key() {
        let participants: BTreeSet<Uuid> = [Uuid::new_v4(), Uuid::new_v4()].into();
        let group = NewConversation {
            name: Some("friends".to_string()),
            is_group: true,
            participants: participants.clone(),
        };
        let direct = NewConversation {
            name: None,
            is_group: false,
            participants,
        };
        assert_eq!(group.direct_key(), None);
        assert!(direct.direct_key().is_some());
    }

    #[test]
    fn audience_includes_removed_participants() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let change = ParticipantChange {
            before: [a, b].into(),
            after: [a].into(),
        };
        assert!(!change.is_noop());
        assert!(change.audience().contains(&b));
    }
}
