//! Realtime domain models

pub mod conversation;
pub mod message;
pub mod session;

pub use conversation::{
    Conversation, ConversationOverview, NewConversation, ParticipantChange,
};
pub use message::{AppendOutcome, MessageView, UnreadCount};
pub use session::Session;
