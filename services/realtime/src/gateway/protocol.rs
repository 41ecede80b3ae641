//! Wire protocol
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}` in
//! both directions. Events without payload may omit `data`.

use auth::{LoginCredentials, Registration, UserSummary};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::{ErrorKind, RealtimeError};
use crate::models::{Conversation, ConversationOverview, MessageView, UnreadCount};

/// Login request received over the socket
#[derive(Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub device_info: Option<String>,
}

impl LoginRequest {
    pub fn credentials(&self) -> LoginCredentials {
        LoginCredentials {
            email: self.email.clone(),
            password: self.password.clone(),
        }
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"***")
            .field("device_info", &self.device_info)
            .finish()
    }
}

/// Client → server events
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Authenticate {
        session_id: String,
    },
    Login(LoginRequest),
    Register(Registration),
    Logout,
    SendMessage {
        conversation_id: Uuid,
        content: String,
    },
    MarkRead {
        conversation_id: Uuid,
    },
    Typing {
        conversation_id: Uuid,
    },
    CreateConversation {
        participant_ids: Vec<Uuid>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        is_group: bool,
    },
    AddParticipant {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    RemoveParticipant {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    LeaveConversation {
        conversation_id: Uuid,
    },
    GetConversations,
    GetMessages {
        conversation_id: Uuid,
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        offset: Option<u32>,
    },
    GetUnreadCounts,
}

impl ClientEvent {
    /// Wire name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Authenticate { .. } => "authenticate",
            ClientEvent::Login(_) => "login",
            ClientEvent::Register(_) => "register",
            ClientEvent::Logout => "logout",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::MarkRead { .. } => "mark_read",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::CreateConversation { .. } => "create_conversation",
            ClientEvent::AddParticipant { .. } => "add_participant",
            ClientEvent::RemoveParticipant { .. } => "remove_participant",
            ClientEvent::LeaveConversation { .. } => "leave_conversation",
            ClientEvent::GetConversations => "get_conversations",
            ClientEvent::GetMessages { .. } => "get_messages",
            ClientEvent::GetUnreadCounts => "get_unread_counts",
        }
    }

    /// Parse one text frame
    pub fn parse(frame: &str) -> Result<Self, RealtimeError> {
        serde_json::from_str(frame)
            .map_err(|e| RealtimeError::BadRequest(format!("Malformed event: {}", e)))
    }
}

/// Server → client events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    AuthSuccess {
        user: UserSummary,
        session_id: String,
    },
    AuthError {
        kind: ErrorKind,
        message: String,
    },
    LogoutSuccess,
    Error {
        kind: ErrorKind,
        message: String,
    },
    NewMessage {
        message: MessageView,
    },
    MessagesRead {
        conversation_id: Uuid,
        user_id: Uuid,
        count: u64,
    },
    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    ConversationCreated {
        conversation: Conversation,
    },
    ParticipantsChanged {
        conversation_id: Uuid,
        participants: Vec<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        added: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        removed: Option<Uuid>,
    },
    ConversationsList {
        conversations: Vec<ConversationOverview>,
    },
    MessagesList {
        conversation_id: Uuid,
        messages: Vec<MessageView>,
    },
    UnreadCounts {
        counts: Vec<UnreadCount>,
    },
    /// Server-initiated payload for one user; `data` is the payload itself
    Notification(Value),
    /// Server-initiated payload for every authenticated connection
    Update(Value),
}

impl ServerEvent {
    pub fn error(err: &RealtimeError) -> Self {
        ServerEvent::Error {
            kind: err.kind(),
            message: err.client_message(),
        }
    }

    pub fn auth_error(err: &RealtimeError) -> Self {
        ServerEvent::AuthError {
            kind: err.kind(),
            message: err.client_message(),
        }
    }

    /// Wire name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::AuthSuccess { .. } => "auth_success",
            ServerEvent::AuthError { .. } => "auth_error",
            ServerEvent::LogoutSuccess => "logout_success",
            ServerEvent::Error { .. } => "error",
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::MessagesRead { .. } => "messages_read",
            ServerEvent::UserTyping { .. } => "user_typing",
            ServerEvent::ConversationCreated { .. } => "conversation_created",
            ServerEvent::ParticipantsChanged { .. } => "participants_changed",
            ServerEvent::ConversationsList { .. } => "conversations_list",
            ServerEvent::MessagesList { .. } => "messages_list",
            ServerEvent::UnreadCounts { .. } => "unread_counts",
            ServerEvent::Notification(_) => "notification",
            ServerEvent::Update(_) => "update",
        }
    }

    /// Serialize into one text frame
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
