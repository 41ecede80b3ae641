//! Realtime Gateway
//!
//! Drives the per-connection state machine
//! `Connected → Authenticating → Authenticated(user) → Closed`, dispatches
//! client events to the session store, directory and ledger, and fans the
//! resulting server events out through the connection registry.
//!
//! The gateway is transport agnostic. A transport calls [`Gateway::open`]
//! once, feeds every inbound frame to [`Gateway::handle_frame`] in arrival
//! order and always ends with [`Gateway::close`], whatever the reason the
//! connection ended. Outbound events are drained from the receiver returned
//! by `open`.

pub mod fanout;
pub mod protocol;
pub mod ws;

use auth::{IdentityService, RateLimiter, Registration, User};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cleanup::DisconnectCleanup;
use crate::config::GatewaySettings;
use crate::directory::ConversationDirectory;
use crate::error::{RealtimeError, RealtimeResult};
use crate::ledger::MessageLedger;
use crate::models::ParticipantChange;
use crate::registry::{BindOutcome, ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::session::SessionStore;

pub use protocol::{ClientEvent, LoginRequest, ServerEvent};

/// Lifecycle state of one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Authenticating,
    Authenticated { user_id: Uuid, session_id: String },
    Closed,
}

/// One live connection as seen by the gateway
#[derive(Debug)]
pub struct Connection {
    handle: ConnectionHandle,
    ip_address: String,
    state: ConnectionState,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match &self.state {
            ConnectionState::Authenticated { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    fn reply(&self, event: ServerEvent) {
        if !self.handle.send(event) {
            debug!(connection_id = %self.handle.id(), "Reply dropped, connection gone");
        }
    }
}

/// Collaborators the gateway dispatches to
pub struct GatewayServices {
    pub sessions: SessionStore,
    pub identity: IdentityService,
    pub registry: ConnectionRegistry,
    pub directory: ConversationDirectory,
    pub ledger: MessageLedger,
    pub cleanup: Arc<dyn DisconnectCleanup>,
    pub limiter: RateLimiter,
}

struct GatewayInner {
    services: GatewayServices,
    settings: GatewaySettings,
}

/// Shared, cheaply cloneable gateway
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn new(services: GatewayServices, settings: GatewaySettings) -> Self {
        Self {
            inner: Arc::new(GatewayInner { services, settings }),
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.services.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.services.sessions
    }

    fn services(&self) -> &GatewayServices {
        &self.inner.services
    }

    /// Accept a new physical connection in the `Connected` state
    pub fn open(
        &self,
        ip_address: impl Into<String>,
    ) -> (Connection, mpsc::UnboundedReceiver<ServerEvent>) {
        let (handle, rx) = ConnectionHandle::channel();
        let connection = Connection {
            handle,
            ip_address: ip_address.into(),
            state: ConnectionState::Connected,
        };
        debug!(connection_id = %connection.id(), ip = %connection.ip_address, "Connection opened");
        (connection, rx)
    }

    /// Parse and handle one inbound text frame.
    ///
    /// Malformed frames are answered with a `bad_request` error and the
    /// connection stays open.
    pub async fn handle_frame(&self, connection: &mut Connection, frame: &str) {
        match ClientEvent::parse(frame) {
            Ok(event) => self.handle(connection, event).await,
            Err(err) => {
                debug!(connection_id = %connection.id(), "Rejected frame: {}", err);
                connection.reply(ServerEvent::error(&err));
            }
        }
    }

    /// Handle one client event. Every failure becomes an event on this
    /// connection only.
    pub async fn handle(&self, connection: &mut Connection, event: ClientEvent) {
        if connection.is_closed() {
            return;
        }

        match event {
            ClientEvent::Authenticate { session_id } => {
                let previous = begin_authentication(connection);
                let result = self.resume_session(&session_id).await;
                self.finish_authentication(connection, previous, result)
                    .await;
            }
            ClientEvent::Login(request) => {
                let previous = begin_authentication(connection);
                let result = self.login(&connection.ip_address, &request).await;
                self.finish_authentication(connection, previous, result)
                    .await;
            }
            ClientEvent::Register(registration) => {
                let previous = begin_authentication(connection);
                let result = self
                    .register(&connection.ip_address, &registration)
                    .await;
                self.finish_authentication(connection, previous, result)
                    .await;
            }
            event => {
                let Some(user_id) = connection.user_id() else {
                    connection.reply(ServerEvent::error(&RealtimeError::Unauthenticated));
                    return;
                };

                let name = event.name();
                if let Err(err) = self.dispatch(connection, user_id, event).await {
                    log_failure(name, user_id, &err);
                    connection.reply(ServerEvent::error(&err));
                }
            }
        }
    }

    /// Tear the connection down. Safe to call more than once.
    ///
    /// Unbinding always completes. When the user has no connection left,
    /// transient files are cleaned up; a cleanup failure is only logged.
    pub async fn close(&self, connection: &mut Connection) {
        if connection.is_closed() {
            return;
        }

        let was_authenticated = connection.user_id();
        connection.state = ConnectionState::Closed;
        let unbound = self.registry().unbind(connection.id());

        let Some(user_id) = was_authenticated.or(unbound) else {
            debug!(connection_id = %connection.id(), "Unauthenticated connection closed");
            return;
        };
        info!(user_id = %user_id, connection_id = %connection.id(), "Connection closed");
        self.release_if_offline(user_id).await;
    }

    /// Run disconnect cleanup once `user_id` has no live connection left
    async fn release_if_offline(&self, user_id: Uuid) {
        if self.registry().is_online(user_id) {
            return;
        }
        if let Err(e) = self.services().cleanup.on_disconnect(user_id).await {
            warn!(user_id = %user_id, "Disconnect cleanup failed: {}", e);
        }
    }

    /// Push a server-initiated notification to every live connection of
    /// `user_id`. Returns the number of connections reached; zero when the
    /// user is offline.
    pub fn notify_user(&self, user_id: Uuid, notification: Value) -> usize {
        let delivered = fanout::deliver(
            self.registry(),
            [&user_id],
            &ServerEvent::Notification(notification),
            None,
        );
        debug!(user_id = %user_id, "Notification reached {} connection(s)", delivered);
        delivered
    }

    /// Push a server-initiated update to every authenticated connection
    pub fn broadcast_update(&self, update: Value) -> usize {
        let delivered = fanout::broadcast(self.registry(), &ServerEvent::Update(update));
        info!("Update broadcast to {} connection(s)", delivered);
        delivered
    }

    async fn resume_session(&self, session_id: &str) -> RealtimeResult<(User, String)> {
        let session = self
            .sessions()
            .validate_session(session_id)
            .await?
            .ok_or(RealtimeError::SessionExpired)?;

        let user = self
            .services()
            .identity
            .find_by_id(session.user_id)
            .await?
            .ok_or(RealtimeError::SessionExpired)?;

        Ok((user, session.session_id))
    }

    async fn login(&self, ip_address: &str, request: &LoginRequest) -> RealtimeResult<(User, String)> {
        let limiter = &self.services().limiter;
        if !limiter.is_allowed(ip_address).await {
            return Err(RealtimeError::RateLimited);
        }

        let user = match self
            .services()
            .identity
            .verify_credentials(&request.credentials())
            .await
        {
            Ok(user) => user,
            Err(auth::AuthError::InvalidCredentials) => {
                limiter.record_failure(ip_address).await;
                return Err(RealtimeError::InvalidCredentials);
            }
            Err(e) => return Err(e.into()),
        };
        limiter.reset(ip_address).await;

        let device_info = request.device_info.as_deref().unwrap_or_default();
        let session = self
            .sessions()
            .create_session(user.id, ip_address, device_info)
            .await?;
        Ok((user, session.session_id))
    }

    async fn register(
        &self,
        ip_address: &str,
        registration: &Registration,
    ) -> RealtimeResult<(User, String)> {
        let user = self.services().identity.register(registration).await?;
        let session = self
            .sessions()
            .create_session(user.id, ip_address, "")
            .await?;
        Ok((user, session.session_id))
    }

    async fn finish_authentication(
        &self,
        connection: &mut Connection,
        previous: ConnectionState,
        result: RealtimeResult<(User, String)>,
    ) {
        match result {
            Ok((user, session_id)) => {
                let switched_from = match self.registry().bind(user.id, &connection.handle) {
                    BindOutcome::Rebound { previous: old_user } => {
                        info!(connection_id = %connection.id(), "Connection switched from user {} to {}", old_user, user.id);
                        Some(old_user)
                    }
                    BindOutcome::Bound | BindOutcome::AlreadyBound => None,
                };
                connection.state = ConnectionState::Authenticated {
                    user_id: user.id,
                    session_id: session_id.clone(),
                };
                info!(user_id = %user.id, connection_id = %connection.id(), "Connection authenticated");
                connection.reply(ServerEvent::AuthSuccess {
                    user: user.summary(),
                    session_id,
                });
                if let Some(old_user) = switched_from {
                    self.release_if_offline(old_user).await;
                }
            }
            Err(err) => {
                connection.state = previous;
                match &err {
                    RealtimeError::Infrastructure(detail) => {
                        error!(connection_id = %connection.id(), "Authentication failed: {}", detail)
                    }
                    other => info!(connection_id = %connection.id(), "Authentication rejected: {}", other),
                }
                connection.reply(ServerEvent::auth_error(&err));
            }
        }
    }

    async fn dispatch(
        &self,
        connection: &mut Connection,
        user_id: Uuid,
        event: ClientEvent,
    ) -> RealtimeResult<()> {
        let services = self.services();

        match event {
            ClientEvent::Logout => {
                if let ConnectionState::Authenticated { session_id, .. } = &connection.state {
                    self.sessions().deactivate_session(session_id).await?;
                }
                self.registry().unbind(connection.id());
                connection.state = ConnectionState::Connected;
                info!(user_id = %user_id, connection_id = %connection.id(), "Logged out");
                connection.reply(ServerEvent::LogoutSuccess);
                self.release_if_offline(user_id).await;
            }
            ClientEvent::SendMessage {
                conversation_id,
                content,
            } => {
                // Membership is checked by the append itself, and the
                // message goes to the participants it was stored against
                let (message, participants) = services
                    .ledger
                    .append(conversation_id, user_id, &content)
                    .await?;
                self.fan_out(&participants, ServerEvent::NewMessage { message }, None);
            }
            ClientEvent::MarkRead { conversation_id } => {
                let conversation = services
                    .directory
                    .require_participant(conversation_id, user_id)
                    .await?;
                let count = services.ledger.mark_read(conversation_id, user_id).await?;
                let event = ServerEvent::MessagesRead {
                    conversation_id,
                    user_id,
                    count,
                };
                if count > 0 {
                    self.fan_out(&conversation.participants, event, None);
                } else {
                    connection.reply(event);
                }
            }
            ClientEvent::Typing { conversation_id } => {
                let conversation = services
                    .directory
                    .require_participant(conversation_id, user_id)
                    .await?;
                self.fan_out(
                    &conversation.participants,
                    ServerEvent::UserTyping {
                        conversation_id,
                        user_id,
                    },
                    Some(user_id),
                );
            }
            ClientEvent::CreateConversation {
                participant_ids,
                name,
                is_group,
            } => {
                let (conversation, created) = services
                    .directory
                    .create(user_id, &participant_ids, name, is_group)
                    .await?;
                let participants = conversation.participants.clone();
                let event = ServerEvent::ConversationCreated { conversation };
                if created {
                    self.fan_out(&participants, event, None);
                } else {
                    connection.reply(event);
                }
            }
            ClientEvent::AddParticipant {
                conversation_id,
                user_id: target,
            } => {
                let change = services
                    .directory
                    .add_participant(user_id, conversation_id, target)
                    .await?;
                self.announce_change(connection, conversation_id, change, Some(target), None);
            }
            ClientEvent::RemoveParticipant {
                conversation_id,
                user_id: target,
            } => {
                let change = services
                    .directory
                    .remove_participant(user_id, conversation_id, target)
                    .await?;
                self.announce_change(connection, conversation_id, change, None, Some(target));
            }
            ClientEvent::LeaveConversation { conversation_id } => {
                let change = services
                    .directory
                    .remove_participant(user_id, conversation_id, user_id)
                    .await?;
                self.announce_change(connection, conversation_id, change, None, Some(user_id));
            }
            ClientEvent::GetConversations => {
                let conversations = services
                    .directory
                    .list_for_user(user_id, &services.ledger)
                    .await?;
                connection.reply(ServerEvent::ConversationsList { conversations });
            }
            ClientEvent::GetMessages {
                conversation_id,
                limit,
                offset,
            } => {
                services
                    .directory
                    .require_participant(conversation_id, user_id)
                    .await?;
                let messages = services.ledger.list(conversation_id, limit, offset).await?;
                connection.reply(ServerEvent::MessagesList {
                    conversation_id,
                    messages,
                });
            }
            ClientEvent::GetUnreadCounts => {
                let counts = services.ledger.unread_counts(user_id).await?;
                connection.reply(ServerEvent::UnreadCounts { counts });
            }
            // Handled before dispatch
            ClientEvent::Authenticate { .. } | ClientEvent::Login(_) | ClientEvent::Register(_) => {}
        }

        Ok(())
    }

    /// Participant changes go to everyone who was or is a participant, so a
    /// removed user still learns about it. No-op changes only answer the
    /// requester.
    fn announce_change(
        &self,
        connection: &Connection,
        conversation_id: Uuid,
        change: ParticipantChange,
        added: Option<Uuid>,
        removed: Option<Uuid>,
    ) {
        let event = ServerEvent::ParticipantsChanged {
            conversation_id,
            participants: change.after.iter().copied().collect(),
            added: added.filter(|_| !change.is_noop()),
            removed: removed.filter(|_| !change.is_noop()),
        };

        if change.is_noop() {
            connection.reply(event);
        } else {
            self.fan_out(&change.audience(), event, None);
        }
    }

    fn fan_out<'a, I>(&self, users: I, event: ServerEvent, exclude: Option<Uuid>)
    where
        I: IntoIterator<Item = &'a Uuid>,
    {
        let delivered = fanout::deliver(self.registry(), users, &event, exclude);
        debug!("Delivered {} to {} connection(s)", event.name(), delivered);
    }
}

fn begin_authentication(connection: &mut Connection) -> ConnectionState {
    std::mem::replace(&mut connection.state, ConnectionState::Authenticating)
}

fn log_failure(event: &str, user_id: Uuid, err: &RealtimeError) {
    match err {
        RealtimeError::Infrastructure(detail) => {
            error!(user_id = %user_id, "Failed to handle {}: {}", event, detail)
        }
        other => debug!(user_id = %user_id, "Rejected {}: {}", event, other),
    }
}
