//! Application state shared across handlers

use auth::{
    IdentityService, InMemoryUserRepository, PasswordHashing, PgUserRepository, RateLimiter,
    UserRepository,
};
use sqlx::PgPool;
use std::sync::Arc;

use crate::cleanup::DisconnectCleanup;
use crate::config::Settings;
use crate::directory::ConversationDirectory;
use crate::error::RealtimeResult;
use crate::gateway::{Gateway, GatewayServices};
use crate::ledger::MessageLedger;
use crate::registry::ConnectionRegistry;
use crate::repositories::{
    ConversationRepository, InMemoryStore, MessageRepository, PgConversationRepository,
    PgMessageRepository, PgSessionRepository, SessionRepository,
};
use crate::session::SessionStore;

/// Backing storage chosen at startup
#[derive(Clone)]
pub enum Storage {
    Postgres(PgPool),
    Memory,
}

impl Storage {
    pub fn name(&self) -> &'static str {
        match self {
            Storage::Postgres(_) => "postgres",
            Storage::Memory => "memory",
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub storage: Storage,
}

impl AppState {
    /// Wire repositories, services and the gateway for `storage`
    pub fn build(
        settings: &Settings,
        storage: Storage,
        hashing: PasswordHashing,
        cleanup: Arc<dyn DisconnectCleanup>,
    ) -> Self {
        let (users, sessions, conversations, messages) = match &storage {
            Storage::Postgres(pool) => {
                let users: Arc<dyn UserRepository> = Arc::new(PgUserRepository::new(pool.clone()));
                let sessions: Arc<dyn SessionRepository> =
                    Arc::new(PgSessionRepository::new(pool.clone()));
                let conversations: Arc<dyn ConversationRepository> =
                    Arc::new(PgConversationRepository::new(pool.clone()));
                let messages: Arc<dyn MessageRepository> =
                    Arc::new(PgMessageRepository::new(pool.clone()));
                (users, sessions, conversations, messages)
            }
            Storage::Memory => {
                let users: Arc<dyn UserRepository> = Arc::new(InMemoryUserRepository::new());
                let store = Arc::new(InMemoryStore::new(users.clone()));
                let sessions: Arc<dyn SessionRepository> = store.clone();
                let conversations: Arc<dyn ConversationRepository> = store.clone();
                let messages: Arc<dyn MessageRepository> = store;
                (users, sessions, conversations, messages)
            }
        };

        let identity = IdentityService::new(users, hashing);
        let services = GatewayServices {
            sessions: SessionStore::new(sessions, settings.session.ttl_days),
            identity: identity.clone(),
            registry: ConnectionRegistry::new(),
            directory: ConversationDirectory::new(conversations, identity),
            ledger: MessageLedger::new(messages, &settings.gateway),
            cleanup,
            limiter: RateLimiter::new((&settings.rate_limit).into()),
        };

        Self {
            gateway: Gateway::new(services, settings.gateway.clone()),
            storage,
        }
    }

    /// Whether the backing storage answers
    pub async fn storage_healthy(&self) -> RealtimeResult<bool> {
        match &self.storage {
            Storage::Postgres(pool) => Ok(common::health_check(pool).await?),
            Storage::Memory => Ok(true),
        }
    }
}
