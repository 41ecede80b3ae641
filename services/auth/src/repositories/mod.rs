//! User storage

pub mod memory;
pub mod user;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AuthResult;
use crate::models::{NewUser, User};

pub use memory::InMemoryUserRepository;
pub use user::PgUserRepository;

/// Storage contract for user records
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user. Fails with [`crate::AuthError::Conflict`] when the email is taken.
    async fn insert(&self, new_user: NewUser) -> AuthResult<User>;

    /// Find a user by normalized email
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>>;

    /// Find a user by ID
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>>;

    /// Load every user whose ID is in `ids`. Unknown IDs are skipped.
    async fn find_many(&self, ids: &[Uuid]) -> AuthResult<Vec<User>>;
}
