//! Error types for identity operations

use common::error::DatabaseError;
use thiserror::Error;

/// Errors surfaced by the identity collaborator
#[derive(Error, Debug)]
pub enum AuthError {
    /// Unknown email or wrong password. Deliberately does not say which.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Another account already uses this email
    #[error("A user with this email already exists")]
    Conflict,

    /// Registration input rejected
    #[error("{0}")]
    Validation(String),

    /// Too many failed login attempts from the same origin
    #[error("Too many login attempts, try again later")]
    RateLimited,

    /// Argon2 failure or a corrupt stored hash
    #[error("Password hashing error: {0}")]
    Hashing(String),

    /// Underlying storage fault
    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Storage(err.into())
    }
}

/// Type alias for identity results
pub type AuthResult<T> = Result<T, AuthError>;
