//! Identity collaborator for the realtime messaging backend
//!
//! Owns user records, password hashing and credential verification. The
//! realtime gateway never touches password hashes directly; it calls into
//! [`IdentityService`] and receives either a [`User`] or an [`AuthError`].

pub mod error;
pub mod models;
pub mod password;
pub mod rate_limiter;
pub mod repositories;
pub mod service;
pub mod validation;

pub use error::{AuthError, AuthResult};
pub use models::{LoginCredentials, NewUser, Registration, User, UserSummary};
pub use password::PasswordHashing;
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use repositories::{InMemoryUserRepository, PgUserRepository, UserRepository};
pub use service::IdentityService;
