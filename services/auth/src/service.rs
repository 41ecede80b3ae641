//! Credential verification and account registration

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::models::user::normalize_email;
use crate::models::{LoginCredentials, NewUser, Registration, User, UserSummary};
use crate::password::PasswordHashing;
use crate::repositories::UserRepository;
use crate::validation::{mask_email, validate_registration};

/// Entry point the realtime gateway uses to turn credentials into users
#[derive(Clone)]
pub struct IdentityService {
    users: Arc<dyn UserRepository>,
    hashing: PasswordHashing,
}

impl IdentityService {
    pub fn new(users: Arc<dyn UserRepository>, hashing: PasswordHashing) -> Self {
        Self { users, hashing }
    }

    /// Check an email/password pair.
    ///
    /// Unknown emails and wrong passwords both yield
    /// [`AuthError::InvalidCredentials`].
    pub async fn verify_credentials(&self, credentials: &LoginCredentials) -> AuthResult<User> {
        let email = normalize_email(&credentials.email);
        if email.is_empty() || credentials.password.is_empty() {
            return Err(AuthError::Validation(
                "Email and password are required".to_string(),
            ));
        }

        let Some(user) = self.users.find_by_email(&email).await? else {
            info!("Login rejected for unknown email {}", mask_email(&email));
            return Err(AuthError::InvalidCredentials);
        };

        let hashing = self.hashing.clone();
        let password = credentials.password.clone();
        let stored_hash = user.password_hash.clone();
        let valid = tokio::task::spawn_blocking(move || hashing.verify(&password, &stored_hash))
            .await
            .map_err(|e| AuthError::Hashing(format!("Password verification task failed: {}", e)))??;

        if !valid {
            info!(user_id = %user.id, "Login rejected: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        Ok(user)
    }

    /// Create a new account after validating input and checking for an
    /// existing user with the same email.
    pub async fn register(&self, registration: &Registration) -> AuthResult<User> {
        validate_registration(registration).map_err(AuthError::Validation)?;

        let email = normalize_email(&registration.email);
        if self.users.find_by_email(&email).await?.is_some() {
            warn!("Registration rejected, email already in use: {}", mask_email(&email));
            return Err(AuthError::Conflict);
        }

        let hashing = self.hashing.clone();
        let password = registration.password.clone();
        let password_hash = tokio::task::spawn_blocking(move || hashing.hash(&password))
            .await
            .map_err(|e| AuthError::Hashing(format!("Password hashing task failed: {}", e)))??;

        // The unique index still guards the race between the check above and this insert
        let user = self
            .users
            .insert(NewUser {
                first_name: registration.first_name.trim().to_string(),
                last_name: registration.last_name.trim().to_string(),
                email,
                password_hash,
            })
            .await?;

        info!(user_id = %user.id, "Registered new user");
        Ok(user)
    }

    /// Find a user by ID
    pub async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>> {
        self.users.find_by_id(id).await
    }

    /// Public summaries for every known user in `ids`, in no particular order
    pub async fn summaries(&self, ids: &[Uuid]) -> AuthResult<Vec<UserSummary>> {
        let users = self.users.find_many(ids).await?;
        Ok(users.iter().map(User::summary).collect())
    }
}
