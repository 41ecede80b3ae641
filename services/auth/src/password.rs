//! Argon2 password hashing

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};

use crate::error::{AuthError, AuthResult};

/// Argon2id hasher with configurable cost parameters
#[derive(Clone)]
pub struct PasswordHashing {
    params: Params,
}

impl Default for PasswordHashing {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl PasswordHashing {
    /// Create a hasher with explicit cost parameters
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    /// Cheapest parameters Argon2 accepts. Only for tests.
    pub fn insecure_fast() -> Self {
        let params = Params::new(Params::MIN_M_COST, Params::MIN_T_COST, 1, None)
            .expect("minimum argon2 params are valid");
        Self { params }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password into a PHC string
    pub fn hash(&self, password: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut rand::thread_rng());
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Hashing(format!("Failed to hash password: {}", e)))
    }

    /// Verify a password against a stored PHC string
    pub fn verify(&self, password: &str, password_hash: &str) -> AuthResult<bool> {
        let parsed_hash = PasswordHash::new(password_hash)
            .map_err(|e| AuthError::Hashing(format!("Failed to parse password hash: {}", e)))?;

        Ok(self
            .argon2()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}
