//! In-memory user repository for tests and single-process development

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::UserRepository;
use crate::error::{AuthError, AuthResult};
use crate::models::{NewUser, User};

#[derive(Default)]
struct Users {
    by_id: HashMap<Uuid, User>,
    by_email: HashMap<String, Uuid>,
}

/// User repository kept entirely in process memory
#[derive(Clone, Default)]
pub struct InMemoryUserRepository {
    users: Arc<RwLock<Users>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn insert(&self, new_user: NewUser) -> AuthResult<User> {
        let mut users = self.users.write().await;

        if users.by_email.contains_key(&new_user.email) {
            return Err(AuthError::Conflict);
        }

        let user = User {
            id: Uuid::new_v4(),
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            email: new_user.email,
            password_hash: new_user.password_hash,
            created_at: Utc::now(),
        };

        users.by_email.insert(user.email.clone(), user.id);
        users.by_id.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .by_email
            .get(email)
            .and_then(|id| users.by_id.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>> {
        Ok(self.users.read().await.by_id.get(&id).cloned())
    }

    async fn find_many(&self, ids: &[Uuid]) -> AuthResult<Vec<User>> {
        let users = self.users.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| users.by_id.get(id))
            .cloned()
            .collect())
    }
}
