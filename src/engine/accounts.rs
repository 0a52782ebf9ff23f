use tracing::info;
use ulid::Ulid;

use crate::auth::{hash_password, verify_password};
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Create an account. The email is unique ignoring case; only a bcrypt
    /// hash of the password is stored.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<User, EngineError> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(EngineError::Validation("name must not be blank"));
        }
        if email.is_empty() || !email.contains('@') {
            return Err(EngineError::Validation("email must contain '@'"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(EngineError::Validation("password must be at least 8 characters"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(EngineError::LimitExceeded("password too long"));
        }

        let _guard = self.accounts_lock.lock().await;
        if self.repo.find_user_by_email(email).await?.is_some() {
            return Err(EngineError::AlreadyExists(email.to_string()));
        }
        let password_hash = {
            let (password, cost) = (password.to_string(), self.password_cost);
            tokio::task::spawn_blocking(move || hash_password(&password, cost))
                .await
                .map_err(|e| EngineError::Hashing(e.to_string()))?
                .map_err(|e| EngineError::Hashing(e.to_string()))?
        };
        let user = User {
            id: Ulid::new(),
            name: name.to_string(),
            email: email.to_string(),
            password_hash,
            created_at: self.clock.now(),
        };
        self.repo.save_user(&user).await?;
        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Unknown email and wrong password fail the same way.
    pub async fn verify(&self, email: &str, password: &str) -> Result<User, EngineError> {
        let Some(user) = self.repo.find_user_by_email(email.trim()).await? else {
            return Err(EngineError::InvalidCredentials);
        };
        let (password, stored) = (password.to_string(), user.password_hash.clone());
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
            .await
            .map_err(|e| EngineError::Hashing(e.to_string()))?;
        if matches {
            Ok(user)
        } else {
            Err(EngineError::InvalidCredentials)
        }
    }

    /// The account behind a session.
    pub async fn find_user(&self, id: UserId) -> Result<User, EngineError> {
        self.repo.find_user(id).await?.ok_or(EngineError::NotFound(id))
    }
}
