use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

pub use bcrypt::DEFAULT_COST;

/// Connection-level gate: every client presents the service password at
/// startup. Per-user identity is established afterwards by a session login.
#[derive(Debug)]
pub struct ServiceAuthSource {
    password: String,
}

impl ServiceAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ServiceAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// bcrypt hash of `password` at `cost`, salt included. CPU-bound: call it
/// off the async executor.
pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, cost)
}

/// Constant-time check against a stored bcrypt hash. A malformed hash never verifies.
pub fn verify_password(password: &str, stored: &str) -> bool {
    bcrypt::verify(password, stored).unwrap_or(false)
}
