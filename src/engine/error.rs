use chrono::NaiveDate;
use ulid::Ulid;

use crate::repository::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid range: from {from} must be before to {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },
    #[error("validation failed: {0}")]
    Validation(&'static str),
    #[error("No parking spaces currently available.")]
    NoAvailableParkingSpaces,
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
