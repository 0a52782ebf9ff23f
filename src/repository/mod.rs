//! Persistence boundary consumed by the engine.

mod memory;

pub use memory::MemoryRepository;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::model::*;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage for spaces, bookings and users.
///
/// Default booking queries (`list_bookings_overlapping`) return only Active
/// bookings; `find_booking` and `list_bookings_for_user` include Cancelled
/// ones so history stays reachable.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_booking(&self, id: BookingId) -> Result<Option<Booking>, StorageError>;

    async fn save_booking(&self, booking: &Booking) -> Result<(), StorageError>;

    async fn list_bookings_overlapping(&self, span: DateSpan) -> Result<Vec<Booking>, StorageError>;

    async fn list_bookings_for_user(&self, owner: UserId) -> Result<Vec<Booking>, StorageError>;

    async fn find_space(&self, id: SpaceId) -> Result<Option<Space>, StorageError>;

    /// Ascending by id.
    async fn list_spaces(&self) -> Result<Vec<Space>, StorageError>;

    async fn save_space(&self, space: &Space) -> Result<(), StorageError>;

    async fn count_spaces(&self) -> Result<usize, StorageError>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StorageError>;

    /// Case-insensitive.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError>;

    async fn save_user(&self, user: &User) -> Result<(), StorageError>;

    /// Active bookings covering `day` with the closed test `from <= day <= to`.
    async fn list_bookings_touching(&self, day: NaiveDate) -> Result<Vec<Booking>, StorageError> {
        let mut bookings = self.list_bookings_overlapping(DateSpan::around_day(day)).await?;
        bookings.retain(|b| b.span.touches_day(day));
        Ok(bookings)
    }
}
