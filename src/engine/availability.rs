use std::collections::HashSet;

use chrono::NaiveDate;
use tracing::warn;

use crate::limits::MAX_QUOTE_DAYS;
use crate::model::*;
use crate::observability::AVAILABILITY_INCONSISTENCIES_TOTAL;

use super::conflict::validate_span;
use super::{Engine, EngineError};

// ── Pure helpers ─────────────────────────────────────────────────

/// Spaces held by the given bookings. Only Active bookings count; a booking
/// without a space counts as one occupied slot.
pub(crate) fn occupied(bookings: &[Booking]) -> usize {
    let mut spaces = HashSet::new();
    let mut unassigned = 0;
    for booking in bookings.iter().filter(|b| b.is_active()) {
        match booking.space {
            Some(id) => {
                spaces.insert(id);
            }
            None => unassigned += 1,
        }
    }
    spaces.len() + unassigned
}

/// `spaces` minus those held by any Active booking in `bookings`. Order is kept.
pub(crate) fn free_spaces(spaces: Vec<Space>, bookings: &[Booking]) -> Vec<Space> {
    let taken: HashSet<SpaceId> = bookings
        .iter()
        .filter(|b| b.is_active())
        .filter_map(|b| b.space)
        .collect();
    spaces.into_iter().filter(|s| !taken.contains(&s.id)).collect()
}

/// The in-service spaces, and the bookings that count against them. Bookings
/// still sitting on a space taken out of service drop out with the space.
pub(crate) fn in_service(mut spaces: Vec<Space>, mut bookings: Vec<Booking>) -> (Vec<Space>, Vec<Booking>) {
    spaces.retain(|s| s.in_service);
    let ids: HashSet<SpaceId> = spaces.iter().map(|s| s.id).collect();
    bookings.retain(|b| b.space.is_none_or(|id| ids.contains(&id)));
    (spaces, bookings)
}

/// `total - occupied`, clamped at zero. Over-occupancy is reported, never returned.
fn remaining(total: usize, occupied: usize, window: &str) -> usize {
    if occupied > total {
        warn!(total, occupied, window, "more spaces occupied than exist");
        metrics::counter!(AVAILABILITY_INCONSISTENCIES_TOTAL).increment(1);
    }
    total.saturating_sub(occupied)
}

// ── Engine queries ───────────────────────────────────────────────

impl Engine {
    /// Capacity and free count for `[from, to)`. Capacity is the number of
    /// in-service spaces.
    pub async fn availability(&self, from: NaiveDate, to: NaiveDate) -> Result<Availability, EngineError> {
        let span = validate_span(from, to, MAX_QUOTE_DAYS)?;
        let spaces = self.repo.list_spaces().await?;
        let bookings = self.repo.list_bookings_overlapping(span).await?;
        let (spaces, bookings) = in_service(spaces, bookings);
        let total = spaces.len();
        let available = remaining(total, occupied(&bookings), "range");
        Ok(Availability { span, total, available })
    }

    pub async fn count_available(&self, from: NaiveDate, to: NaiveDate) -> Result<usize, EngineError> {
        Ok(self.availability(from, to).await?.available)
    }

    /// Capacity and free count on `day`, counting bookings with
    /// `from <= day <= to`.
    pub async fn availability_on_day(&self, day: NaiveDate) -> Result<DayAvailability, EngineError> {
        let spaces = self.repo.list_spaces().await?;
        let bookings = self.repo.list_bookings_touching(day).await?;
        let (spaces, bookings) = in_service(spaces, bookings);
        let total = spaces.len();
        let available = remaining(total, occupied(&bookings), "day");
        Ok(DayAvailability { day, total, available })
    }

    pub async fn count_available_on_day(&self, day: NaiveDate) -> Result<usize, EngineError> {
        Ok(self.availability_on_day(day).await?.available)
    }

    /// In-service spaces with no Active booking overlapping `[from, to)`,
    /// ascending by id.
    pub async fn available_spaces(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Space>, EngineError> {
        let span = validate_span(from, to, MAX_QUOTE_DAYS)?;
        let spaces = self.repo.list_spaces().await?;
        let bookings = self.repo.list_bookings_overlapping(span).await?;
        let (spaces, bookings) = in_service(spaces, bookings);
        Ok(free_spaces(spaces, &bookings))
    }
}
