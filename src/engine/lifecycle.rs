use chrono::{Datelike, NaiveDate};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{ALLOCATION_FAILURES_TOTAL, BOOKINGS_CANCELLED_TOTAL, BOOKINGS_CREATED_TOTAL};

use super::conflict::{find_conflict, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// Validate, allocate a space and persist a new Active booking.
    /// Nothing is stored when allocation fails.
    pub async fn create(&self, owner: UserId, from: NaiveDate, to: NaiveDate) -> Result<Booking, EngineError> {
        let span = validate_span(from, to, MAX_BOOKING_DAYS)?;
        let mut booking = Booking::new(Ulid::new(), owner, span, self.clock.now());
        let space_id = self.allocate(&mut booking).await?;

        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        info!(booking_id = %booking.id, %space_id, %owner, %from, %to, "booking created");
        Ok(booking)
    }

    /// Move an Active booking to new dates on the same space. Missing bounds
    /// keep their current value. On conflict the booking is left untouched.
    pub async fn amend(
        &self,
        id: BookingId,
        new_from: Option<NaiveDate>,
        new_to: Option<NaiveDate>,
    ) -> Result<Booking, EngineError> {
        let current = self.get_active(id).await?;
        let Some(space_id) = current.space else {
            return Err(EngineError::NotFound(id));
        };

        let _guard = self.lock_space(space_id).await;
        let mut booking = self.get_active(id).await?;
        let from = new_from.unwrap_or(booking.span.from);
        let to = new_to.unwrap_or(booking.span.to);
        let span = validate_span(from, to, MAX_BOOKING_DAYS)?;

        let overlapping = self.repo.list_bookings_overlapping(span).await?;
        if let Some(other) = find_conflict(&overlapping, space_id, &span, Some(id)) {
            info!(booking_id = %id, conflicting = %other.id, %from, %to, "amend rejected");
            metrics::counter!(ALLOCATION_FAILURES_TOTAL).increment(1);
            return Err(EngineError::NoAvailableParkingSpaces);
        }

        booking.span = span;
        booking.updated_at = Some(self.clock.now());
        let event = Event::BookingAmended { booking_id: id, space_id, span };
        self.commit_booking(&booking, event).await?;
        self.refresh_flag_after_commit(space_id).await;

        info!(booking_id = %id, %space_id, %from, %to, "booking amended");
        Ok(booking)
    }

    /// Mark a booking Cancelled and release its space. Cancelling a
    /// Cancelled booking succeeds without changing anything.
    pub async fn cancel(&self, id: BookingId) -> Result<(), EngineError> {
        let current = self.get_booking(id).await?;
        if !current.is_active() {
            return Ok(());
        }

        let guard = match current.space {
            Some(space_id) => Some(self.lock_space(space_id).await),
            None => None,
        };
        let mut booking = self.get_booking(id).await?;
        if !booking.is_active() {
            return Ok(());
        }

        let now = self.clock.now();
        booking.status = BookingStatus::Cancelled;
        booking.cancelled_at = Some(now);
        booking.updated_at = Some(now);
        match booking.space {
            Some(space_id) => {
                let event = Event::BookingCancelled { booking_id: id, space_id };
                self.commit_booking(&booking, event).await?;
            }
            None => self.repo.save_booking(&booking).await?,
        }
        drop(guard);
        self.release(&booking).await;

        metrics::counter!(BOOKINGS_CANCELLED_TOTAL).increment(1);
        info!(booking_id = %id, space_id = ?booking.space, "booking cancelled");
        Ok(())
    }

    /// All of a user's bookings, Cancelled included, newest first.
    pub async fn list_for_user(&self, owner: UserId) -> Result<Vec<Booking>, EngineError> {
        let mut bookings = self.repo.list_bookings_for_user(owner).await?;
        bookings.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(bookings)
    }

    pub async fn get_booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        self.repo.find_booking(id).await?.ok_or(EngineError::NotFound(id))
    }

    async fn get_active(&self, id: BookingId) -> Result<Booking, EngineError> {
        self.repo
            .find_booking(id)
            .await?
            .filter(Booking::is_active)
            .ok_or(EngineError::NotFound(id))
    }

    /// Price of a stay from `from` to `to`, both days charged.
    pub fn quote(&self, from: NaiveDate, to: NaiveDate) -> Result<Amount, EngineError> {
        if to < from {
            return Err(EngineError::InvalidRange { from, to });
        }
        for day in [from, to] {
            if day.year() < MIN_YEAR || day.year() > MAX_YEAR {
                return Err(EngineError::LimitExceeded("date out of range"));
            }
        }
        if (to - from).num_days() > MAX_QUOTE_DAYS {
            return Err(EngineError::LimitExceeded("range too wide"));
        }
        self.pricing.total_price(from, to)
    }

    /// Price of an existing booking.
    pub fn price_of(&self, booking: &Booking) -> Result<Amount, EngineError> {
        self.pricing.total_price(booking.span.from, booking.span.to)
    }
}
