use tracing::{debug, warn};

use crate::model::*;
use crate::observability::{ALLOCATION_FAILURES_TOTAL, FLAG_REFRESH_FAILURES_TOTAL};

use super::availability::free_spaces;
use super::conflict::find_conflict;
use super::{Engine, EngineError};

impl Engine {
    /// Bind the lowest-id in-service space that is free for the booking's
    /// whole range, then persist the booking.
    ///
    /// Candidates come from one snapshot; each is locked in ascending id order
    /// and re-checked under its lock, so a space taken in the meantime is
    /// skipped rather than double-booked.
    pub(super) async fn allocate(&self, booking: &mut Booking) -> Result<SpaceId, EngineError> {
        let mut spaces = self.repo.list_spaces().await?;
        spaces.retain(|s| s.in_service);
        let snapshot = self.repo.list_bookings_overlapping(booking.span).await?;

        for candidate in free_spaces(spaces, &snapshot) {
            let _guard = self.lock_space(candidate.id).await;
            let current = self.repo.list_bookings_overlapping(booking.span).await?;
            if find_conflict(&current, candidate.id, &booking.span, Some(booking.id)).is_some() {
                debug!(space_id = %candidate.id, "candidate taken, trying next");
                continue;
            }

            booking.space = Some(candidate.id);
            let event = Event::BookingCreated {
                booking_id: booking.id,
                owner: booking.owner,
                space_id: candidate.id,
                span: booking.span,
            };
            if let Err(e) = self.commit_booking(booking, event).await {
                booking.space = None;
                return Err(e);
            }
            self.refresh_flag_after_commit(candidate.id).await;
            return Ok(candidate.id);
        }

        metrics::counter!(ALLOCATION_FAILURES_TOTAL).increment(1);
        Err(EngineError::NoAvailableParkingSpaces)
    }

    /// Recompute the space's flag after a booking stopped holding it.
    /// A booking without a space is a no-op, as is calling this twice.
    pub async fn release(&self, booking: &Booking) {
        let Some(space_id) = booking.space else {
            return;
        };
        let _guard = self.lock_space(space_id).await;
        self.refresh_flag_after_commit(space_id).await;
    }

    /// Refresh the flag once a booking change is already durable. The flag is
    /// a cache the sweeper rebuilds, so a failure here is logged and counted
    /// but never undoes or fails the committed change. Caller holds the lock.
    pub(super) async fn refresh_flag_after_commit(&self, space_id: SpaceId) {
        if let Err(e) = self.refresh_flag_locked(space_id).await {
            warn!(%space_id, error = %e, "space flag refresh failed, left for the sweeper");
            metrics::counter!(FLAG_REFRESH_FAILURES_TOTAL).increment(1);
        }
    }

    /// Set `available` to whether no Active booking covers today.
    /// Writes and notifies only when the flag changes. Caller holds the lock.
    pub(super) async fn refresh_flag_locked(&self, space_id: SpaceId) -> Result<Space, EngineError> {
        let mut space = self
            .repo
            .find_space(space_id)
            .await?
            .ok_or(EngineError::NotFound(space_id))?;

        let today = self.clock.today();
        let busy = self
            .repo
            .list_bookings_overlapping(DateSpan::around_day(today))
            .await?
            .iter()
            .any(|b| b.space == Some(space_id) && b.span.contains_day(today));

        if space.available == busy {
            space.available = !busy;
            self.repo.save_space(&space).await?;
            self.notifier.notify(&Event::SpaceFlagged {
                space_id,
                available: space.available,
            });
        }
        Ok(space)
    }
}
