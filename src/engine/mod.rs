mod accounts;
mod allocation;
mod availability;
mod conflict;
mod error;
mod lifecycle;
mod spaces;

pub use error::EngineError;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::auth::DEFAULT_COST;
use crate::clock::Clock;
use crate::model::*;
use crate::notify::Notifier;
use crate::pricing::PricingCalculator;
use crate::repository::Repository;

/// The booking core: availability, allocation, pricing and the booking
/// lifecycle over an injected repository, clock and notifier.
///
/// Every mutation that touches a space runs under that space's mutex, so two
/// callers can never both claim the same space for overlapping dates.
pub struct Engine {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    pricing: PricingCalculator,
    /// bcrypt work factor for new password hashes.
    password_cost: u32,
    space_locks: DashMap<SpaceId, Arc<Mutex<()>>>,
    /// Serializes registrations so email uniqueness holds.
    accounts_lock: Mutex<()>,
}

impl Engine {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            repo,
            clock,
            notifier,
            pricing: PricingCalculator::default(),
            password_cost: DEFAULT_COST,
            space_locks: DashMap::new(),
            accounts_lock: Mutex::new(()),
        }
    }

    pub fn with_pricing(mut self, pricing: PricingCalculator) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    pub fn pricing(&self) -> &PricingCalculator {
        &self.pricing
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    /// Acquire the per-space mutex. Callers hold at most one at a time.
    pub(super) async fn lock_space(&self, space_id: SpaceId) -> OwnedMutexGuard<()> {
        let lock = self
            .space_locks
            .entry(space_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Persist a booking and announce it. Caller holds the space lock.
    pub(super) async fn commit_booking(&self, booking: &Booking, event: Event) -> Result<(), EngineError> {
        self.repo.save_booking(booking).await?;
        self.notifier.notify(&event);
        Ok(())
    }
}
