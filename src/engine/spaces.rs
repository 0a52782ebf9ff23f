use chrono::NaiveDate;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Add a space. It starts available; capacity grows by one once it is
    /// in service.
    pub async fn create_space(&self, name: Option<String>, in_service: bool) -> Result<Space, EngineError> {
        let name = name.map(|n| n.trim().to_string());
        if let Some(ref n) = name {
            if n.is_empty() {
                return Err(EngineError::Validation("space name must not be blank"));
            }
            if n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("space name too long"));
            }
        }
        if self.repo.count_spaces().await? >= MAX_SPACES {
            return Err(EngineError::LimitExceeded("too many spaces"));
        }

        let mut space = Space::new(Ulid::new(), name);
        space.in_service = in_service;
        self.repo.save_space(&space).await?;
        self.notifier.notify(&Event::SpaceCreated { space_id: space.id });
        info!(space_id = %space.id, name = ?space.name, in_service, "space created");
        Ok(space)
    }

    /// Put a space into or out of service. A space still holding a booking
    /// that has not ended cannot be taken out.
    pub async fn set_in_service(&self, space_id: SpaceId, in_service: bool) -> Result<Space, EngineError> {
        let _guard = self.lock_space(space_id).await;
        let mut space = self
            .repo
            .find_space(space_id)
            .await?
            .ok_or(EngineError::NotFound(space_id))?;
        if space.in_service == in_service {
            return Ok(space);
        }

        if !in_service {
            let today = self.clock.today();
            let upcoming = DateSpan { from: today, to: NaiveDate::MAX };
            let held = self.repo.list_bookings_overlapping(upcoming).await?;
            if held.iter().any(|b| b.space == Some(space_id)) {
                return Err(EngineError::Validation("space has upcoming bookings"));
            }
        }

        space.in_service = in_service;
        self.repo.save_space(&space).await?;
        self.notifier.notify(&Event::SpaceServiceChanged { space_id, in_service });
        info!(%space_id, in_service, "space service changed");
        Ok(space)
    }

    /// Create `count` spaces on an empty store. Returns how many were created.
    pub async fn seed_spaces(&self, count: usize) -> Result<usize, EngineError> {
        if self.repo.count_spaces().await? > 0 {
            debug!("spaces present, skipping seed");
            return Ok(0);
        }
        for n in 1..=count {
            self.create_space(Some(format!("P{n}")), true).await?;
        }
        info!(count, "seeded spaces");
        Ok(count)
    }

    pub async fn list_spaces(&self) -> Result<Vec<Space>, EngineError> {
        Ok(self.repo.list_spaces().await?)
    }

    /// Recompute every space's flag for the current day.
    /// Returns the number of flags that changed.
    pub async fn refresh_flags(&self) -> Result<usize, EngineError> {
        let mut changed = 0;
        for space in self.repo.list_spaces().await? {
            let _guard = self.lock_space(space.id).await;
            let refreshed = self.refresh_flag_locked(space.id).await?;
            if refreshed.available != space.available {
                changed += 1;
            }
        }
        Ok(changed)
    }
}
