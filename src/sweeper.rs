use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::repository::MemoryRepository;

/// Background task that keeps every space's `available` flag in step with
/// the current day as bookings start and end.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&engine).await;
    }
}

/// One pass. Errors are logged; the next tick retries.
pub async fn sweep_once(engine: &Engine) -> usize {
    match engine.refresh_flags().await {
        Ok(0) => {
            debug!("sweep: no flag changes");
            0
        }
        Ok(changed) => {
            info!(changed, day = %engine.clock().today(), "sweep refreshed space flags");
            changed
        }
        Err(e) => {
            warn!(error = %e, "sweep failed");
            0
        }
    }
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(repo: Arc<MemoryRepository>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = repo.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match repo.compact_wal().await {
            Ok(()) => info!(appends, "compacted WAL"),
            Err(e) => warn!(error = %e, "WAL compaction failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, FixedClock};
    use crate::notify::NullNotifier;
    use chrono::{Duration as ChronoDuration, NaiveDate};
    use ulid::Ulid;

    #[tokio::test]
    async fn sweep_frees_space_after_departure() {
        let day = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let clock = Arc::new(FixedClock::at_day(day));
        let engine = Engine::new(Arc::new(MemoryRepository::new()), clock.clone(), Arc::new(NullNotifier));
        engine.seed_spaces(1).await.unwrap();
        engine.create(Ulid::new(), day, day + ChronoDuration::days(2)).await.unwrap();
        assert!(!engine.list_spaces().await.unwrap()[0].available);

        assert_eq!(sweep_once(&engine).await, 0);

        clock.advance(ChronoDuration::days(2));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 2, 3).unwrap());
        assert_eq!(sweep_once(&engine).await, 1);
        assert!(engine.list_spaces().await.unwrap()[0].available);
    }

    #[tokio::test]
    async fn sweep_marks_space_when_booking_starts() {
        let day = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let clock = Arc::new(FixedClock::at_day(day));
        let engine = Engine::new(Arc::new(MemoryRepository::new()), clock.clone(), Arc::new(NullNotifier));
        engine.seed_spaces(2).await.unwrap();
        engine.create(Ulid::new(), day + ChronoDuration::days(1), day + ChronoDuration::days(3)).await.unwrap();
        assert!(engine.list_spaces().await.unwrap().iter().all(|s| s.available));

        clock.advance(ChronoDuration::days(1));
        assert_eq!(sweep_once(&engine).await, 1);
        let flags: Vec<bool> = engine.list_spaces().await.unwrap().iter().map(|s| s.available).collect();
        assert_eq!(flags, vec![false, true]);
    }
}
