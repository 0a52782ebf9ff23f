use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;
use crate::wal::{Wal, WalHandle};

use super::{Repository, StorageError};

/// DashMap-backed store. With a WAL every save is fsynced before it becomes
/// visible; without one it is volatile (tests, demos).
pub struct MemoryRepository {
    spaces: DashMap<SpaceId, Space>,
    bookings: DashMap<BookingId, Booking>,
    users: DashMap<UserId, User>,
    /// Lower-cased email → user id.
    emails: DashMap<String, UserId>,
    /// Owner → booking ids, in insertion order.
    by_owner: DashMap<UserId, Vec<BookingId>>,
    wal: Option<WalHandle>,
    /// Saves hold it shared from append through apply; compaction holds it
    /// exclusively from snapshot through rename.
    write_gate: RwLock<()>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            spaces: DashMap::new(),
            bookings: DashMap::new(),
            users: DashMap::new(),
            emails: DashMap::new(),
            by_owner: DashMap::new(),
            wal: None,
            write_gate: RwLock::new(()),
        }
    }

    /// Replay `path` into memory and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let records = Wal::replay(path)?;
        let mut repo = Self::new();
        for record in records {
            repo.apply(record);
        }
        tracing::info!(
            path = %path.display(),
            spaces = repo.spaces.len(),
            bookings = repo.bookings.len(),
            users = repo.users.len(),
            "replayed WAL"
        );
        repo.wal = Some(WalHandle::spawn(Wal::open(path)?));
        Ok(repo)
    }

    fn apply(&self, record: Record) {
        match record {
            Record::Space(space) => {
                self.spaces.insert(space.id, space);
            }
            Record::User(user) => {
                self.emails.insert(user.email.to_lowercase(), user.id);
                self.users.insert(user.id, user);
            }
            Record::Booking(booking) => {
                let (id, owner) = (booking.id, booking.owner);
                if self.bookings.insert(id, booking).is_none() {
                    self.by_owner.entry(owner).or_default().push(id);
                }
            }
        }
    }

    async fn persist(&self, record: Record) -> Result<(), StorageError> {
        let _gate = self.write_gate.read().await;
        if let Some(wal) = &self.wal {
            wal.append(record.clone())
                .await
                .map_err(|e| StorageError::Wal(e.to_string()))?;
        }
        self.apply(record);
        Ok(())
    }

    /// Current state as the minimal record set: spaces, users, then bookings
    /// (cancelled ones included) in creation order.
    pub fn snapshot(&self) -> Vec<Record> {
        let mut records = Vec::with_capacity(self.spaces.len() + self.users.len() + self.bookings.len());
        let mut spaces: Vec<Space> = self.spaces.iter().map(|e| e.value().clone()).collect();
        spaces.sort_by_key(|s| s.id);
        records.extend(spaces.into_iter().map(Record::Space));

        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        records.extend(users.into_iter().map(Record::User));

        let mut bookings: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by_key(|b| (b.created_at, b.id));
        records.extend(bookings.into_iter().map(Record::Booking));
        records
    }

    /// Rewrite the WAL from the current snapshot. No-op for volatile stores.
    ///
    /// Saves are held off until the rewrite lands, so no append can reach the
    /// old file after the snapshot was taken.
    pub async fn compact_wal(&self) -> Result<(), StorageError> {
        let Some(wal) = &self.wal else { return Ok(()) };
        let _gate = self.write_gate.write().await;
        wal.compact(self.snapshot())
            .await
            .map_err(|e| StorageError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        match &self.wal {
            Some(wal) => wal.appends_since_compact().await,
            None => 0,
        }
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn find_booking(&self, id: BookingId) -> Result<Option<Booking>, StorageError> {
        Ok(self.bookings.get(&id).map(|e| e.value().clone()))
    }

    async fn save_booking(&self, booking: &Booking) -> Result<(), StorageError> {
        self.persist(Record::Booking(booking.clone())).await
    }

    async fn list_bookings_overlapping(&self, span: DateSpan) -> Result<Vec<Booking>, StorageError> {
        Ok(self
            .bookings
            .iter()
            .filter(|e| e.is_active() && e.span.overlaps(&span))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn list_bookings_for_user(&self, owner: UserId) -> Result<Vec<Booking>, StorageError> {
        let ids = self
            .by_owner
            .get(&owner)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.bookings.get(id).map(|e| e.value().clone()))
            .collect())
    }

    async fn find_space(&self, id: SpaceId) -> Result<Option<Space>, StorageError> {
        Ok(self.spaces.get(&id).map(|e| e.value().clone()))
    }

    async fn list_spaces(&self) -> Result<Vec<Space>, StorageError> {
        let mut spaces: Vec<Space> = self.spaces.iter().map(|e| e.value().clone()).collect();
        spaces.sort_by_key(|s| s.id);
        Ok(spaces)
    }

    async fn save_space(&self, space: &Space) -> Result<(), StorageError> {
        self.persist(Record::Space(space.clone())).await
    }

    async fn count_spaces(&self) -> Result<usize, StorageError> {
        Ok(self.spaces.len())
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StorageError> {
        Ok(self.users.get(&id).map(|e| e.value().clone()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let Some(id) = self.emails.get(&email.to_lowercase()).map(|e| *e.value()) else {
            return Ok(None);
        };
        self.find_user(id).await
    }

    async fn save_user(&self, user: &User) -> Result<(), StorageError> {
        self.persist(Record::User(user.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use ulid::Ulid;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("parkd_test_repository");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn booking(owner: UserId, space: SpaceId, from: &str, to: &str) -> Booking {
        let mut b = Booking::new(Ulid::new(), owner, DateSpan::new(d(from), d(to)), Utc::now());
        b.space = Some(space);
        b
    }

    #[tokio::test]
    async fn overlapping_excludes_cancelled_and_adjacent() {
        let repo = MemoryRepository::new();
        let space = Ulid::new();
        let owner = Ulid::new();

        let hit = booking(owner, space, "2024-02-01", "2024-02-03");
        let adjacent = booking(owner, space, "2024-02-03", "2024-02-05");
        let mut cancelled = booking(owner, space, "2024-02-01", "2024-02-03");
        cancelled.status = BookingStatus::Cancelled;
        for b in [&hit, &adjacent, &cancelled] {
            repo.save_booking(b).await.unwrap();
        }

        let found = repo
            .list_bookings_overlapping(DateSpan::new(d("2024-02-02"), d("2024-02-03")))
            .await
            .unwrap();
        assert_eq!(found, vec![hit]);
    }

    #[tokio::test]
    async fn history_keeps_cancelled_bookings() {
        let repo = MemoryRepository::new();
        let owner = Ulid::new();
        let mut b = booking(owner, Ulid::new(), "2024-02-01", "2024-02-03");
        repo.save_booking(&b).await.unwrap();
        b.status = BookingStatus::Cancelled;
        repo.save_booking(&b).await.unwrap();

        let history = repo.list_bookings_for_user(owner).await.unwrap();
        assert_eq!(history.len(), 1); // upsert, not a second row
        assert_eq!(history[0].status, BookingStatus::Cancelled);
        assert_eq!(repo.find_booking(b.id).await.unwrap().unwrap().status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn touching_uses_closed_range() {
        let repo = MemoryRepository::new();
        let owner = Ulid::new();
        let ends_on_day = booking(owner, Ulid::new(), "2024-02-01", "2024-02-03");
        let later = booking(owner, Ulid::new(), "2024-02-04", "2024-02-05");
        repo.save_booking(&ends_on_day).await.unwrap();
        repo.save_booking(&later).await.unwrap();

        let touching = repo.list_bookings_touching(d("2024-02-03")).await.unwrap();
        assert_eq!(touching, vec![ends_on_day]);
    }

    #[tokio::test]
    async fn email_lookup_is_case_insensitive() {
        let repo = MemoryRepository::new();
        let user = User {
            id: Ulid::new(),
            name: "Grace".into(),
            email: "Grace@Example.com".into(),
            password_hash: "00$00".into(),
            created_at: Utc::now(),
        };
        repo.save_user(&user).await.unwrap();
        assert_eq!(repo.find_user_by_email("grace@example.COM").await.unwrap(), Some(user));
        assert!(repo.find_user_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wal_replay_restores_state() {
        let path = test_wal_path("replay.wal");
        let owner = Ulid::new();
        let space = Space::new(Ulid::new(), Some("A1".into()));
        let mut b = booking(owner, space.id, "2024-02-01", "2024-02-03");
        {
            let repo = MemoryRepository::open(&path).unwrap();
            repo.save_space(&space).await.unwrap();
            repo.save_booking(&b).await.unwrap();
            b.status = BookingStatus::Cancelled;
            repo.save_booking(&b).await.unwrap();
        }

        let repo = MemoryRepository::open(&path).unwrap();
        assert_eq!(repo.list_spaces().await.unwrap(), vec![space]);
        assert_eq!(repo.find_booking(b.id).await.unwrap(), Some(b.clone()));
        assert_eq!(repo.list_bookings_for_user(owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn compaction_preserves_state() {
        let path = test_wal_path("compact.wal");
        let owner = Ulid::new();
        let space = Space::new(Ulid::new(), None);
        let mut b = booking(owner, space.id, "2024-02-01", "2024-02-03");
        {
            let repo = MemoryRepository::open(&path).unwrap();
            repo.save_space(&space).await.unwrap();
            for day in 4..20 {
                b.span = DateSpan::new(d("2024-02-01"), d(&format!("2024-02-{day:02}")));
                repo.save_booking(&b).await.unwrap();
            }
            assert_eq!(repo.wal_appends_since_compact().await, 17);
            repo.compact_wal().await.unwrap();
            assert_eq!(repo.wal_appends_since_compact().await, 0);
        }

        assert_eq!(Wal::replay(&path).unwrap().len(), 2);
        let repo = MemoryRepository::open(&path).unwrap();
        assert_eq!(repo.find_booking(b.id).await.unwrap(), Some(b));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn compaction_keeps_concurrent_saves() {
        let path = test_wal_path("compact_concurrent.wal");
        let repo = Arc::new(MemoryRepository::open(&path).unwrap());
        let owner = Ulid::new();
        let space = Ulid::new();

        let done = Arc::new(AtomicBool::new(false));
        let compactor = {
            let (repo, done) = (repo.clone(), done.clone());
            tokio::spawn(async move {
                let mut rounds = 0;
                while !done.load(Ordering::Relaxed) {
                    repo.compact_wal().await.unwrap();
                    rounds += 1;
                    tokio::task::yield_now().await;
                }
                rounds
            })
        };

        let saves: Vec<_> = (0..500)
            .map(|_| {
                let repo = repo.clone();
                let b = booking(owner, space, "2024-02-01", "2024-02-03");
                tokio::spawn(async move { repo.save_booking(&b).await })
            })
            .collect();
        for save in futures::future::join_all(saves).await {
            save.unwrap().unwrap();
        }
        done.store(true, Ordering::Relaxed);
        assert!(compactor.await.unwrap() > 0);

        let acknowledged = repo.snapshot().len();
        assert_eq!(acknowledged, 500);
        let reopened = MemoryRepository::open(&path).unwrap();
        assert_eq!(reopened.snapshot().len(), acknowledged);
        assert_eq!(reopened.list_bookings_for_user(owner).await.unwrap().len(), 500);
    }
}
