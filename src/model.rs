use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type SpaceId = Ulid;
pub type BookingId = Ulid;
pub type UserId = Ulid;

/// Whole currency units.
pub type Amount = u64;

/// Half-open date range `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateSpan {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        debug_assert!(from < to, "DateSpan from must be before to");
        Self { from, to }
    }

    /// Number of nights in the range.
    pub fn nights(&self) -> i64 {
        (self.to - self.from).num_days()
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.from < other.to && other.from < self.to
    }

    /// `from <= day < to`.
    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.from <= day && day < self.to
    }

    /// `from <= day <= to`, the closed form used by single-day availability.
    pub fn touches_day(&self, day: NaiveDate) -> bool {
        self.from <= day && day <= self.to
    }

    /// The smallest half-open window whose overlap set equals `touches_day(day)`.
    pub fn around_day(day: NaiveDate) -> Self {
        let before = day.checked_sub_days(Days::new(1)).unwrap_or(day);
        let after = day.checked_add_days(Days::new(1)).unwrap_or(day);
        Self { from: before, to: after }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: SpaceId,
    pub name: Option<String>,
    /// Cached: no Active booking covers the current day. Never used for allocation.
    pub available: bool,
    /// Operator switch. Out-of-service spaces take no new bookings and add no capacity.
    pub in_service: bool,
}

impl Space {
    pub fn new(id: SpaceId, name: Option<String>) -> Self {
        Self {
            id,
            name,
            available: true,
            in_service: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Active,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Active => "active",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub owner: UserId,
    /// Unset until allocation succeeds.
    pub space: Option<SpaceId>,
    pub span: DateSpan,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn new(id: BookingId, owner: UserId, span: DateSpan, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            owner,
            space: None,
            span,
            status: BookingStatus::Active,
            created_at,
            updated_at: None,
            cancelled_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }

    /// Active, holding `space`, and overlapping `span`.
    pub fn holds(&self, space: SpaceId, span: &DateSpan) -> bool {
        self.is_active() && self.space == Some(space) && self.span.overlaps(span)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    /// bcrypt, modular crypt format.
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// One upserted row. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    Space(Space),
    User(User),
    Booking(Booking),
}

/// Domain events handed to the notifier after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SpaceCreated {
        space_id: SpaceId,
    },
    SpaceFlagged {
        space_id: SpaceId,
        available: bool,
    },
    SpaceServiceChanged {
        space_id: SpaceId,
        in_service: bool,
    },
    BookingCreated {
        booking_id: BookingId,
        owner: UserId,
        space_id: SpaceId,
        span: DateSpan,
    },
    BookingAmended {
        booking_id: BookingId,
        space_id: SpaceId,
        span: DateSpan,
    },
    BookingCancelled {
        booking_id: BookingId,
        space_id: SpaceId,
    },
}

impl Event {
    pub fn space_id(&self) -> SpaceId {
        match self {
            Event::SpaceCreated { space_id }
            | Event::SpaceFlagged { space_id, .. }
            | Event::SpaceServiceChanged { space_id, .. }
            | Event::BookingCreated { space_id, .. }
            | Event::BookingAmended { space_id, .. }
            | Event::BookingCancelled { space_id, .. } => *space_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub span: DateSpan,
    pub total: usize,
    pub available: usize,
}

/// Capacity and free count for one day, read together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAvailability {
    pub day: NaiveDate,
    pub total: usize,
    pub available: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn span_basics() {
        let s = DateSpan::new(d("2024-02-01"), d("2024-02-03"));
        assert_eq!(s.nights(), 2);
        assert!(s.contains_day(d("2024-02-01")));
        assert!(s.contains_day(d("2024-02-02")));
        assert!(!s.contains_day(d("2024-02-03"))); // half-open
        assert!(s.touches_day(d("2024-02-03")));
    }

    #[test]
    fn span_overlap() {
        let a = DateSpan::new(d("2024-02-01"), d("2024-02-05"));
        let b = DateSpan::new(d("2024-02-04"), d("2024-02-08"));
        let c = DateSpan::new(d("2024-02-05"), d("2024-02-06"));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn around_day_matches_touches_day() {
        let day = d("2024-03-10");
        let window = DateSpan::around_day(day);
        let cases = [
            DateSpan::new(d("2024-03-08"), d("2024-03-10")), // ends on day
            DateSpan::new(d("2024-03-10"), d("2024-03-12")), // starts on day
            DateSpan::new(d("2024-03-01"), d("2024-03-09")), // ends before
            DateSpan::new(d("2024-03-11"), d("2024-03-15")), // starts after
        ];
        for span in cases {
            assert_eq!(span.overlaps(&window), span.touches_day(day), "{span:?}");
        }
    }

    #[test]
    fn booking_holds_requires_active_same_space_and_overlap() {
        let space = Ulid::new();
        let span = DateSpan::new(d("2024-02-01"), d("2024-02-03"));
        let mut b = Booking::new(Ulid::new(), Ulid::new(), span, Utc::now());
        assert!(!b.holds(space, &span)); // no space yet

        b.space = Some(space);
        assert!(b.holds(space, &span));
        assert!(!b.holds(Ulid::new(), &span));
        assert!(!b.holds(space, &DateSpan::new(d("2024-02-03"), d("2024-02-04"))));

        b.status = BookingStatus::Cancelled;
        assert!(!b.holds(space, &span));
    }

    #[test]
    fn record_serialization_roundtrip() {
        let record = Record::Booking(Booking::new(
            Ulid::new(),
            Ulid::new(),
            DateSpan::new(d("2024-02-01"), d("2024-02-03")),
            Utc::now(),
        ));
        let bytes = bincode::serialize(&record).unwrap();
        let decoded: Record = bincode::deserialize(&bytes).unwrap();
        assert_eq!(record, decoded);
    }
}
