use chrono::{Datelike, NaiveDate};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

fn check_year(day: NaiveDate) -> Result<(), EngineError> {
    if day.year() < MIN_YEAR || day.year() > MAX_YEAR {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    Ok(())
}

/// `from < to`, both within the bookable calendar, at most `max_days` apart.
pub(crate) fn validate_span(from: NaiveDate, to: NaiveDate, max_days: i64) -> Result<DateSpan, EngineError> {
    if from >= to {
        return Err(EngineError::InvalidRange { from, to });
    }
    check_year(from)?;
    check_year(to)?;
    let span = DateSpan::new(from, to);
    if span.nights() > max_days {
        return Err(EngineError::LimitExceeded("range too wide"));
    }
    Ok(span)
}

/// First Active booking other than `exclude` holding `space` during `span`.
pub(crate) fn find_conflict<'a>(
    bookings: &'a [Booking],
    space: SpaceId,
    span: &DateSpan,
    exclude: Option<BookingId>,
) -> Option<&'a Booking> {
    bookings
        .iter()
        .filter(|b| Some(b.id) != exclude)
        .find(|b| b.holds(space, span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ulid::Ulid;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn validate_rejects_empty_and_reversed() {
        assert!(matches!(
            validate_span(d("2024-02-01"), d("2024-02-01"), MAX_BOOKING_DAYS),
            Err(EngineError::InvalidRange { .. })
        ));
        assert!(matches!(
            validate_span(d("2024-02-02"), d("2024-02-01"), MAX_BOOKING_DAYS),
            Err(EngineError::InvalidRange { .. })
        ));
    }

    #[test]
    fn validate_limits() {
        assert!(matches!(
            validate_span(d("1999-12-30"), d("2000-01-02"), MAX_BOOKING_DAYS),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_span(d("2024-01-01"), d("2026-01-01"), MAX_BOOKING_DAYS),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(validate_span(d("2024-01-01"), d("2024-12-31"), MAX_BOOKING_DAYS).is_ok());
    }

    #[test]
    fn conflict_skips_excluded_and_other_spaces() {
        let space = Ulid::new();
        let span = DateSpan::new(d("2024-02-01"), d("2024-02-05"));
        let mut own = Booking::new(Ulid::new(), Ulid::new(), span, Utc::now());
        own.space = Some(space);
        let mut elsewhere = Booking::new(Ulid::new(), Ulid::new(), span, Utc::now());
        elsewhere.space = Some(Ulid::new());
        let bookings = vec![own.clone(), elsewhere];

        assert!(find_conflict(&bookings, space, &span, Some(own.id)).is_none());
        assert_eq!(find_conflict(&bookings, space, &span, None).map(|b| b.id), Some(own.id));
    }
}
