//! Hard input limits enforced before any mutation.

/// Earliest bookable year.
pub const MIN_YEAR: i32 = 2000;
/// Latest bookable year.
pub const MAX_YEAR: i32 = 2199;

/// Longest single booking, in nights.
pub const MAX_BOOKING_DAYS: i64 = 366;
/// Longest range accepted by price quotes, in days.
pub const MAX_QUOTE_DAYS: i64 = 3_660;

pub const MAX_SPACES: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MIN_PASSWORD_LEN: usize = 8;
/// bcrypt only reads the first 72 bytes.
pub const MAX_PASSWORD_LEN: usize = 72;

/// bcrypt work factor bounds.
pub const MIN_PASSWORD_COST: u32 = 4;
pub const MAX_PASSWORD_COST: u32 = 31;
