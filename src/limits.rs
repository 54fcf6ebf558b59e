//! Hard limits. Every externally-supplied value is bounded before it
//! reaches the engine's state or the WAL.

use crate::model::Ms;

pub const MAX_KENNELS_PER_FACILITY: usize = 10_000;
pub const MAX_DOGS_PER_FACILITY: usize = 100_000;
pub const MAX_BOOKINGS_PER_KENNEL: usize = 10_000;

pub const MAX_KENNEL_NUMBER_LEN: usize = 50;
pub const MAX_NOTES_LEN: usize = 500;
pub const MAX_DOG_NAME_LEN: usize = 100;
pub const MAX_BREED_LEN: usize = 100;
pub const MAX_REQUIREMENTS_LEN: usize = 1_000;

/// Stays are bounded to a year; anything longer is a data-entry error.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 86_400_000;
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// Year 3000. Catches second-vs-millisecond mixups.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 32_503_680_000_000;

pub const MAX_FACILITIES: usize = 1_024;
pub const MAX_FACILITY_NAME_LEN: usize = 256;
