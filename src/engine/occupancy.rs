//! Occupancy resolver: derives a kennel's `occupied` flag from its bookings.
//!
//! Occupancy tracks physical presence only — a kennel is occupied iff at
//! least one of its bookings is CheckedIn, regardless of calendar dates.

use crate::model::{BookingStatus, KennelState};

/// Pure resolution: does any booking currently hold a dog in this kennel?
pub fn resolve_occupancy(ks: &KennelState) -> bool {
    ks.bookings
        .iter()
        .any(|b| b.status == BookingStatus::CheckedIn)
}

/// Recompute the cached flag in place. Returns the new value if it changed,
/// `None` if the flag was already correct (no write needed). Idempotent.
pub fn recompute(ks: &mut KennelState) -> Option<bool> {
    let occupied = resolve_occupancy(ks);
    if ks.occupied == occupied {
        return None;
    }
    ks.occupied = occupied;
    Some(occupied)
}
