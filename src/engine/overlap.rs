//! Overlap guard: decides whether a proposed stay may be assigned to a kennel.

use ulid::Ulid;

use crate::model::{KennelState, Ms, Span};

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::LimitExceeded("check-in must precede check-out"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

/// Report the first active booking whose dates overlap `span`, skipping
/// `exclude` (a booking being compared against itself during update).
///
/// Two half-open spans `[a1,a2)` and `[b1,b2)` overlap iff
/// `a1 < b2 && b1 < a2`; back-to-back stays therefore never conflict, and
/// a Cancelled booking never blocks.
pub(crate) fn check_no_overlap(
    ks: &KennelState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for existing in ks.overlapping(span) {
        if Some(existing.id) == exclude {
            continue;
        }
        if !existing.status.blocks_dates() {
            continue;
        }
        // `overlapping` already applied the half-open test.
        return Err(EngineError::Conflict(existing.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, BookingStatus, KennelSize};

    const DAY: Ms = 86_400_000;

    fn kennel() -> KennelState {
        KennelState::new(Ulid::new(), "K-GUARD".into(), KennelSize::Small, None, 0)
    }

    fn booking(start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            dog_id: Ulid::new(),
            kennel_id: Ulid::new(),
            span: Span::new(start, end),
            status,
            special_requirements: None,
            total_cost_cents: 0,
            created_at: 0,
            updated_at: None,
        }
    }

    #[test]
    fn empty_kennel_is_available() {
        let ks = kennel();
        assert!(check_no_overlap(&ks, &Span::new(DAY, 3 * DAY), None).is_ok());
    }

    #[test]
    fn overlap_is_rejected_with_blocking_id() {
        let mut ks = kennel();
        let existing = booking(2 * DAY, 5 * DAY, BookingStatus::Confirmed);
        let existing_id = existing.id;
        ks.insert_booking(existing);

        let result = check_no_overlap(&ks, &Span::new(4 * DAY, 7 * DAY), None);
        match result {
            Err(EngineError::Conflict(id)) => assert_eq!(id, existing_id),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn back_to_back_stays_are_available() {
        let mut ks = kennel();
        ks.insert_booking(booking(2 * DAY, 5 * DAY, BookingStatus::Confirmed));
        // New check-in on the existing check-out date.
        assert!(check_no_overlap(&ks, &Span::new(5 * DAY, 8 * DAY), None).is_ok());
        // And the mirror case.
        assert!(check_no_overlap(&ks, &Span::new(DAY, 2 * DAY), None).is_ok());
    }

    #[test]
    fn containment_both_directions_is_rejected() {
        let mut ks = kennel();
        ks.insert_booking(booking(2 * DAY, 6 * DAY, BookingStatus::Pending));
        // Proposed inside existing.
        assert!(check_no_overlap(&ks, &Span::new(3 * DAY, 4 * DAY), None).is_err());
        // Proposed surrounding existing.
        assert!(check_no_overlap(&ks, &Span::new(DAY, 7 * DAY), None).is_err());
    }

    #[test]
    fn cancelled_booking_never_blocks() {
        let mut ks = kennel();
        ks.insert_booking(booking(2 * DAY, 5 * DAY, BookingStatus::Cancelled));
        assert!(check_no_overlap(&ks, &Span::new(2 * DAY, 5 * DAY), None).is_ok());
    }

    #[test]
    fn excluded_booking_is_ignored() {
        let mut ks = kennel();
        let own = booking(2 * DAY, 5 * DAY, BookingStatus::Confirmed);
        let own_id = own.id;
        ks.insert_booking(own);
        // Updating a booking against itself: shifting by a day must pass.
        assert!(check_no_overlap(&ks, &Span::new(3 * DAY, 6 * DAY), Some(own_id)).is_ok());
        // But another active booking still blocks.
        ks.insert_booking(booking(5 * DAY, 7 * DAY, BookingStatus::CheckedIn));
        assert!(check_no_overlap(&ks, &Span::new(3 * DAY, 6 * DAY), Some(own_id)).is_err());
    }

    #[test]
    fn all_non_cancelled_statuses_block() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::CheckedIn,
            BookingStatus::CheckedOut,
        ] {
            let mut ks = kennel();
            ks.insert_booking(booking(2 * DAY, 5 * DAY, status));
            assert!(
                check_no_overlap(&ks, &Span::new(3 * DAY, 4 * DAY), None).is_err(),
                "{status} should block"
            );
        }
    }

    #[test]
    fn validate_span_bounds() {
        assert!(validate_span(&Span { start: 3 * DAY, end: DAY }).is_err());
        assert!(validate_span(&Span { start: DAY, end: DAY }).is_err());
        assert!(validate_span(&Span::new(-5, DAY)).is_err());
        assert!(validate_span(&Span::new(0, 400 * DAY)).is_err());
        assert!(validate_span(&Span::new(DAY, 3 * DAY)).is_ok());
    }
}
