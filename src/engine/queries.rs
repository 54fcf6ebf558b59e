use ulid::Ulid;

use crate::model::*;

use super::overlap::check_no_overlap;
use super::{Engine, EngineError};

impl Engine {
    /// Overlap-guard contract: may `span` be assigned to `kennel_id`?
    /// `exclude` skips a booking being checked against itself. Read-only.
    pub async fn check_availability(
        &self,
        kennel_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let ks = self
            .get_kennel(&kennel_id)
            .ok_or(EngineError::NotFound(kennel_id))?;
        let guard = ks.read().await;
        Ok(check_no_overlap(&guard, &span, exclude).is_ok())
    }

    /// Kennels with no active booking overlapping `span`. This is a real
    /// interval query, not a snapshot of the occupied flag — a kennel
    /// occupied today can still be available next month.
    pub async fn available_kennels(&self, span: Span) -> Vec<KennelInfo> {
        let mut out = Vec::new();
        for entry in self.kennels.iter() {
            let ks = entry.value().clone();
            let guard = ks.read().await;
            if check_no_overlap(&guard, &span, None).is_ok() {
                out.push(kennel_info(&guard));
            }
        }
        out.sort_by(|a, b| a.number.cmp(&b.number));
        out
    }

    pub async fn list_kennels(&self) -> Vec<KennelInfo> {
        let mut out = Vec::new();
        for entry in self.kennels.iter() {
            let ks = entry.value().clone();
            let guard = ks.read().await;
            out.push(kennel_info(&guard));
        }
        out.sort_by(|a, b| a.number.cmp(&b.number));
        out
    }

    pub async fn kennel_info_for(&self, id: Ulid) -> Option<KennelInfo> {
        let ks = self.get_kennel(&id)?;
        let guard = ks.read().await;
        Some(kennel_info(&guard))
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let kennel_id = self.kennel_for_booking(&id)?;
        let ks = self.get_kennel(&kennel_id)?;
        let guard = ks.read().await;
        guard.booking(id).cloned()
    }

    /// Bookings on one kennel, optionally skipping one status (the store
    /// contract's `excludeStatus`; the overlap guard passes Cancelled).
    pub async fn bookings_for_kennel(
        &self,
        kennel_id: Ulid,
        exclude_status: Option<BookingStatus>,
    ) -> Vec<Booking> {
        let Some(ks) = self.get_kennel(&kennel_id) else {
            return Vec::new();
        };
        let guard = ks.read().await;
        guard
            .bookings
            .iter()
            .filter(|b| exclude_status != Some(b.status))
            .cloned()
            .collect()
    }

    pub async fn list_bookings(&self) -> Vec<Booking> {
        let mut out = Vec::new();
        for entry in self.kennels.iter() {
            let ks = entry.value().clone();
            let guard = ks.read().await;
            out.extend(guard.bookings.iter().cloned());
        }
        out.sort_by_key(|b| (b.span.start, b.id));
        out
    }

    pub fn get_dog(&self, id: &Ulid) -> Option<Dog> {
        self.dogs.get(id).map(|e| e.value().clone())
    }

    pub fn list_dogs(&self) -> Vec<Dog> {
        let mut out: Vec<Dog> = self.dogs.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }
}

fn kennel_info(ks: &KennelState) -> KennelInfo {
    KennelInfo {
        id: ks.id,
        number: ks.number.clone(),
        size: ks.size,
        occupied: ks.occupied,
        notes: ks.notes.clone(),
    }
}
