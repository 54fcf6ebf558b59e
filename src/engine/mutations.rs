use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{RwLock, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::overlap::{check_no_overlap, now_ms, validate_span};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Kennel CRUD ──────────────────────────────────────────

    pub async fn create_kennel(
        &self,
        id: Ulid,
        number: String,
        size: KennelSize,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        if self.kennels.len() >= MAX_KENNELS_PER_FACILITY {
            return Err(EngineError::LimitExceeded("too many kennels"));
        }
        if number.is_empty() || number.len() > MAX_KENNEL_NUMBER_LEN {
            return Err(EngineError::LimitExceeded("bad kennel number length"));
        }
        if let Some(ref n) = notes
            && n.len() > MAX_NOTES_LEN
        {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        if self.kennels.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::KennelCreated {
            id,
            number: number.clone(),
            size,
            notes: notes.clone(),
            created_at: now_ms(),
        };
        self.wal_append(&event).await?;
        // New kennels start unoccupied; the resolver owns the flag from here.
        let ks = KennelState::new(id, number, size, notes, now_ms());
        self.kennels.insert(id, Arc::new(RwLock::new(ks)));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_kennel(
        &self,
        id: Ulid,
        number: String,
        size: KennelSize,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        if number.is_empty() || number.len() > MAX_KENNEL_NUMBER_LEN {
            return Err(EngineError::LimitExceeded("bad kennel number length"));
        }
        if let Some(ref n) = notes
            && n.len() > MAX_NOTES_LEN
        {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        let ks = self.get_kennel(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = ks.write().await;
        // The Arc may have been fetched just before a concurrent deletion
        // dropped this kennel from the map; the map is authoritative.
        if !self.kennels.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::KennelUpdated { id, number, size, notes };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    pub async fn delete_kennel(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let ks = self.get_kennel(&id).ok_or(EngineError::NotFound(id))?;
        let guard = ks.write().await;
        if !guard.bookings.is_empty() {
            return Err(EngineError::HasBookings(id));
        }

        let event = Event::KennelDeleted { id };
        self.wal_append(&event).await?;
        // Remove from the map while still holding the write guard, so a
        // writer queued on this kennel's lock wakes to find it gone instead
        // of committing into an orphaned state.
        self.kennels.remove(&id);
        drop(guard);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    // ── Dog registry ─────────────────────────────────────────

    pub async fn register_dog(&self, id: Ulid, name: String, breed: String) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        if self.dogs.len() >= MAX_DOGS_PER_FACILITY {
            return Err(EngineError::LimitExceeded("too many dogs"));
        }
        validate_dog_fields(&name, &breed)?;
        if self.dogs.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::DogRegistered {
            id,
            name: name.clone(),
            breed: breed.clone(),
        };
        self.wal_append(&event).await?;
        self.dogs.insert(id, Dog { id, name, breed });
        Ok(())
    }

    pub async fn update_dog(&self, id: Ulid, name: String, breed: String) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        validate_dog_fields(&name, &breed)?;
        if !self.dogs.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::DogUpdated {
            id,
            name: name.clone(),
            breed: breed.clone(),
        };
        self.wal_append(&event).await?;
        self.dogs.insert(id, Dog { id, name, breed });
        Ok(())
    }

    /// Remove a dog from the registry. Takes the gate exclusively: while the
    /// reference scan runs, no create can admit a booking for this dog.
    pub async fn remove_dog(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.write().await;
        if !self.dogs.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        for entry in self.kennels.iter() {
            let ks = entry.value().clone();
            let guard = ks.read().await;
            if guard.bookings.iter().any(|b| b.dog_id == id) {
                return Err(EngineError::HasBookings(id));
            }
        }

        let event = Event::DogRemoved { id };
        self.wal_append(&event).await?;
        self.dogs.remove(&id);
        Ok(())
    }

    // ── Booking operations ───────────────────────────────────

    /// Create a booking in Pending status. The overlap guard runs under the
    /// kennel's write lock, so a concurrent create for the same dates cannot
    /// slip between check and write; the id is reserved in the reverse index
    /// up front, so a concurrent create with the same id loses cleanly.
    pub async fn create_booking(
        &self,
        id: Ulid,
        dog_id: Ulid,
        kennel_id: Ulid,
        span: Span,
        special_requirements: Option<String>,
        total_cost_cents: i64,
    ) -> Result<Booking, EngineError> {
        let _gate = self.compact_gate.read().await;
        validate_span(&span)?;
        validate_requirements(&special_requirements)?;
        if !self.dogs.contains_key(&dog_id) {
            return Err(EngineError::NotFound(dog_id));
        }
        match self.booking_to_kennel.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(entry) => {
                entry.insert(kennel_id);
            }
        }

        let result = self
            .create_booking_reserved(id, dog_id, kennel_id, span, special_requirements, total_cost_cents)
            .await;
        if result.is_err() {
            self.booking_to_kennel.remove(&id);
        }
        result
    }

    async fn create_booking_reserved(
        &self,
        id: Ulid,
        dog_id: Ulid,
        kennel_id: Ulid,
        span: Span,
        special_requirements: Option<String>,
        total_cost_cents: i64,
    ) -> Result<Booking, EngineError> {
        let ks = self
            .get_kennel(&kennel_id)
            .ok_or(EngineError::NotFound(kennel_id))?;
        let mut guard = ks.write().await;
        // Re-check after the lock: a deletion may have raced the map fetch.
        if !self.kennels.contains_key(&kennel_id) {
            return Err(EngineError::NotFound(kennel_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_KENNEL {
            return Err(EngineError::LimitExceeded("too many bookings on kennel"));
        }

        check_no_overlap(&guard, &span, None)?;

        let event = Event::BookingCreated {
            id,
            dog_id,
            kennel_id,
            span,
            special_requirements,
            total_cost_cents,
            created_at: now_ms(),
        };
        self.persist_and_apply(kennel_id, &mut guard, &event).await?;
        // A new booking is Pending, never CheckedIn — but recompute anyway so
        // the invariant holds even if the default status ever changes.
        self.recompute_occupancy(kennel_id, &mut guard).await?;

        info!("booking {id} created on kennel {kennel_id}");
        Ok(guard.booking(id).cloned().expect("booking just inserted"))
    }

    /// Update a booking's dog, kennel, dates, requirements, or cost. Status
    /// is untouched; use `set_booking_status`. When the kennel changes, both
    /// kennels' locks are taken in sorted id order and occupancy is
    /// recomputed for the old kennel before the new one.
    pub async fn update_booking(
        &self,
        id: Ulid,
        dog_id: Ulid,
        kennel_id: Ulid,
        span: Span,
        special_requirements: Option<String>,
        total_cost_cents: i64,
    ) -> Result<Booking, EngineError> {
        let _gate = self.compact_gate.read().await;
        validate_span(&span)?;
        validate_requirements(&special_requirements)?;
        if !self.dogs.contains_key(&dog_id) {
            return Err(EngineError::NotFound(dog_id));
        }
        let old_kennel_id = self
            .kennel_for_booking(&id)
            .ok_or(EngineError::NotFound(id))?;

        if old_kennel_id == kennel_id {
            let ks = self
                .get_kennel(&kennel_id)
                .ok_or(EngineError::NotFound(kennel_id))?;
            let mut guard = ks.write().await;
            let existing = guard.booking(id).ok_or(EngineError::NotFound(id))?;
            if existing.span != span {
                check_no_overlap(&guard, &span, Some(id))?;
            }

            let event = Event::BookingUpdated {
                id,
                dog_id,
                kennel_id,
                span,
                special_requirements,
                total_cost_cents,
                updated_at: now_ms(),
            };
            self.persist_and_apply(kennel_id, &mut guard, &event).await?;
            self.recompute_occupancy(kennel_id, &mut guard).await?;
            return Ok(guard.booking(id).cloned().expect("booking just updated"));
        }

        // Kennel move. Lock both kennels in sorted id order to avoid deadlock
        // against a move running the other way.
        let old_ks = self
            .get_kennel(&old_kennel_id)
            .ok_or(EngineError::NotFound(old_kennel_id))?;
        let new_ks = self
            .get_kennel(&kennel_id)
            .ok_or(EngineError::NotFound(kennel_id))?;
        let (mut old_guard, mut new_guard) = if old_kennel_id < kennel_id {
            let o = old_ks.write_owned().await;
            let n = new_ks.write_owned().await;
            (o, n)
        } else {
            let n = new_ks.write_owned().await;
            let o = old_ks.write_owned().await;
            (o, n)
        };
        // The target kennel may have been deleted while we waited.
        if !self.kennels.contains_key(&kennel_id) {
            return Err(EngineError::NotFound(kennel_id));
        }

        let prior = old_guard.booking(id).ok_or(EngineError::NotFound(id))?.clone();
        if new_guard.bookings.len() >= MAX_BOOKINGS_PER_KENNEL {
            return Err(EngineError::LimitExceeded("too many bookings on kennel"));
        }
        check_no_overlap(&new_guard, &span, Some(id))?;

        let updated_at = now_ms();
        let event = Event::BookingUpdated {
            id,
            dog_id,
            kennel_id,
            span,
            special_requirements: special_requirements.clone(),
            total_cost_cents,
            updated_at,
        };
        self.wal_append(&event).await?;

        old_guard.remove_booking(id);
        let moved = Booking {
            id,
            dog_id,
            kennel_id,
            span,
            status: prior.status,
            special_requirements,
            total_cost_cents,
            created_at: prior.created_at,
            updated_at: Some(updated_at),
        };
        new_guard.insert_booking(moved.clone());
        self.booking_to_kennel.insert(id, kennel_id);
        self.notify.send(old_kennel_id, &event);
        self.notify.send(kennel_id, &event);

        // Old kennel first: it may still be occupied by another CheckedIn
        // booking; then the new kennel picks up this booking's presence.
        self.recompute_occupancy(old_kennel_id, &mut old_guard).await?;
        self.recompute_occupancy(kennel_id, &mut new_guard).await?;

        info!("booking {id} moved from kennel {old_kennel_id} to {kennel_id}");
        Ok(moved)
    }

    /// Change a booking's status along the strict transition graph, then
    /// recompute the kennel's occupancy.
    pub async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let _gate = self.compact_gate.read().await;
        let (kennel_id, mut guard) = self.resolve_booking_write(&id).await?;
        let from = guard.booking(id).ok_or(EngineError::NotFound(id))?.status;
        if !from.can_transition_to(status) {
            return Err(EngineError::InvalidTransition { from, to: status });
        }

        let event = Event::BookingStatusChanged {
            id,
            kennel_id,
            status,
            updated_at: now_ms(),
        };
        self.persist_and_apply(kennel_id, &mut guard, &event).await?;
        self.recompute_occupancy(kennel_id, &mut guard).await?;

        info!("booking {id} status {from} -> {status}");
        Ok(guard.booking(id).cloned().expect("booking just updated"))
    }

    /// Delete a booking and recompute occupancy for its former kennel —
    /// a removed CheckedIn booking may have been the sole occupant.
    pub async fn delete_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.compact_gate.read().await;
        let (kennel_id, mut guard) = self.resolve_booking_write(&id).await?;
        let event = Event::BookingDeleted { id, kennel_id };
        self.persist_and_apply(kennel_id, &mut guard, &event).await?;
        self.recompute_occupancy(kennel_id, &mut guard).await?;
        Ok(kennel_id)
    }

    /// Compact the WAL to the minimal event set recreating current state.
    ///
    /// Holds the gate exclusively from the first snapshot read until the
    /// Compact command is in the writer's queue: appends committed before
    /// the gate are reflected in the snapshot, appends after it queue behind
    /// the Compact command and land in the rewritten file.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let gate = self.compact_gate.write().await;
        let mut events = Vec::new();
        let mut seen = HashSet::new();

        for entry in self.dogs.iter() {
            let dog = entry.value();
            events.push(Event::DogRegistered {
                id: dog.id,
                name: dog.name.clone(),
                breed: dog.breed.clone(),
            });
        }

        let kennel_ids: Vec<Ulid> = self.kennels.iter().map(|e| *e.key()).collect();
        for id in kennel_ids {
            if !seen.insert(id) {
                continue;
            }
            let Some(ks) = self.get_kennel(&id) else { continue };
            let guard = ks.read().await;

            events.push(Event::KennelCreated {
                id: guard.id,
                number: guard.number.clone(),
                size: guard.size,
                notes: guard.notes.clone(),
                created_at: guard.created_at,
            });
            for b in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: b.id,
                    dog_id: b.dog_id,
                    kennel_id: b.kennel_id,
                    span: b.span,
                    special_requirements: b.special_requirements.clone(),
                    total_cost_cents: b.total_cost_cents,
                    created_at: b.created_at,
                });
                if b.status != BookingStatus::Pending {
                    events.push(Event::BookingStatusChanged {
                        id: b.id,
                        kennel_id: b.kennel_id,
                        status: b.status,
                        updated_at: b.updated_at.unwrap_or(b.created_at),
                    });
                }
            }
            if guard.occupied {
                events.push(Event::OccupancyChanged {
                    kennel_id: guard.id,
                    occupied: true,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        // Queued behind every prior append; later appends queue behind it.
        drop(gate);
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn validate_dog_fields(name: &str, breed: &str) -> Result<(), EngineError> {
    if name.is_empty() || name.len() > MAX_DOG_NAME_LEN {
        return Err(EngineError::LimitExceeded("bad dog name length"));
    }
    if breed.is_empty() || breed.len() > MAX_BREED_LEN {
        return Err(EngineError::LimitExceeded("bad breed length"));
    }
    Ok(())
}

fn validate_requirements(requirements: &Option<String>) -> Result<(), EngineError> {
    if let Some(r) = requirements
        && r.len() > MAX_REQUIREMENTS_LEN
    {
        return Err(EngineError::LimitExceeded("special requirements too long"));
    }
    Ok(())
}
