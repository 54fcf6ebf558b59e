mod error;
mod mutations;
mod occupancy;
mod overlap;
mod queries;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use occupancy::{recompute, resolve_occupancy};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedKennelState = Arc<RwLock<KennelState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command.
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking–occupancy consistency engine for one facility.
///
/// Every mutating operation holds its kennel's write lock across the
/// availability check, the WAL append, the in-memory apply, and the
/// occupancy recompute — one atomic unit per kennel, which is what closes
/// the check-then-act race between two concurrent bookings.
pub struct Engine {
    pub kennels: DashMap<Ulid, SharedKennelState>,
    pub dogs: DashMap<Ulid, Dog>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → kennel id.
    pub(super) booking_to_kennel: DashMap<Ulid, Ulid>,
    /// Mutations hold this shared for their whole append window; compaction
    /// holds it exclusive while snapshotting, so no append can land between
    /// a snapshotted state and the swap that would discard it.
    pub(super) compact_gate: RwLock<()>,
}

/// Apply a single-kennel event to a KennelState (no locking — caller holds
/// the lock). Kennel/dog creation and deletion are handled at the map level,
/// as are cross-kennel booking moves.
fn apply_to_kennel(ks: &mut KennelState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::KennelUpdated { number, size, notes, .. } => {
            ks.number = number.clone();
            ks.size = *size;
            ks.notes = notes.clone();
        }
        Event::BookingCreated {
            id,
            dog_id,
            kennel_id,
            span,
            special_requirements,
            total_cost_cents,
            created_at,
        } => {
            ks.insert_booking(Booking {
                id: *id,
                dog_id: *dog_id,
                kennel_id: *kennel_id,
                span: *span,
                status: BookingStatus::Pending,
                special_requirements: special_requirements.clone(),
                total_cost_cents: *total_cost_cents,
                created_at: *created_at,
                updated_at: None,
            });
            index.insert(*id, *kennel_id);
        }
        Event::BookingUpdated {
            id,
            dog_id,
            kennel_id,
            span,
            special_requirements,
            total_cost_cents,
            updated_at,
        } => {
            // Same-kennel update: remove + reinsert to keep the span ordering.
            if let Some(old) = ks.remove_booking(*id) {
                ks.insert_booking(Booking {
                    id: *id,
                    dog_id: *dog_id,
                    kennel_id: *kennel_id,
                    span: *span,
                    status: old.status,
                    special_requirements: special_requirements.clone(),
                    total_cost_cents: *total_cost_cents,
                    created_at: old.created_at,
                    updated_at: Some(*updated_at),
                });
            }
        }
        Event::BookingStatusChanged { id, status, updated_at, .. } => {
            if let Some(b) = ks.booking_mut(*id) {
                b.status = *status;
                b.updated_at = Some(*updated_at);
            }
        }
        Event::BookingDeleted { id, .. } => {
            ks.remove_booking(*id);
            index.remove(id);
        }
        Event::OccupancyChanged { occupied, .. } => {
            ks.occupied = *occupied;
        }
        Event::KennelCreated { .. }
        | Event::KennelDeleted { .. }
        | Event::DogRegistered { .. }
        | Event::DogUpdated { .. }
        | Event::DogRemoved { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            kennels: DashMap::new(),
            dogs: DashMap::new(),
            wal_tx,
            notify,
            booking_to_kennel: DashMap::new(),
            compact_gate: RwLock::new(()),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this may
        // run inside an async context (lazy facility creation).
        for event in &events {
            engine.replay_event(event);
        }

        // The log carries OccupancyChanged records as a cache, but the
        // resolver is authoritative: rebuild every flag after replay.
        for entry in engine.kennels.iter() {
            let ks = entry.value().clone();
            let mut guard = ks.try_write().expect("replay: uncontended write");
            let _ = occupancy::recompute(&mut guard);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::KennelCreated { id, number, size, notes, created_at } => {
                let ks = KennelState::new(*id, number.clone(), *size, notes.clone(), *created_at);
                self.kennels.insert(*id, Arc::new(RwLock::new(ks)));
            }
            Event::KennelDeleted { id } => {
                self.kennels.remove(id);
            }
            Event::DogRegistered { id, name, breed } | Event::DogUpdated { id, name, breed } => {
                self.dogs.insert(*id, Dog { id: *id, name: name.clone(), breed: breed.clone() });
            }
            Event::DogRemoved { id } => {
                self.dogs.remove(id);
            }
            Event::BookingUpdated {
                id,
                dog_id,
                kennel_id,
                span,
                special_requirements,
                total_cost_cents,
                updated_at,
            } if self.kennel_for_booking(id) != Some(*kennel_id) => {
                // Kennel move: pull the booking out of its old kennel first.
                let prior = self
                    .kennel_for_booking(id)
                    .and_then(|old_kid| self.get_kennel(&old_kid))
                    .and_then(|ks| {
                        ks.try_write()
                            .expect("replay: uncontended write")
                            .remove_booking(*id)
                    });
                if let Some(entry) = self.kennels.get(kennel_id) {
                    let ks = entry.value().clone();
                    let mut guard = ks.try_write().expect("replay: uncontended write");
                    guard.insert_booking(Booking {
                        id: *id,
                        dog_id: *dog_id,
                        kennel_id: *kennel_id,
                        span: *span,
                        status: prior.as_ref().map(|b| b.status).unwrap_or(BookingStatus::Pending),
                        special_requirements: special_requirements.clone(),
                        total_cost_cents: *total_cost_cents,
                        created_at: prior.as_ref().map(|b| b.created_at).unwrap_or(*updated_at),
                        updated_at: Some(*updated_at),
                    });
                    self.booking_to_kennel.insert(*id, *kennel_id);
                }
            }
            other => {
                if let Some(kennel_id) = event_kennel_id(other)
                    && let Some(entry) = self.kennels.get(&kennel_id)
                {
                    let ks = entry.value().clone();
                    let mut guard = ks.try_write().expect("replay: uncontended write");
                    apply_to_kennel(&mut guard, other, &self.booking_to_kennel);
                }
            }
        }
    }

    /// Write an event to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_kennel(&self, id: &Ulid) -> Option<SharedKennelState> {
        self.kennels.get(id).map(|e| e.value().clone())
    }

    pub fn kennel_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_kennel.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        kennel_id: Ulid,
        ks: &mut KennelState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_kennel(ks, event, &self.booking_to_kennel);
        self.notify.send(kennel_id, event);
        Ok(())
    }

    /// Recompute the kennel's derived `occupied` flag under the held lock.
    /// Appends an OccupancyChanged record only when the flag flips; calling
    /// this again immediately is a no-op.
    pub(super) async fn recompute_occupancy(
        &self,
        kennel_id: Ulid,
        ks: &mut KennelState,
    ) -> Result<(), EngineError> {
        let occupied = occupancy::resolve_occupancy(ks);
        if ks.occupied == occupied {
            return Ok(());
        }
        let event = Event::OccupancyChanged { kennel_id, occupied };
        self.wal_append(&event).await?;
        ks.occupied = occupied;
        metrics::counter!(crate::observability::OCCUPANCY_FLIPS_TOTAL).increment(1);
        self.notify.send(kennel_id, &event);
        Ok(())
    }

    /// Lookup booking → kennel, then acquire the kennel's write lock.
    ///
    /// A concurrent move can relocate the booking between the index lookup
    /// and the lock acquisition; when the locked kennel no longer holds the
    /// booking, one retry chases the index to its new home.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<KennelState>), EngineError> {
        for _ in 0..2 {
            let kennel_id = self
                .kennel_for_booking(booking_id)
                .ok_or(EngineError::NotFound(*booking_id))?;
            let ks = self
                .get_kennel(&kennel_id)
                .ok_or(EngineError::NotFound(kennel_id))?;
            let guard = ks.write_owned().await;
            if guard.booking(*booking_id).is_some() {
                return Ok((kennel_id, guard));
            }
        }
        Err(EngineError::NotFound(*booking_id))
    }
}

/// Extract the kennel id from a single-kennel event.
fn event_kennel_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingCreated { kennel_id, .. }
        | Event::BookingUpdated { kennel_id, .. }
        | Event::BookingStatusChanged { kennel_id, .. }
        | Event::BookingDeleted { kennel_id, .. }
        | Event::OccupancyChanged { kennel_id, .. } => Some(*kennel_id),
        Event::KennelUpdated { id, .. } => Some(*id),
        Event::KennelCreated { .. }
        | Event::KennelDeleted { .. }
        | Event::DogRegistered { .. }
        | Event::DogUpdated { .. }
        | Event::DogRemoved { .. } => None,
    }
}
