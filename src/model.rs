use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open stay interval `[check_in, check_out)`.
///
/// Check-out is exclusive, so one dog checking out and another checking in
/// on the same day never conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Booking lifecycle. Transitions follow a strict graph:
/// `Pending → {Confirmed, Cancelled}`, `Confirmed → {CheckedIn, Cancelled}`,
/// `CheckedIn → CheckedOut`; `CheckedOut` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl BookingStatus {
    /// Cancelled bookings release their dates; everything else blocks.
    pub fn blocks_dates(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, CheckedIn)
                | (Confirmed, Cancelled)
                | (CheckedIn, CheckedOut)
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::CheckedIn => "CheckedIn",
            BookingStatus::CheckedOut => "CheckedOut",
            BookingStatus::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KennelSize {
    Small,
    Medium,
    Large,
    ExtraLarge,
}

/// A reservation of one kennel for one dog over a half-open date span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub dog_id: Ulid,
    pub kennel_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    pub special_requirements: Option<String>,
    pub total_cost_cents: i64,
    pub created_at: Ms,
    pub updated_at: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dog {
    pub id: Ulid,
    pub name: String,
    pub breed: String,
}

#[derive(Debug, Clone)]
pub struct KennelState {
    pub id: Ulid,
    pub number: String,
    pub size: KennelSize,
    /// Derived: true iff any booking on this kennel is CheckedIn.
    /// Written only by the occupancy resolver, never by clients.
    pub occupied: bool,
    pub notes: Option<String>,
    pub created_at: Ms,
    /// All bookings referencing this kennel, sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl KennelState {
    pub fn new(id: Ulid, number: String, size: KennelSize, notes: Option<String>, created_at: Ms) -> Self {
        Self {
            id,
            number,
            size,
            occupied: false,
            notes,
            created_at,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    KennelCreated {
        id: Ulid,
        number: String,
        size: KennelSize,
        notes: Option<String>,
        created_at: Ms,
    },
    KennelUpdated {
        id: Ulid,
        number: String,
        size: KennelSize,
        notes: Option<String>,
    },
    KennelDeleted {
        id: Ulid,
    },
    DogRegistered {
        id: Ulid,
        name: String,
        breed: String,
    },
    DogUpdated {
        id: Ulid,
        name: String,
        breed: String,
    },
    DogRemoved {
        id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        dog_id: Ulid,
        kennel_id: Ulid,
        span: Span,
        special_requirements: Option<String>,
        total_cost_cents: i64,
        created_at: Ms,
    },
    BookingUpdated {
        id: Ulid,
        dog_id: Ulid,
        kennel_id: Ulid,
        span: Span,
        special_requirements: Option<String>,
        total_cost_cents: i64,
        updated_at: Ms,
    },
    BookingStatusChanged {
        id: Ulid,
        kennel_id: Ulid,
        status: BookingStatus,
        updated_at: Ms,
    },
    BookingDeleted {
        id: Ulid,
        kennel_id: Ulid,
    },
    /// Appended only when the resolver flips a kennel's flag.
    OccupancyChanged {
        kennel_id: Ulid,
        occupied: bool,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KennelInfo {
    pub id: Ulid,
    pub number: String,
    pub size: KennelSize,
    pub occupied: bool,
    pub notes: Option<String>,
}
