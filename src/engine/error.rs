use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Referenced dog, kennel, or booking does not exist.
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Overlap guard rejection; carries the blocking booking's id.
    Conflict(Ulid),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    /// Kennel or dog still referenced by bookings.
    HasBookings(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => {
                write!(f, "kennel is not available for the selected dates (conflicts with booking {id})")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "illegal status transition: {from} -> {to}")
            }
            EngineError::HasBookings(id) => {
                write!(f, "cannot delete {id}: bookings still reference it")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Expected, caller-correctable outcomes vs. operation failures.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::WalError(_))
    }
}
