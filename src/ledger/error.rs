use chrono::NaiveDate;
use ulid::Ulid;

#[derive(Debug, PartialEq)]
pub enum LedgerError {
    /// Room unknown to the directory.
    RoomNotFound(Ulid),
    /// Guest count outside `1..=capacity` for the room.
    CapacityExceeded { capacity: u32, guests: u32 },
    /// check_in >= check_out, or a date in the past.
    InvalidDateRange { check_in: NaiveDate, check_out: NaiveDate },
    /// Requested stay overlaps the ACTIVE booking carried in the variant.
    DateConflict(Ulid),
    /// Unknown booking id.
    NotFound(Ulid),
    /// Cancellation of a booking already in its terminal state.
    AlreadyCancelled(Ulid),
    /// Requester is neither the owning user nor staff.
    Forbidden(Ulid),
    /// Room critical section could not be acquired in time. Safe to retry.
    Busy(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl LedgerError {
    /// Stable machine-readable code for the wire layer.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::RoomNotFound(_) => "room_not_found",
            LedgerError::CapacityExceeded { .. } => "capacity_exceeded",
            LedgerError::InvalidDateRange { .. } => "invalid_date_range",
            LedgerError::DateConflict(_) => "date_conflict",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::AlreadyCancelled(_) => "already_cancelled",
            LedgerError::Forbidden(_) => "forbidden",
            LedgerError::Busy(_) => "busy",
            LedgerError::LimitExceeded(_) => "limit_exceeded",
            LedgerError::WalError(_) => "wal_error",
        }
    }

    /// Only contention is worth retrying unchanged.
    pub fn retryable(&self) -> bool {
        matches!(self, LedgerError::Busy(_))
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            LedgerError::CapacityExceeded { capacity, guests } => {
                write!(f, "guest count {guests} outside 1..={capacity}")
            }
            LedgerError::InvalidDateRange { check_in, check_out } => {
                write!(f, "invalid date range [{check_in}, {check_out})")
            }
            LedgerError::DateConflict(id) => write!(f, "dates conflict with booking: {id}"),
            LedgerError::NotFound(id) => write!(f, "booking not found: {id}"),
            LedgerError::AlreadyCancelled(id) => write!(f, "booking already cancelled: {id}"),
            LedgerError::Forbidden(id) => write!(f, "not allowed to manage booking: {id}"),
            LedgerError::Busy(id) => write!(f, "room busy, retry: {id}"),
            LedgerError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            LedgerError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for LedgerError {}
