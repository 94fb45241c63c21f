//! Hard caps protecting the ledger from pathological input. All of these are
//! environment-independent constants; hitting one is a caller error
//! (`LimitExceeded`), not a transient condition.

use std::time::Duration;

/// Maximum number of hotels a single server will lazily open.
pub const MAX_HOTELS: usize = 4096;

/// Maximum hotel name length accepted at connection time.
pub const MAX_HOTEL_NAME_LEN: usize = 256;

/// Maximum rooms registered per hotel directory.
pub const MAX_ROOMS_PER_HOTEL: usize = 100_000;

/// Maximum simultaneously ACTIVE bookings per room.
pub const MAX_ACTIVE_BOOKINGS_PER_ROOM: usize = 10_000;

/// Longest accepted stay, in nights.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Furthest-out accepted check-in, in days from today.
pub const MAX_ADVANCE_DAYS: i64 = 3650;

/// Maximum guests accepted regardless of room capacity.
pub const MAX_GUESTS: u32 = 100;

/// Bound on acquiring a room's critical section. Expiry surfaces as `Busy`,
/// the only retryable error.
pub const ROOM_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Maximum length of one wire line (request or response).
pub const MAX_LINE_LEN: usize = 64 * 1024;
