use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only timestamp type.
pub type Ms = i64;

/// Half-open calendar range `[check_in, check_out)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    /// No shape check here — `validate_stay` is the gate for caller input,
    /// and tests build degenerate ranges on purpose.
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self { check_in, check_out }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    pub fn contains_date(&self, d: NaiveDate) -> bool {
        self.check_in <= d && d < self.check_out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Active,
    Cancelled,
}

impl BookingStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Active)
    }
}

/// A booking record. Cancelled bookings are retained for audit; only their
/// stay is removed from the room's overlap set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub stay: Stay,
    pub guests: u32,
    pub status: BookingStatus,
    pub passcode: String,
    pub created_at: Ms,
}

/// Authenticated caller identity, supplied by the session gateway on every
/// mutating call — never inferred from ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Ulid,
    pub staff: bool,
}

impl Requester {
    pub fn guest(user_id: Ulid) -> Self {
        Self { user_id, staff: false }
    }

    pub fn staff(user_id: Ulid) -> Self {
        Self { user_id, staff: true }
    }

    /// Staff may manage any booking; guests only their own.
    pub fn may_manage(&self, booking: &Booking) -> bool {
        self.staff || self.user_id == booking.user_id
    }
}

/// One ACTIVE allocation on a room's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveStay {
    pub booking_id: Ulid,
    pub stay: Stay,
}

/// Per-room index of ACTIVE stays, sorted by `check_in`. This is the overlap
/// set the no-double-booking invariant is enforced against.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub stays: Vec<ActiveStay>,
}

impl RoomState {
    pub fn new(id: Ulid) -> Self {
        Self { id, stays: Vec::new() }
    }

    /// Insert a stay maintaining sort order by check_in.
    pub fn insert_stay(&mut self, entry: ActiveStay) {
        let pos = self
            .stays
            .binary_search_by_key(&entry.stay.check_in, |s| s.stay.check_in)
            .unwrap_or_else(|e| e);
        self.stays.insert(pos, entry);
    }

    /// Remove the stay belonging to a booking.
    pub fn remove_stay(&mut self, booking_id: Ulid) -> Option<ActiveStay> {
        if let Some(pos) = self.stays.iter().position(|s| s.booking_id == booking_id) {
            Some(self.stays.remove(pos))
        } else {
            None
        }
    }

    /// Return only stays overlapping the query range.
    /// Uses binary search to skip stays starting at or after `query.check_out`.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &ActiveStay> {
        // Everything at index >= right_bound checks in at or after
        // query.check_out → can't overlap.
        let right_bound = self
            .stays
            .partition_point(|s| s.stay.check_in < query.check_out);
        self.stays[..right_bound]
            .iter()
            .filter(move |s| s.stay.check_out > query.check_in)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomRegistered {
        id: Ulid,
        capacity: u32,
    },
    BookingCreated {
        id: Ulid,
        room_id: Ulid,
        user_id: Ulid,
        stay: Stay,
        guests: u32,
        passcode: String,
        created_at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        room_id: Ulid,
    },
    BookingExtended {
        id: Ulid,
        room_id: Ulid,
        new_check_out: NaiveDate,
    },
}

impl Event {
    /// Room this event belongs to, for notify routing.
    pub fn room_id(&self) -> Ulid {
        match self {
            Event::RoomRegistered { id, .. } => *id,
            Event::BookingCreated { room_id, .. }
            | Event::BookingCancelled { room_id, .. }
            | Event::BookingExtended { room_id, .. } => *room_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Booking view returned by queries and the wire layer. Never carries the
/// passcode — that leaves the ledger only once, at reserve time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingInfo {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
    pub status: BookingStatus,
    pub created_at: Ms,
}

impl From<&Booking> for BookingInfo {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            room_id: b.room_id,
            user_id: b.user_id,
            check_in: b.stay.check_in,
            check_out: b.stay.check_out,
            guests: b.guests,
            status: b.status,
            created_at: b.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn stay_basics() {
        let s = Stay::new(d("2027-08-01"), d("2027-08-05"));
        assert_eq!(s.nights(), 4);
        assert!(s.contains_date(d("2027-08-01")));
        assert!(s.contains_date(d("2027-08-04")));
        assert!(!s.contains_date(d("2027-08-05"))); // half-open
    }

    #[test]
    fn stay_overlap() {
        let a = Stay::new(d("2027-08-01"), d("2027-08-05"));
        let b = Stay::new(d("2027-08-03"), d("2027-08-08"));
        let c = Stay::new(d("2027-08-05"), d("2027-08-09"));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // back-to-back, not overlapping
    }

    #[test]
    fn stay_ordering() {
        let mut rs = RoomState::new(Ulid::new());
        rs.insert_stay(ActiveStay {
            booking_id: Ulid::new(),
            stay: Stay::new(d("2027-08-10"), d("2027-08-12")),
        });
        rs.insert_stay(ActiveStay {
            booking_id: Ulid::new(),
            stay: Stay::new(d("2027-08-01"), d("2027-08-03")),
        });
        rs.insert_stay(ActiveStay {
            booking_id: Ulid::new(),
            stay: Stay::new(d("2027-08-05"), d("2027-08-08")),
        });
        assert_eq!(rs.stays[0].stay.check_in, d("2027-08-01"));
        assert_eq!(rs.stays[1].stay.check_in, d("2027-08-05"));
        assert_eq!(rs.stays[2].stay.check_in, d("2027-08-10"));
    }

    #[test]
    fn stay_remove() {
        let mut rs = RoomState::new(Ulid::new());
        let bid = Ulid::new();
        rs.insert_stay(ActiveStay {
            booking_id: bid,
            stay: Stay::new(d("2027-08-01"), d("2027-08-03")),
        });
        assert_eq!(rs.stays.len(), 1);
        rs.remove_stay(bid);
        assert!(rs.stays.is_empty());
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut rs = RoomState::new(Ulid::new());
        rs.insert_stay(ActiveStay {
            booking_id: Ulid::new(),
            stay: Stay::new(d("2027-08-01"), d("2027-08-03")),
        });
        assert!(rs.remove_stay(Ulid::new()).is_none());
        assert_eq!(rs.stays.len(), 1); // original still there
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = RoomState::new(Ulid::new());
        rs.insert_stay(ActiveStay {
            booking_id: Ulid::new(),
            stay: Stay::new(d("2027-07-01"), d("2027-07-05")),
        });
        let hit = Stay::new(d("2027-08-04"), d("2027-08-09"));
        rs.insert_stay(ActiveStay {
            booking_id: Ulid::new(),
            stay: hit,
        });
        rs.insert_stay(ActiveStay {
            booking_id: Ulid::new(),
            stay: Stay::new(d("2027-09-20"), d("2027-09-25")),
        });

        let query = Stay::new(d("2027-08-05"), d("2027-08-15"));
        let hits: Vec<_> = rs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].stay, hit);
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        // Stay ending exactly at query.check_in is NOT overlapping (half-open)
        let mut rs = RoomState::new(Ulid::new());
        rs.insert_stay(ActiveStay {
            booking_id: Ulid::new(),
            stay: Stay::new(d("2027-08-01"), d("2027-08-03")),
        });
        let query = Stay::new(d("2027-08-03"), d("2027-08-05"));
        assert!(rs.overlapping(&query).next().is_none());
    }

    #[test]
    fn overlapping_empty_room() {
        let rs = RoomState::new(Ulid::new());
        let query = Stay::new(d("2027-08-01"), d("2027-12-31"));
        assert!(rs.overlapping(&query).next().is_none());
    }

    #[test]
    fn overlapping_single_night_overlap() {
        // Stay [01, 04) overlaps query [03, 06) by exactly one night
        let mut rs = RoomState::new(Ulid::new());
        rs.insert_stay(ActiveStay {
            booking_id: Ulid::new(),
            stay: Stay::new(d("2027-08-01"), d("2027-08-04")),
        });
        let query = Stay::new(d("2027-08-03"), d("2027-08-06"));
        assert_eq!(rs.overlapping(&query).count(), 1);
    }

    #[test]
    fn requester_permissions() {
        let owner = Ulid::new();
        let booking = Booking {
            id: Ulid::new(),
            room_id: Ulid::new(),
            user_id: owner,
            stay: Stay::new(d("2027-08-01"), d("2027-08-03")),
            guests: 2,
            status: BookingStatus::Active,
            passcode: "ABC123".into(),
            created_at: 0,
        };
        assert!(Requester::guest(owner).may_manage(&booking));
        assert!(!Requester::guest(Ulid::new()).may_manage(&booking));
        assert!(Requester::staff(Ulid::new()).may_manage(&booking));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            id: Ulid::new(),
            room_id: Ulid::new(),
            user_id: Ulid::new(),
            stay: Stay::new(d("2027-08-01"), d("2027-08-05")),
            guests: 2,
            passcode: "K7Q2ZD".into(),
            created_at: 1_700_000_000_000,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
