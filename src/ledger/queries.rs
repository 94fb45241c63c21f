use ulid::Ulid;

use crate::model::*;

use super::Ledger;

impl Ledger {
    /// ACTIVE bookings on a room intersecting the half-open range, ordered by
    /// check-in date. Taken under the room's read lock so the snapshot is
    /// consistent — never a half-inserted stay. A room with no booking
    /// history has no entry and no entry is created: this path is read-only.
    pub async fn list_active(&self, room_id: Ulid, range: Stay) -> Vec<BookingInfo> {
        let Some(rs) = self.room_state_if_booked(room_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        guard
            .overlapping(&range)
            .filter_map(|s| self.booking_record(&s.booking_id))
            .map(|b| BookingInfo::from(&b))
            .collect()
    }

    pub fn get_booking(&self, booking_id: Ulid) -> Option<BookingInfo> {
        self.booking_record(&booking_id).map(|b| BookingInfo::from(&b))
    }

    /// Check-in verification. Uniformly false for an unknown booking, a
    /// cancelled booking, or a wrong code — a guess learns nothing about
    /// which it was. Matching is exact and case-sensitive.
    pub fn verify(&self, booking_id: Ulid, code: &str) -> bool {
        match self.booking_record(&booking_id) {
            Some(b) => b.status.is_active() && b.passcode == code,
            None => false,
        }
    }
}
