use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::passcode;

use super::conflict::{check_no_conflict, now_ms, today, validate_stay};
use super::{Ledger, LedgerError};

impl Ledger {
    /// Allocate a room for a date range. On success exactly one new ACTIVE
    /// booking exists, its stay disjoint from every other ACTIVE stay on the
    /// room, and the returned record carries the check-in passcode — the only
    /// time it leaves the ledger.
    pub async fn reserve(
        &self,
        room_id: Ulid,
        user_id: Ulid,
        stay: Stay,
        guests: u32,
    ) -> Result<Booking, LedgerError> {
        validate_stay(&stay, today())?;

        let capacity = self
            .directory()
            .capacity_of(room_id)
            .await
            .ok_or(LedgerError::RoomNotFound(room_id))?;
        if guests == 0 || guests > capacity || guests > MAX_GUESTS {
            return Err(LedgerError::CapacityExceeded { capacity, guests });
        }

        let mut guard = self.room_write(room_id).await?;
        if guard.stays.len() >= MAX_ACTIVE_BOOKINGS_PER_ROOM {
            return Err(LedgerError::LimitExceeded("too many active bookings on room"));
        }
        check_no_conflict(&guard, &stay, None)?;

        // Passcodes of simultaneously ACTIVE bookings on this room must stay
        // distinct, or check-in becomes ambiguous at the front desk.
        let taken: HashSet<String> = guard
            .stays
            .iter()
            .filter_map(|s| self.booking_record(&s.booking_id))
            .map(|b| b.passcode)
            .collect();
        let code = passcode::generate_unique(&taken);

        // ULID collision is negligible but the id contract is exactly-once.
        let mut id = Ulid::new();
        while self.arena().contains_key(&id) {
            id = Ulid::new();
        }

        let event = Event::BookingCreated {
            id,
            room_id,
            user_id,
            stay,
            guests,
            passcode: code,
            created_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        tracing::info!(booking = %id, room = %room_id, "reservation confirmed");
        Ok(self
            .booking_record(&id)
            .expect("booking present after commit"))
    }

    /// Cancel a booking. Terminal: the stay leaves the overlap set, the
    /// passcode becomes permanently unusable, and the record is retained.
    pub async fn cancel(&self, booking_id: Ulid, requester: Requester) -> Result<(), LedgerError> {
        let room_id = self
            .booking_record(&booking_id)
            .ok_or(LedgerError::NotFound(booking_id))?
            .room_id;

        let mut guard = self.room_write(room_id).await?;
        // Status can only change under this room's lock — re-read now that we
        // hold it.
        let booking = self
            .booking_record(&booking_id)
            .ok_or(LedgerError::NotFound(booking_id))?;
        if !booking.status.is_active() {
            return Err(LedgerError::AlreadyCancelled(booking_id));
        }
        if !requester.may_manage(&booking) {
            return Err(LedgerError::Forbidden(booking_id));
        }

        let event = Event::BookingCancelled { id: booking_id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;

        tracing::info!(booking = %booking_id, room = %room_id, "booking cancelled");
        Ok(())
    }

    /// Move a booking's check-out date. The new stay must not collide with
    /// any other ACTIVE booking on the room; the booking itself is excluded
    /// from that check.
    pub async fn extend(
        &self,
        booking_id: Ulid,
        requester: Requester,
        new_check_out: NaiveDate,
    ) -> Result<Booking, LedgerError> {
        let room_id = self
            .booking_record(&booking_id)
            .ok_or(LedgerError::NotFound(booking_id))?
            .room_id;

        let mut guard = self.room_write(room_id).await?;
        let booking = self
            .booking_record(&booking_id)
            .ok_or(LedgerError::NotFound(booking_id))?;
        if !booking.status.is_active() {
            return Err(LedgerError::AlreadyCancelled(booking_id));
        }
        if !requester.may_manage(&booking) {
            return Err(LedgerError::Forbidden(booking_id));
        }

        // The stay may already be in progress, so no back-dating check here —
        // only the shape of the new range.
        if new_check_out <= booking.stay.check_in {
            return Err(LedgerError::InvalidDateRange {
                check_in: booking.stay.check_in,
                check_out: new_check_out,
            });
        }
        let new_stay = Stay::new(booking.stay.check_in, new_check_out);
        if new_stay.nights() > MAX_STAY_NIGHTS {
            return Err(LedgerError::LimitExceeded("stay too long"));
        }
        check_no_conflict(&guard, &new_stay, Some(booking_id))?;

        let event = Event::BookingExtended { id: booking_id, room_id, new_check_out };
        self.persist_and_apply(&mut guard, &event).await?;

        tracing::info!(booking = %booking_id, room = %room_id, %new_check_out, "booking extended");
        Ok(self
            .booking_record(&booking_id)
            .expect("booking present after commit"))
    }
}
