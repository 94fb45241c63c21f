//! The Reservation Ledger: sole writer of booking records, authoritative
//! per-room overlap set, and the check-in verifier's source of truth.

mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::LedgerError;

use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::directory::RoomDirectory;
use crate::limits::ROOM_LOCK_TIMEOUT;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        /// `appends_since_compact` at the moment the snapshot was taken.
        /// The writer refuses the swap if the journal has advanced past it —
        /// otherwise acked events newer than the snapshot would be renamed
        /// away.
        observed_appends: u64,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends (the batch window).
/// 3. One `append_batch` — one write, one fsync — for the whole batch.
/// 4. Respond to all senders.
pub async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the
                            // non-append command
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
    // All-or-nothing: append_batch stages the frames in memory, so a batch
    // reported failed here left nothing on disk.
    let result = wal.append_batch(batch.iter().map(|(event, _)| event));
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

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, observed_appends, response } => {
            // Single-task writer: nothing can append while we're in here, so
            // comparing counters is enough to know the snapshot is current.
            let result = if wal.appends_since_compact() != observed_appends {
                Err(io::Error::other("journal advanced since snapshot"))
            } else {
                Wal::write_compact_file(wal.path(), &events)
                    .and_then(|()| wal.swap_compact_file())
            };
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── The ledger ───────────────────────────────────────────

pub struct Ledger {
    /// Per-room overlap sets. A room's entry is created lazily on its first
    /// booking; the entry's RwLock is the room's critical section.
    rooms: DashMap<Ulid, SharedRoomState>,
    /// Arena of all booking records, cancelled ones included. Mutated only
    /// while holding the owning room's write lock.
    bookings: DashMap<Ulid, Booking>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    directory: Arc<dyn RoomDirectory>,
}

impl Ledger {
    pub fn new(
        wal_tx: mpsc::Sender<WalCommand>,
        directory: Arc<dyn RoomDirectory>,
        notify: Arc<NotifyHub>,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            bookings: DashMap::new(),
            wal_tx,
            notify,
            directory,
        }
    }

    /// Rebuild arena and overlap sets from replayed journal events.
    /// We are the sole owner of the room Arcs at this point, so try_write
    /// always succeeds instantly. Room registrations are the directory's
    /// concern and are skipped here.
    pub fn replay(&self, events: &[Event]) {
        for event in events {
            match event {
                Event::RoomRegistered { .. } => {}
                other => {
                    let rs_arc = self.room_state(other.room_id());
                    let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                    self.apply_to_room(&mut guard, other);
                }
            }
        }
    }

    /// Lazily create a room's entry. Mutation paths only — queries go
    /// through `room_state_if_booked` so they never grow the map.
    pub(super) fn room_state(&self, room_id: Ulid) -> SharedRoomState {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| Arc::new(RwLock::new(RoomState::new(room_id))))
            .value()
            .clone()
    }

    pub(super) fn room_state_if_booked(&self, room_id: Ulid) -> Option<SharedRoomState> {
        self.rooms.get(&room_id).map(|e| e.value().clone())
    }

    /// Acquire the room's critical section within a bounded wait.
    /// Expiry means contention, not corruption — the caller gets `Busy`.
    pub(super) async fn room_write(
        &self,
        room_id: Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<RoomState>, LedgerError> {
        let rs = self.room_state(room_id);
        tokio::time::timeout(ROOM_LOCK_TIMEOUT, rs.write_owned())
            .await
            .map_err(|_| LedgerError::Busy(room_id))
    }

    /// Apply an event to a room's overlap set and the arena. Caller holds the
    /// room lock (or exclusively owns it during replay).
    fn apply_to_room(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::BookingCreated {
                id,
                room_id,
                user_id,
                stay,
                guests,
                passcode,
                created_at,
            } => {
                rs.insert_stay(ActiveStay { booking_id: *id, stay: *stay });
                self.bookings.insert(
                    *id,
                    Booking {
                        id: *id,
                        room_id: *room_id,
                        user_id: *user_id,
                        stay: *stay,
                        guests: *guests,
                        status: BookingStatus::Active,
                        passcode: passcode.clone(),
                        created_at: *created_at,
                    },
                );
            }
            Event::BookingCancelled { id, .. } => {
                rs.remove_stay(*id);
                if let Some(mut b) = self.bookings.get_mut(id) {
                    b.status = BookingStatus::Cancelled;
                }
            }
            Event::BookingExtended { id, new_check_out, .. } => {
                if let Some(entry) = rs.remove_stay(*id) {
                    rs.insert_stay(ActiveStay {
                        booking_id: *id,
                        stay: Stay::new(entry.stay.check_in, *new_check_out),
                    });
                }
                if let Some(mut b) = self.bookings.get_mut(id) {
                    b.stay.check_out = *new_check_out;
                }
            }
            Event::RoomRegistered { .. } => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(crate) async fn wal_append(&self, event: &Event) -> Result<(), LedgerError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event: event.clone(), response: tx })
            .await
            .map_err(|_| LedgerError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| LedgerError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| LedgerError::WalError(e.to_string()))
    }

    /// WAL-append + apply + notify in one call, under the caller's room lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), LedgerError> {
        self.wal_append(event).await?;
        self.apply_to_room(rs, event);
        self.notify.send(event.room_id(), event);
        Ok(())
    }

    pub(super) fn directory(&self) -> &dyn RoomDirectory {
        self.directory.as_ref()
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    /// Number of rooms with a booking history entry.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub(super) fn booking_record(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|b| b.clone())
    }

    pub(super) fn arena(&self) -> &DashMap<Ulid, Booking> {
        &self.bookings
    }

    /// Minimal event sequence that recreates the current booking state.
    /// Cancelled bookings are retained: each replays as created-then-cancelled
    /// so the audit trail survives compaction.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.bookings.len());
        let mut cancellations = Vec::new();
        for entry in self.bookings.iter() {
            let b = entry.value();
            events.push(Event::BookingCreated {
                id: b.id,
                room_id: b.room_id,
                user_id: b.user_id,
                stay: b.stay,
                guests: b.guests,
                passcode: b.passcode.clone(),
                created_at: b.created_at,
            });
            if !b.status.is_active() {
                cancellations.push(Event::BookingCancelled { id: b.id, room_id: b.room_id });
            }
        }
        events.extend(cancellations);
        events
    }

    /// Ask the WAL writer how many appends happened since the last compaction.
    pub async fn appends_since_compact(&self) -> Option<u64> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Replace the journal with the given snapshot events. `observed_appends`
    /// must be the `appends_since_compact` value read before collecting the
    /// snapshot; the swap is refused (retry later) if the journal moved on.
    pub async fn compact(
        &self,
        events: Vec<Event>,
        observed_appends: u64,
    ) -> Result<(), LedgerError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, observed_appends, response: tx })
            .await
            .map_err(|_| LedgerError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| LedgerError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| LedgerError::WalError(e.to_string()))
    }
}
