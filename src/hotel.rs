//! Per-hotel isolation. Each hotel gets its own room directory, ledger, WAL
//! file and compactor — bookings in one hotel never contend with another's.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use ulid::Ulid;

use crate::directory::InMemoryDirectory;
use crate::ledger::{Ledger, LedgerError, wal_writer_loop};
use crate::limits::*;
use crate::model::Event;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub struct Hotel {
    pub directory: Arc<InMemoryDirectory>,
    pub ledger: Arc<Ledger>,
    pub notify: Arc<NotifyHub>,
}

impl Hotel {
    /// Open (or create) a hotel's journal and rebuild its state.
    pub fn open(wal_path: PathBuf) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let directory = Arc::new(InMemoryDirectory::new());
        for event in &events {
            if let Event::RoomRegistered { id, capacity } = event {
                directory.register(*id, *capacity);
            }
        }

        let notify = Arc::new(NotifyHub::new());
        let ledger = Arc::new(Ledger::new(wal_tx, directory.clone(), notify.clone()));
        ledger.replay(&events);

        Ok(Self { directory, ledger, notify })
    }

    /// Add a room to this hotel's directory and journal it. Server plumbing,
    /// not a ledger operation — the ledger only ever reads the directory.
    pub async fn register_room(&self, room_id: Ulid, capacity: u32) -> Result<(), LedgerError> {
        if capacity == 0 || capacity > MAX_GUESTS {
            return Err(LedgerError::LimitExceeded("room capacity out of range"));
        }
        if self.directory.len() >= MAX_ROOMS_PER_HOTEL {
            return Err(LedgerError::LimitExceeded("too many rooms"));
        }
        if !self.directory.register(room_id, capacity) {
            return Err(LedgerError::LimitExceeded("room already registered"));
        }
        let event = Event::RoomRegistered { id: room_id, capacity };
        self.ledger.wal_append(&event).await?;
        self.notify.send(room_id, &event);
        Ok(())
    }

    /// Journal snapshot: room registrations first, then the booking arena.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .directory
            .room_ids()
            .into_iter()
            .filter_map(|id| {
                self.directory
                    .capacity(&id)
                    .map(|capacity| Event::RoomRegistered { id, capacity })
            })
            .collect();
        events.extend(self.ledger.snapshot_events());
        events
    }
}

/// Background task that rewrites a hotel's journal once enough appends have
/// accumulated since the last compaction.
pub async fn run_compactor(hotel: Arc<Hotel>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let Some(appends) = hotel.ledger.appends_since_compact().await else {
            return; // WAL writer gone — hotel is shutting down
        };
        if appends < threshold {
            continue;
        }
        let snapshot = hotel.snapshot_events();
        // A booking landing between the snapshot and the swap makes the
        // writer refuse; the next tick picks it up.
        match hotel.ledger.compact(snapshot, appends).await {
            Ok(()) => tracing::info!("journal compacted after {appends} appends"),
            Err(e) => tracing::debug!("journal compaction deferred: {e}"),
        }
    }
}

/// Manages per-hotel state. Hotel = the name presented at connection time.
pub struct HotelManager {
    hotels: DashMap<String, Arc<Hotel>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl HotelManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            hotels: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily open the named hotel.
    pub fn get_or_create(&self, name: &str) -> std::io::Result<Arc<Hotel>> {
        if name.len() > MAX_HOTEL_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "hotel name too long",
            ));
        }

        // Sanitize the name to prevent path traversal. The map is keyed by
        // the sanitized name too: names that collapse to the same file must
        // share one Hotel, or two writers would interleave on one journal.
        let safe_name: String = name
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty hotel name",
            ));
        }

        if let Some(hotel) = self.hotels.get(&safe_name) {
            return Ok(hotel.value().clone());
        }
        if self.hotels.len() >= MAX_HOTELS {
            return Err(std::io::Error::other("too many hotels"));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let hotel = Arc::new(Hotel::open(wal_path)?);

        let compactor_hotel = hotel.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            run_compactor(compactor_hotel, threshold).await;
        });

        self.hotels.insert(safe_name, hotel.clone());
        metrics::gauge!(crate::observability::HOTELS_ACTIVE).set(self.hotels.len() as f64);
        Ok(hotel)
    }
}
