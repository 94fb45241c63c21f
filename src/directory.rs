//! Room Directory — the read-only capability the ledger consults for room
//! existence and guest capacity. Room CRUD itself lives outside the ledger;
//! the server binary feeds registrations into the in-memory implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn room_exists(&self, room_id: Ulid) -> bool;

    /// Maximum guests for a room, or None if the room is unknown.
    async fn capacity_of(&self, room_id: Ulid) -> Option<u32>;
}

/// Directory backed by a concurrent map. Writes go through `register`, which
/// only the hotel plumbing calls — the ledger sees the trait.
pub struct InMemoryDirectory {
    rooms: DashMap<Ulid, u32>,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self { rooms: DashMap::new() }
    }

    /// Returns false if the room id was already registered (capacity is not
    /// overwritten — re-registration is a caller mistake, not an update).
    pub fn register(&self, room_id: Ulid, capacity: u32) -> bool {
        if self.rooms.contains_key(&room_id) {
            return false;
        }
        self.rooms.insert(room_id, capacity);
        true
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn room_ids(&self) -> Vec<Ulid> {
        self.rooms.iter().map(|e| *e.key()).collect()
    }

    pub fn capacity(&self, room_id: &Ulid) -> Option<u32> {
        self.rooms.get(room_id).map(|e| *e.value())
    }
}

#[async_trait]
impl RoomDirectory for InMemoryDirectory {
    async fn room_exists(&self, room_id: Ulid) -> bool {
        self.rooms.contains_key(&room_id)
    }

    async fn capacity_of(&self, room_id: Ulid) -> Option<u32> {
        self.rooms.get(&room_id).map(|e| *e.value())
    }
}
