//! Room manager: creates, lists, and routes connections to rooms.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use raceway_protocol::{RoomId, RoomListEntry};
use raceway_transport::{Connection, ConnectionId};

use crate::clock::{Clock, SystemClock};
use crate::handle::spawn_room;
use crate::store::SettingsStore;
use crate::{Room, RoomConfig, RoomError, RoomHandle, RoomInfo};

/// Counter for generating unique room IDs.
static NEXT_ROOM_ID: AtomicU64 = AtomicU64::new(1);

/// Every room running in this process.
///
/// Rooms share nothing with each other; the manager only creates them,
/// lists them, and hands connections to the right one.
pub struct RoomManager {
    rooms: HashMap<RoomId, RoomHandle>,
    clock: Arc<dyn Clock>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// A manager whose rooms all read time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: HashMap::new(),
            clock,
        }
    }

    /// Creates and starts a room. If `store` is given, the room loads its
    /// settings from it and saves every change back.
    pub fn create_room(
        &mut self,
        config: RoomConfig,
        store: Option<Box<dyn SettingsStore>>,
    ) -> RoomId {
        let room_id = RoomId(NEXT_ROOM_ID.fetch_add(1, Ordering::Relaxed));
        let name = config.name.clone();
        let mut room = Room::new(room_id, config).with_clock(Arc::clone(&self.clock));
        if let Some(store) = store {
            room = room.with_store(store);
        }
        self.rooms.insert(room_id, spawn_room(room));
        tracing::info!(%room_id, %name, "room created");
        room_id
    }

    /// Visible rooms, ordered by id.
    pub fn list_rooms(&self) -> Vec<RoomListEntry> {
        let mut entries: Vec<RoomListEntry> = self
            .rooms
            .values()
            .map(RoomHandle::info)
            .filter(|info| info.visible)
            .map(|info| info.to_list_entry())
            .collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    pub fn room_info(&self, room_id: RoomId) -> Result<RoomInfo, RoomError> {
        self.rooms
            .get(&room_id)
            .map(RoomHandle::info)
            .ok_or(RoomError::NotFound(room_id))
    }

    /// Admits a new connection into a room.
    pub fn attach<C: Connection>(
        &self,
        room_id: RoomId,
        conn: C,
    ) -> Result<ConnectionId, RoomError> {
        self.rooms
            .get(&room_id)
            .ok_or(RoomError::NotFound(room_id))?
            .attach(conn)
    }

    /// Disposes a room and forgets it.
    pub async fn destroy_room(&mut self, room_id: RoomId) -> Result<(), RoomError> {
        let handle = self
            .rooms
            .remove(&room_id)
            .ok_or(RoomError::NotFound(room_id))?;
        let _ = handle.shutdown().await;
        tracing::info!(%room_id, "room destroyed");
        Ok(())
    }

    /// Disposes every room, all at once.
    pub async fn shutdown_all(&mut self) {
        let handles: Vec<RoomHandle> = self.rooms.drain().map(|(_, h)| h).collect();
        let count = handles.len();
        let shutdowns = handles.iter().map(RoomHandle::shutdown);
        futures_util::future::join_all(shutdowns).await;
        tracing::info!(rooms = count, "all rooms shut down");
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
