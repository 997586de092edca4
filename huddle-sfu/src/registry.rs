//! Session registry: room key → room
//!
//! Each key maps to a shared `OnceCell`. The map's shard lock is only held
//! to fetch or insert the cell; router creation runs inside
//! `OnceCell::get_or_try_init`, so concurrent first joins on one key wait
//! for a single creation instead of racing.
//!
//! A cell takes a room slot from the moment it is inserted until it is
//! removed, so creations still in flight count against `max_rooms`.

use crate::engine::{with_timeout, MediaEngine};
use crate::error::{Result, SfuError};
use crate::peer::PeerSnapshot;
use crate::room::Room;
use crate::rtp::media_codecs;
use crate::types::{PeerId, RoomId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

type RoomCell = Arc<OnceCell<Arc<Room>>>;

pub struct SessionRegistry {
    engine: Arc<dyn MediaEngine>,
    rooms: DashMap<RoomId, RoomCell>,
    /// Cells currently in `rooms`, pending or initialized
    slots: AtomicUsize,
    max_rooms: usize,
    request_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(engine: Arc<dyn MediaEngine>, max_rooms: usize, request_timeout: Duration) -> Self {
        Self {
            engine,
            rooms: DashMap::new(),
            slots: AtomicUsize::new(0),
            max_rooms,
            request_timeout,
        }
    }

    fn cell(&self, room_id: &RoomId) -> Result<RoomCell> {
        if let Some(cell) = self.rooms.get(room_id) {
            return Ok(Arc::clone(cell.value()));
        }

        match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                if !self.take_slot() {
                    warn!(room_id = %room_id, max_rooms = self.max_rooms, "Room limit reached");
                    return Err(SfuError::RoomLimitReached(self.max_rooms));
                }
                Ok(Arc::clone(entry.insert(RoomCell::default()).value()))
            }
        }
    }

    /// Reserve a room slot (`max_rooms` 0 = unlimited)
    fn take_slot(&self) -> bool {
        self.slots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |taken| {
                (self.max_rooms == 0 || taken < self.max_rooms).then_some(taken + 1)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        self.slots.fetch_sub(1, Ordering::SeqCst);
    }

    fn is_current(&self, room_id: &RoomId, cell: &RoomCell) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), cell))
    }

    async fn create_room(&self, room_id: &RoomId) -> Result<Arc<Room>> {
        let router =
            with_timeout(self.request_timeout, self.engine.create_router(media_codecs())).await?;
        info!(room_id = %room_id, router_id = %router.id(), "Created new room");
        Ok(Arc::new(Room::new(room_id.clone(), router)))
    }

    /// Return the room for `room_id`, creating it (and its router) on first
    /// use. Concurrent callers for the same key observe the same room.
    pub async fn get_or_create_room(&self, room_id: &RoomId) -> Result<Arc<Room>> {
        loop {
            let cell = self.cell(room_id)?;

            match cell.get_or_try_init(|| self.create_room(room_id)).await {
                Ok(room) => {
                    let room = Arc::clone(room);
                    if self.is_current(room_id, &cell) {
                        return Ok(room);
                    }
                    // The cell was discarded while we initialized it.
                    room.close();
                }
                Err(err) => {
                    let removed = self.rooms.remove_if(room_id, |_, current| {
                        Arc::ptr_eq(current, &cell) && !current.initialized()
                    });
                    if removed.is_some() {
                        self.release_slot();
                    }
                    return Err(err);
                }
            }
        }
    }

    #[must_use]
    pub fn get_room(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms
            .get(room_id)
            .and_then(|cell| cell.get().cloned())
    }

    #[must_use]
    pub fn get_peer(&self, room_id: &RoomId, peer_id: &PeerId) -> Option<PeerSnapshot> {
        self.get_room(room_id)?.peer_snapshot(peer_id)
    }

    /// Remove `room` if no peer is left in it, and close its router.
    /// Returns whether the room was removed.
    pub fn remove_room_if_empty(&self, room: &Arc<Room>) -> bool {
        let removed = self
            .rooms
            .remove_if(&room.id, |_, cell| {
                cell.get()
                    .is_some_and(|current| Arc::ptr_eq(current, room) && current.close_if_empty())
            })
            .is_some();

        if removed {
            self.release_slot();
            room.close();
            info!(room_id = %room.id, total_rooms = self.rooms.len(), "Removed empty room");
        }
        removed
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.iter().filter(|cell| cell.initialized()).count()
    }

    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<_> = self
            .rooms
            .iter()
            .filter(|cell| cell.initialized())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }
}
