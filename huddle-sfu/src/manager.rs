//! SFU Manager - Top-level orchestration for multi-room signaling state
//!
//! This module provides:
//! - Room membership (join, re-join, leave with teardown)
//! - Resource limit enforcement
//! - Removal of empty rooms and their routers
//! - Bounded engine requests
//!
//! The negotiation operations (transports, producers, consumers) are
//! implemented on [`SfuManager`] in the `negotiate` module.

use crate::config::SfuConfig;
use crate::engine::{with_timeout, EngineResult, MediaEngine};
use crate::error::{Result, SfuError};
use crate::notify::NotificationSender;
use crate::peer::{Peer, PeerSnapshot};
use crate::registry::SessionRegistry;
use crate::room::{Admission, Room, RoomStats};
use crate::rtp::RtpCapabilities;
use crate::types::{PeerId, RoomId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Global SFU manager statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ManagerStats {
    /// Number of active rooms
    pub active_rooms: usize,
    /// Total number of peers across all rooms
    pub total_peers: usize,
    pub total_producers: usize,
    pub total_consumers: usize,
}

/// SFU Manager - owns the session registry and drives the media engine
pub struct SfuManager {
    pub(crate) config: Arc<SfuConfig>,
    registry: SessionRegistry,
    /// Which room each connection is in (single-room membership)
    memberships: DashMap<PeerId, RoomId>,
}

impl SfuManager {
    /// Create a new SFU manager on top of a media engine worker
    pub fn new(engine: Arc<dyn MediaEngine>, config: SfuConfig) -> Arc<Self> {
        let registry = SessionRegistry::new(engine, config.max_rooms, config.request_timeout());

        info!(
            max_rooms = config.max_rooms,
            max_peers_per_room = config.max_peers_per_room,
            request_timeout_ms = config.request_timeout_ms,
            "SFU Manager initialized"
        );

        Arc::new(Self {
            config: Arc::new(config),
            registry,
            memberships: DashMap::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &SfuConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Run an engine request under the configured timeout
    pub(crate) async fn engine_call<T>(
        &self,
        request: impl Future<Output = EngineResult<T>>,
    ) -> Result<T> {
        Ok(with_timeout(self.config.request_timeout(), request).await?)
    }

    pub(crate) fn room(&self, room_id: &RoomId) -> Result<Arc<Room>> {
        self.registry
            .get_room(room_id)
            .ok_or_else(|| SfuError::RoomNotFound(room_id.clone()))
    }

    /// Join `peer_id` to `room_id`, creating the room on first use.
    ///
    /// A connection is a member of one room at a time: joining another room
    /// leaves the previous one first. Re-joining the same room replaces the
    /// peer record and closes every resource the old record held.
    pub async fn join(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        notifier: NotificationSender,
    ) -> Result<()> {
        let previous = self.memberships.get(peer_id).map(|entry| entry.value().clone());
        if previous.as_ref().is_some_and(|previous| previous != room_id) {
            self.leave(peer_id);
        }

        loop {
            let room = self.registry.get_or_create_room(room_id).await?;
            let peer = Peer::new(peer_id.clone(), notifier.clone(), room.peer_token());

            match room.admit(peer, self.config.max_peers_per_room) {
                Admission::Joined(replaced) => {
                    // A concurrent join of another room may have landed first
                    let displaced = self.memberships.insert(peer_id.clone(), room_id.clone());
                    if let Some(other) = displaced.filter(|other| other != room_id) {
                        self.remove_from_room(&other, peer_id);
                    }
                    if let Some(old) = replaced {
                        debug!(
                            room_id = %room_id,
                            peer_id = %peer_id,
                            "Peer re-joined, replacing record"
                        );
                        for transport in old.teardown() {
                            transport.close();
                        }
                    }
                    info!(
                        room_id = %room_id,
                        peer_id = %peer_id,
                        peer_count = room.peer_count(),
                        "Added peer to room"
                    );
                    return Ok(());
                }
                Admission::Full => {
                    warn!(
                        room_id = %room_id,
                        max_peers = self.config.max_peers_per_room,
                        "Peer limit reached for room"
                    );
                    return Err(SfuError::RoomFull {
                        room_id: room_id.clone(),
                        max_peers: self.config.max_peers_per_room,
                    });
                }
                Admission::Closed => {
                    debug!(room_id = %room_id, "Room closing during join, retrying");
                }
            }
        }
    }

    /// Tear down everything `peer_id` holds. Returns `false` if the peer was
    /// not in any room.
    pub fn leave(&self, peer_id: &PeerId) -> bool {
        let Some((_, room_id)) = self.memberships.remove(peer_id) else {
            return false;
        };
        self.remove_from_room(&room_id, peer_id)
    }

    /// Drop the peer record from one room, closing its transports and the
    /// room itself once empty
    fn remove_from_room(&self, room_id: &RoomId, peer_id: &PeerId) -> bool {
        let Some(room) = self.registry.get_room(room_id) else {
            return false;
        };
        let Some(peer) = room.remove_peer(peer_id) else {
            return false;
        };

        let transports = peer.teardown();
        let closed = transports.len();
        for transport in transports {
            transport.close();
        }

        info!(
            room_id = %room_id,
            peer_id = %peer_id,
            transports_closed = closed,
            "Removed peer from room"
        );

        self.registry.remove_room_if_empty(&room);
        true
    }

    /// Room the peer is currently a member of
    #[must_use]
    pub fn membership(&self, peer_id: &PeerId) -> Option<RoomId> {
        self.memberships.get(peer_id).map(|entry| entry.value().clone())
    }

    /// Router capabilities of an existing room
    pub fn rtp_capabilities(&self, room_id: &RoomId) -> Result<RtpCapabilities> {
        Ok(self.room(room_id)?.rtp_capabilities())
    }

    #[must_use]
    pub fn peer_snapshot(&self, room_id: &RoomId, peer_id: &PeerId) -> Option<PeerSnapshot> {
        self.registry.get_peer(room_id, peer_id)
    }

    pub fn room_stats(&self, room_id: &RoomId) -> Result<RoomStats> {
        Ok(self.room(room_id)?.get_stats())
    }

    #[must_use]
    pub fn get_stats(&self) -> ManagerStats {
        let mut stats = ManagerStats::default();
        for room_id in self.registry.room_ids() {
            if let Some(room) = self.registry.get_room(&room_id) {
                let room_stats = room.get_stats();
                stats.active_rooms += 1;
                stats.total_peers += room_stats.peer_count;
                stats.total_producers += room_stats.producer_count;
                stats.total_consumers += room_stats.consumer_count;
            }
        }
        stats
    }
}
