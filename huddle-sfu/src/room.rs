//! SFU Room management
//!
//! A room pairs one engine router with the peers that joined it. All
//! mutable room state lives behind a single synchronous lock which is never
//! held across an `.await`; engine calls are made outside it and their
//! results registered afterwards.

use crate::engine::Router;
use crate::notify::Notification;
use crate::peer::{Peer, PeerSnapshot};
use crate::rtp::RtpCapabilities;
use crate::types::{PeerId, RoomId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome of admitting a peer into a room
pub(crate) enum Admission {
    /// Registered; carries the record it replaced on re-join
    Joined(Option<Peer>),
    /// The room is shutting down, look it up again
    Closed,
    Full,
}

#[derive(Default)]
struct RoomState {
    peers: HashMap<PeerId, Peer>,
    closed: bool,
}

pub struct Room {
    pub id: RoomId,
    router: Arc<dyn Router>,
    state: Mutex<RoomState>,
    token: CancellationToken,
}

impl Room {
    pub(crate) fn new(id: RoomId, router: Arc<dyn Router>) -> Self {
        Self {
            id,
            router,
            state: Mutex::new(RoomState::default()),
            token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn router(&self) -> &Arc<dyn Router> {
        &self.router
    }

    #[must_use]
    pub fn rtp_capabilities(&self) -> RtpCapabilities {
        self.router.rtp_capabilities()
    }

    pub(crate) fn peer_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Register `peer`, replacing an existing record with the same id.
    /// `max_peers == 0` disables the limit.
    pub(crate) fn admit(&self, peer: Peer, max_peers: usize) -> Admission {
        let mut state = self.state.lock();
        if state.closed {
            return Admission::Closed;
        }
        if max_peers > 0 && !state.peers.contains_key(&peer.id) && state.peers.len() >= max_peers {
            return Admission::Full;
        }
        Admission::Joined(state.peers.insert(peer.id.clone(), peer))
    }

    pub(crate) fn remove_peer(&self, peer_id: &PeerId) -> Option<Peer> {
        self.state.lock().peers.remove(peer_id)
    }

    pub(crate) fn with_peer<R>(&self, peer_id: &PeerId, f: impl FnOnce(&Peer) -> R) -> Option<R> {
        self.state.lock().peers.get(peer_id).map(f)
    }

    pub(crate) fn with_peer_mut<R>(
        &self,
        peer_id: &PeerId,
        f: impl FnOnce(&mut Peer) -> R,
    ) -> Option<R> {
        self.state.lock().peers.get_mut(peer_id).map(f)
    }

    /// Send `notification` to every peer except `except`. Returns the number
    /// of peers addressed.
    pub(crate) fn broadcast_except(&self, except: &PeerId, notification: &Notification) -> usize {
        let state = self.state.lock();
        let mut sent = 0;
        for peer in state.peers.values().filter(|peer| peer.id != *except) {
            peer.notify(notification.clone());
            sent += 1;
        }
        sent
    }

    /// Mark the room closed if nobody is in it. Once closed, no peer can be
    /// admitted any more.
    pub(crate) fn close_if_empty(&self) -> bool {
        let mut state = self.state.lock();
        if state.peers.is_empty() {
            state.closed = true;
        }
        state.closed
    }

    /// Close the room: detach all watchers and close the router, which
    /// closes everything created on it.
    pub(crate) fn close(&self) {
        let peers: Vec<Peer> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.peers.drain().map(|(_, peer)| peer).collect()
        };
        self.token.cancel();
        for peer in peers {
            drop(peer.teardown());
        }
        self.router.close();
        debug!(room_id = %self.id, "Room closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    #[must_use]
    pub fn contains_peer(&self, peer_id: &PeerId) -> bool {
        self.state.lock().peers.contains_key(peer_id)
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    #[must_use]
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<_> = self.state.lock().peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn peer_snapshot(&self, peer_id: &PeerId) -> Option<PeerSnapshot> {
        self.with_peer(peer_id, Peer::snapshot)
    }

    #[must_use]
    pub fn get_stats(&self) -> RoomStats {
        let state = self.state.lock();
        let mut stats = RoomStats {
            peer_count: state.peers.len(),
            ..Default::default()
        };
        for peer in state.peers.values() {
            let peer_stats = peer.stats();
            stats.transport_count += peer_stats.transports;
            stats.producer_count += peer_stats.producers;
            stats.consumer_count += peer_stats.consumers;
        }
        stats
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoomStats {
    pub peer_count: usize,
    pub transport_count: usize,
    pub producer_count: usize,
    pub consumer_count: usize,
}
