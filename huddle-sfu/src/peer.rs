//! SFU Peer management
//!
//! A [`Peer`] is the registry record of one signaling connection inside a
//! room. It owns the engine handles of that connection's transports,
//! producers and consumers; nothing outside the peer can reach them.
//!
//! Every entry carries a subscription guard (a child of the peer's
//! cancellation token). Removing the entry cancels the guard, which detaches
//! the close watcher spawned for it.

use crate::engine::{Consumer, Producer, WebRtcTransport};
use crate::notify::{Notification, NotificationSender};
use crate::types::{
    ConsumerId, MediaKind, PeerId, ProducerId, TransportDirection, TransportId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    New,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerState {
    /// Created, no media flows until resumed
    Paused,
    Active,
}

pub(crate) struct TransportEntry {
    pub handle: Arc<dyn WebRtcTransport>,
    pub direction: TransportDirection,
    pub state: TransportState,
    guard: CancellationToken,
}

impl TransportEntry {
    pub fn new(
        handle: Arc<dyn WebRtcTransport>,
        direction: TransportDirection,
        guard: CancellationToken,
    ) -> Self {
        Self {
            handle,
            direction,
            state: TransportState::New,
            guard,
        }
    }
}

pub(crate) struct ProducerEntry {
    pub handle: Arc<dyn Producer>,
    pub transport_id: TransportId,
    pub kind: MediaKind,
    guard: CancellationToken,
}

impl ProducerEntry {
    pub fn new(
        handle: Arc<dyn Producer>,
        transport_id: TransportId,
        guard: CancellationToken,
    ) -> Self {
        Self {
            kind: handle.kind(),
            handle,
            transport_id,
            guard,
        }
    }
}

pub(crate) struct ConsumerEntry {
    pub handle: Arc<dyn Consumer>,
    pub transport_id: TransportId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub state: ConsumerState,
    guard: CancellationToken,
}

impl ConsumerEntry {
    pub fn new(
        handle: Arc<dyn Consumer>,
        transport_id: TransportId,
        guard: CancellationToken,
    ) -> Self {
        Self {
            producer_id: handle.producer_id(),
            kind: handle.kind(),
            handle,
            transport_id,
            state: ConsumerState::Paused,
            guard,
        }
    }
}

/// Registry record of one connection inside a room
pub struct Peer {
    pub id: PeerId,
    notifier: NotificationSender,
    token: CancellationToken,
    send_transport: Option<TransportId>,
    recv_transport: Option<TransportId>,
    transports: HashMap<TransportId, TransportEntry>,
    producers: HashMap<ProducerId, ProducerEntry>,
    consumers: HashMap<ConsumerId, ConsumerEntry>,
}

impl Peer {
    pub(crate) fn new(id: PeerId, notifier: NotificationSender, token: CancellationToken) -> Self {
        Self {
            id,
            notifier,
            token,
            send_transport: None,
            recv_transport: None,
            transports: HashMap::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
        }
    }

    /// New subscription guard scoped to this peer
    pub(crate) fn guard(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Queue a notification for this peer. A gone connection is not an error.
    pub(crate) fn notify(&self, notification: Notification) {
        if self.notifier.send(notification).is_err() {
            debug!(peer_id = %self.id, "Notification dropped, connection gone");
        }
    }

    pub(crate) fn transport(&self, id: &TransportId) -> Option<&TransportEntry> {
        self.transports.get(id)
    }

    /// The transport currently used for `direction`
    pub(crate) fn transport_for(&self, direction: TransportDirection) -> Option<&TransportEntry> {
        let id = match direction {
            TransportDirection::Send => self.send_transport.as_ref(),
            TransportDirection::Recv => self.recv_transport.as_ref(),
        }?;
        self.transports.get(id)
    }

    /// Register a transport as the peer's transport for its direction.
    ///
    /// Returns the engine handle of the transport it replaces, already
    /// detached from the record; the caller closes it outside the room lock.
    pub(crate) fn insert_transport(
        &mut self,
        id: TransportId,
        entry: TransportEntry,
    ) -> Option<Arc<dyn WebRtcTransport>> {
        let slot = match entry.direction {
            TransportDirection::Send => &mut self.send_transport,
            TransportDirection::Recv => &mut self.recv_transport,
        };
        let previous = slot.replace(id.clone());
        self.transports.insert(id, entry);

        previous
            .and_then(|old| self.remove_transport(&old))
            .map(|old| old.handle)
    }

    pub(crate) fn set_transport_state(&mut self, id: &TransportId, state: TransportState) {
        if let Some(entry) = self.transports.get_mut(id) {
            entry.state = state;
        }
    }

    /// Remove a transport together with the producers and consumers created
    /// on it. All their guards are cancelled.
    pub(crate) fn remove_transport(&mut self, id: &TransportId) -> Option<TransportEntry> {
        let entry = self.transports.remove(id)?;
        entry.guard.cancel();

        if self.send_transport.as_ref() == Some(id) {
            self.send_transport = None;
        }
        if self.recv_transport.as_ref() == Some(id) {
            self.recv_transport = None;
        }

        self.producers.retain(|_, producer| {
            let keep = producer.transport_id != *id;
            if !keep {
                producer.guard.cancel();
            }
            keep
        });
        self.consumers.retain(|_, consumer| {
            let keep = consumer.transport_id != *id;
            if !keep {
                consumer.guard.cancel();
            }
            keep
        });

        Some(entry)
    }

    pub(crate) fn insert_producer(&mut self, entry: ProducerEntry) {
        self.producers.insert(entry.handle.id(), entry);
    }

    pub(crate) fn remove_producer(&mut self, id: &ProducerId) -> Option<ProducerEntry> {
        let entry = self.producers.remove(id)?;
        entry.guard.cancel();
        Some(entry)
    }

    pub(crate) fn consumer(&self, id: &ConsumerId) -> Option<&ConsumerEntry> {
        self.consumers.get(id)
    }

    pub(crate) fn insert_consumer(&mut self, entry: ConsumerEntry) {
        self.consumers.insert(entry.handle.id(), entry);
    }

    pub(crate) fn set_consumer_state(&mut self, id: &ConsumerId, state: ConsumerState) {
        if let Some(entry) = self.consumers.get_mut(id) {
            entry.state = state;
        }
    }

    pub(crate) fn remove_consumer(&mut self, id: &ConsumerId) -> Option<ConsumerEntry> {
        let entry = self.consumers.remove(id)?;
        entry.guard.cancel();
        Some(entry)
    }

    /// Whether any remaining consumer of this peer is bound to `producer_id`
    pub(crate) fn has_consumer_of(&self, producer_id: &ProducerId) -> bool {
        self.consumers
            .values()
            .any(|consumer| consumer.producer_id == *producer_id)
    }

    /// Detach every watcher and hand back the transports to close.
    ///
    /// Producers and consumers live on those transports, so closing the
    /// transports releases everything the peer owned on the engine.
    pub(crate) fn teardown(self) -> Vec<Arc<dyn WebRtcTransport>> {
        self.token.cancel();
        self.transports
            .into_values()
            .map(|entry| entry.handle)
            .collect()
    }

    #[must_use]
    pub fn snapshot(&self) -> PeerSnapshot {
        let mut transports: Vec<_> = self
            .transports
            .iter()
            .map(|(id, entry)| TransportSnapshot {
                id: id.clone(),
                direction: entry.direction,
                state: entry.state,
            })
            .collect();
        transports.sort_by(|a, b| a.id.cmp(&b.id));

        let mut producers: Vec<_> = self
            .producers
            .iter()
            .map(|(id, entry)| ProducerSnapshot {
                id: id.clone(),
                kind: entry.kind,
                transport_id: entry.transport_id.clone(),
            })
            .collect();
        producers.sort_by(|a, b| a.id.cmp(&b.id));

        let mut consumers: Vec<_> = self
            .consumers
            .iter()
            .map(|(id, entry)| ConsumerSnapshot {
                id: id.clone(),
                producer_id: entry.producer_id.clone(),
                kind: entry.kind,
                state: entry.state,
                transport_id: entry.transport_id.clone(),
            })
            .collect();
        consumers.sort_by(|a, b| a.id.cmp(&b.id));

        PeerSnapshot {
            id: self.id.clone(),
            send_transport: self.send_transport.clone(),
            recv_transport: self.recv_transport.clone(),
            transports,
            producers,
            consumers,
        }
    }

    #[must_use]
    pub fn stats(&self) -> PeerStats {
        PeerStats {
            transports: self.transports.len(),
            producers: self.producers.len(),
            consumers: self.consumers.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportSnapshot {
    pub id: TransportId,
    pub direction: TransportDirection,
    pub state: TransportState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerSnapshot {
    pub id: ProducerId,
    pub kind: MediaKind,
    pub transport_id: TransportId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSnapshot {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub state: ConsumerState,
    pub transport_id: TransportId,
}

/// Read-only view of a peer record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub send_transport: Option<TransportId>,
    pub recv_transport: Option<TransportId>,
    pub transports: Vec<TransportSnapshot>,
    pub producers: Vec<ProducerSnapshot>,
    pub consumers: Vec<ConsumerSnapshot>,
}

impl PeerSnapshot {
    #[must_use]
    pub fn consumer(&self, id: &ConsumerId) -> Option<&ConsumerSnapshot> {
        self.consumers.iter().find(|c| c.id == *id)
    }
}

/// Peer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStats {
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}
