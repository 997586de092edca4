//! Close watchers
//!
//! One task per registered transport, producer and consumer. Each waits for
//! the engine's close signal or for its subscription guard to be cancelled,
//! whichever comes first. Only the engine signal prunes the registry; a
//! cancelled guard means the entry was already removed.

use crate::engine::{CloseReason, CloseSignal};
use crate::notify::{Notification, ProducerClosed};
use crate::room::Room;
use crate::types::{ConsumerId, PeerId, ProducerId, TransportId};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::debug;

async fn closed_or_cancelled(signal: CloseSignal, guard: CancellationToken) -> Option<CloseReason> {
    tokio::select! {
        biased;
        () = guard.cancelled() => None,
        reason = signal.wait() => Some(reason),
    }
}

pub(crate) fn watch_transport(
    room: &Arc<Room>,
    peer_id: PeerId,
    transport_id: TransportId,
    signal: CloseSignal,
    guard: CancellationToken,
) {
    let room: Weak<Room> = Arc::downgrade(room);
    tokio::spawn(async move {
        let Some(reason) = closed_or_cancelled(signal, guard).await else {
            return;
        };
        let Some(room) = room.upgrade() else {
            return;
        };
        if room
            .with_peer_mut(&peer_id, |peer| peer.remove_transport(&transport_id))
            .flatten()
            .is_some()
        {
            debug!(
                room_id = %room.id,
                peer_id = %peer_id,
                transport_id = %transport_id,
                ?reason,
                "Transport closed, removed from peer"
            );
        }
    });
}

pub(crate) fn watch_producer(
    room: &Arc<Room>,
    peer_id: PeerId,
    producer_id: ProducerId,
    signal: CloseSignal,
    guard: CancellationToken,
) {
    let room: Weak<Room> = Arc::downgrade(room);
    tokio::spawn(async move {
        let Some(reason) = closed_or_cancelled(signal, guard).await else {
            return;
        };
        let Some(room) = room.upgrade() else {
            return;
        };
        if room
            .with_peer_mut(&peer_id, |peer| peer.remove_producer(&producer_id))
            .flatten()
            .is_some()
        {
            debug!(
                room_id = %room.id,
                peer_id = %peer_id,
                producer_id = %producer_id,
                ?reason,
                "Producer closed, removed from peer"
            );
        }
    });
}

/// Consumers closed because their producer went away tell their peer about
/// it, once per producer.
pub(crate) fn watch_consumer(
    room: &Arc<Room>,
    peer_id: PeerId,
    consumer_id: ConsumerId,
    signal: CloseSignal,
    guard: CancellationToken,
) {
    let room: Weak<Room> = Arc::downgrade(room);
    tokio::spawn(async move {
        let Some(reason) = closed_or_cancelled(signal, guard).await else {
            return;
        };
        let Some(room) = room.upgrade() else {
            return;
        };

        room.with_peer_mut(&peer_id, |peer| {
            let entry = peer.remove_consumer(&consumer_id)?;
            if reason == CloseReason::ProducerClosed && !peer.has_consumer_of(&entry.producer_id) {
                peer.notify(Notification::ProducerClosed(ProducerClosed {
                    producer_id: entry.producer_id.clone(),
                }));
            }
            debug!(
                peer_id = %peer_id,
                consumer_id = %consumer_id,
                producer_id = %entry.producer_id,
                ?reason,
                "Consumer closed, removed from peer"
            );
            Some(())
        });
    });
}
