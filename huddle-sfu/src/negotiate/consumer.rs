use super::peer_not_found;
use crate::cleanup;
use crate::error::{Result, SfuError};
use crate::manager::SfuManager;
use crate::peer::{ConsumerEntry, ConsumerState};
use crate::rtp::{RtpCapabilities, RtpParameters};
use crate::types::{ConsumerId, MediaKind, PeerId, ProducerId, RoomId, TransportDirection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// What a peer needs to wire its receive pipeline for a consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerInfo {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

impl SfuManager {
    /// Subscribe the peer to `producer_id` on its RECV transport.
    ///
    /// The consumer always starts paused; [`SfuManager::resume_consumer`]
    /// is the only way to let media flow.
    pub async fn consume(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        producer_id: &ProducerId,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumerInfo> {
        let room = self.room(room_id)?;
        let transport = room
            .with_peer(peer_id, |peer| {
                peer.transport_for(TransportDirection::Recv)
                    .map(|entry| Arc::clone(&entry.handle))
            })
            .ok_or_else(|| peer_not_found(room_id, peer_id))?;

        let router = room.router();
        if !router.has_producer(producer_id) {
            return Err(SfuError::ProducerNotFound(producer_id.clone()));
        }
        if !router.can_consume(producer_id, &rtp_capabilities) {
            return Err(SfuError::IncompatibleCapabilities(producer_id.clone()));
        }
        let transport = transport.ok_or(SfuError::NoTransport(TransportDirection::Recv))?;
        let transport_id = transport.id();

        let consumer = self
            .engine_call(transport.consume(producer_id.clone(), rtp_capabilities, true))
            .await?;
        let consumer_id = consumer.id();
        let signal = consumer.closed();

        let registered = room.with_peer_mut(peer_id, |peer| {
            peer.transport(&transport_id)?;
            let guard = peer.guard();
            peer.insert_consumer(ConsumerEntry::new(
                Arc::clone(&consumer),
                transport_id.clone(),
                guard.clone(),
            ));
            Some(guard)
        });
        let guard = match registered {
            Some(Some(guard)) => guard,
            Some(None) => {
                consumer.close();
                return Err(SfuError::NoTransport(TransportDirection::Recv));
            }
            None => {
                consumer.close();
                return Err(peer_not_found(room_id, peer_id));
            }
        };

        cleanup::watch_consumer(&room, peer_id.clone(), consumer_id.clone(), signal, guard);

        info!(
            room_id = %room_id,
            peer_id = %peer_id,
            consumer_id = %consumer_id,
            producer_id = %producer_id,
            "Consumer created (paused)"
        );
        Ok(ConsumerInfo {
            id: consumer_id,
            producer_id: consumer.producer_id(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
        })
    }

    /// Let media flow on a paused consumer
    pub async fn resume_consumer(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        consumer_id: &ConsumerId,
    ) -> Result<()> {
        let room = self.room(room_id)?;
        let consumer = room
            .with_peer(peer_id, |peer| {
                peer.consumer(consumer_id).map(|entry| Arc::clone(&entry.handle))
            })
            .ok_or_else(|| peer_not_found(room_id, peer_id))?
            .ok_or_else(|| SfuError::ConsumerNotFound(consumer_id.clone()))?;

        self.engine_call(consumer.resume()).await?;

        room.with_peer_mut(peer_id, |peer| {
            peer.set_consumer_state(consumer_id, ConsumerState::Active);
        });

        info!(
            room_id = %room_id,
            peer_id = %peer_id,
            consumer_id = %consumer_id,
            "Consumer resumed"
        );
        Ok(())
    }
}
