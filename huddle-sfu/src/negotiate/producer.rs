use super::peer_not_found;
use crate::cleanup;
use crate::error::{Result, SfuError};
use crate::manager::SfuManager;
use crate::notify::{NewProducer, Notification};
use crate::peer::ProducerEntry;
use crate::rtp::RtpParameters;
use crate::types::{MediaKind, PeerId, ProducerId, RoomId, TransportDirection, TransportId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerInfo {
    pub id: ProducerId,
}

impl SfuManager {
    /// Publish a track on the peer's SEND transport and announce it to every
    /// other peer in the room.
    ///
    /// The announcement is sent only once the producer is registered, so a
    /// peer reacting to it with `consume` always finds the producer.
    pub async fn produce(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerInfo> {
        let room = self.room(room_id)?;
        let transport = room
            .with_peer(peer_id, |peer| {
                peer.transport(transport_id)
                    .filter(|entry| entry.direction == TransportDirection::Send)
                    .map(|entry| Arc::clone(&entry.handle))
            })
            .ok_or_else(|| peer_not_found(room_id, peer_id))?
            .ok_or_else(|| SfuError::TransportNotFound(transport_id.clone()))?;

        let producer = self.engine_call(transport.produce(kind, rtp_parameters)).await?;
        let producer_id = producer.id();
        let signal = producer.closed();

        let registered = room.with_peer_mut(peer_id, |peer| {
            peer.transport(transport_id)?;
            let guard = peer.guard();
            peer.insert_producer(ProducerEntry::new(
                Arc::clone(&producer),
                transport_id.clone(),
                guard.clone(),
            ));
            Some(guard)
        });
        let guard = match registered {
            Some(Some(guard)) => guard,
            Some(None) => {
                producer.close();
                return Err(SfuError::TransportNotFound(transport_id.clone()));
            }
            None => {
                producer.close();
                return Err(peer_not_found(room_id, peer_id));
            }
        };

        cleanup::watch_producer(&room, peer_id.clone(), producer_id.clone(), signal, guard);

        let notified = room.broadcast_except(
            peer_id,
            &Notification::NewProducer(NewProducer {
                producer_id: producer_id.clone(),
                peer_id: peer_id.clone(),
                kind,
            }),
        );

        info!(
            room_id = %room_id,
            peer_id = %peer_id,
            producer_id = %producer_id,
            %kind,
            notified,
            "Producer created"
        );
        Ok(ProducerInfo { id: producer_id })
    }
}
