use super::peer_not_found;
use crate::cleanup;
use crate::engine::WebRtcTransport;
use crate::error::{Result, SfuError};
use crate::manager::SfuManager;
use crate::peer::{TransportEntry, TransportState};
use crate::rtp::{DtlsParameters, IceCandidate, IceParameters, SctpParameters};
use crate::types::{PeerId, RoomId, TransportDirection, TransportId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Handshake material returned to the peer that created a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportInfo {
    pub id: TransportId,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp_parameters: Option<SctpParameters>,
}

impl From<&dyn WebRtcTransport> for TransportInfo {
    fn from(transport: &dyn WebRtcTransport) -> Self {
        Self {
            id: transport.id(),
            ice_parameters: transport.ice_parameters(),
            ice_candidates: transport.ice_candidates(),
            dtls_parameters: transport.dtls_parameters(),
            sctp_parameters: transport.sctp_parameters(),
        }
    }
}

impl SfuManager {
    /// Create the peer's transport for `direction`. A transport previously
    /// created for the same direction is closed and replaced.
    pub async fn create_transport(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        direction: TransportDirection,
    ) -> Result<TransportInfo> {
        let room = self.room(room_id)?;
        if !room.contains_peer(peer_id) {
            return Err(peer_not_found(room_id, peer_id));
        }

        let transport = self
            .engine_call(room.router().create_webrtc_transport(self.config.transport_options()))
            .await?;
        let transport_id = transport.id();
        let signal = transport.closed();

        let registered = room.with_peer_mut(peer_id, |peer| {
            let guard = peer.guard();
            let entry = TransportEntry::new(Arc::clone(&transport), direction, guard.clone());
            let replaced = peer.insert_transport(transport_id.clone(), entry);
            (guard, replaced)
        });
        let Some((guard, replaced)) = registered else {
            transport.close();
            return Err(peer_not_found(room_id, peer_id));
        };
        if let Some(old) = replaced {
            old.close();
        }

        cleanup::watch_transport(&room, peer_id.clone(), transport_id.clone(), signal, guard);

        info!(
            room_id = %room_id,
            peer_id = %peer_id,
            transport_id = %transport_id,
            %direction,
            "Transport created"
        );
        Ok(TransportInfo::from(&*transport))
    }

    /// Complete the DTLS handshake of one of the peer's transports.
    ///
    /// The transport must be the peer's transport for `direction`.
    /// Repeating the call with the same parameters succeeds.
    pub async fn connect_transport(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        direction: TransportDirection,
        transport_id: &TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<()> {
        let room = self.room(room_id)?;
        let transport = room
            .with_peer(peer_id, |peer| {
                peer.transport(transport_id)
                    .filter(|entry| entry.direction == direction)
                    .map(|entry| Arc::clone(&entry.handle))
            })
            .ok_or_else(|| peer_not_found(room_id, peer_id))?
            .ok_or_else(|| SfuError::TransportNotFound(transport_id.clone()))?;

        self.engine_call(transport.connect(dtls_parameters)).await?;

        room.with_peer_mut(peer_id, |peer| {
            peer.set_transport_state(transport_id, TransportState::Connected);
        });

        info!(
            room_id = %room_id,
            peer_id = %peer_id,
            transport_id = %transport_id,
            %direction,
            "Transport connected"
        );
        Ok(())
    }
}
