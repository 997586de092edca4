use crate::engine::EngineError;
use crate::types::{ConsumerId, PeerId, ProducerId, RoomId, TransportId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SfuError {
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("Peer {peer_id} not found in room {room_id}")]
    PeerNotFound { room_id: RoomId, peer_id: PeerId },

    #[error("Transport not found: {0}")]
    TransportNotFound(TransportId),

    #[error("No {0} transport created")]
    NoTransport(crate::types::TransportDirection),

    #[error("Producer not found: {0}")]
    ProducerNotFound(ProducerId),

    #[error("Consumer not found: {0}")]
    ConsumerNotFound(ConsumerId),

    #[error("Capabilities cannot consume producer {0}")]
    IncompatibleCapabilities(ProducerId),

    #[error("Maximum number of rooms reached ({0})")]
    RoomLimitReached(usize),

    #[error("Room {room_id} is full ({max_peers} peers)")]
    RoomFull { room_id: RoomId, max_peers: usize },

    #[error("Media engine failure: {0}")]
    EngineFailure(#[from] EngineError),
}

impl SfuError {
    /// Stable machine-readable code reported to clients
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::RoomNotFound(_) => "room_not_found",
            Self::PeerNotFound { .. } => "peer_not_found",
            Self::TransportNotFound(_) | Self::NoTransport(_) => "transport_not_found",
            Self::ProducerNotFound(_) => "producer_not_found",
            Self::ConsumerNotFound(_) => "consumer_not_found",
            Self::IncompatibleCapabilities(_) => "incompatible_capabilities",
            Self::RoomLimitReached(_) => "room_limit_reached",
            Self::RoomFull { .. } => "room_full",
            Self::EngineFailure(_) => "engine_failure",
        }
    }
}

pub type Result<T> = std::result::Result<T, SfuError>;
