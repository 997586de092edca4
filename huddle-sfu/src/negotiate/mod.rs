//! Negotiation operations
//!
//! Each operation resolves the room and the requesting peer, makes its
//! engine call without holding the room lock, then registers the result
//! under the peer. If the peer or its transport vanished during the call the
//! fresh engine object is closed before returning, so nothing is orphaned.

mod consumer;
mod producer;
mod transport;

pub use consumer::ConsumerInfo;
pub use producer::ProducerInfo;
pub use transport::TransportInfo;

use crate::error::SfuError;
use crate::types::{PeerId, RoomId};

fn peer_not_found(room_id: &RoomId, peer_id: &PeerId) -> SfuError {
    SfuError::PeerNotFound {
        room_id: room_id.clone(),
        peer_id: peer_id.clone(),
    }
}
