//! Server-initiated notifications delivered to peers

use crate::types::{MediaKind, PeerId, ProducerId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A producer became available in the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProducer {
    pub producer_id: ProducerId,
    pub peer_id: PeerId,
    pub kind: MediaKind,
}

/// A producer this peer was consuming has gone away
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerClosed {
    pub producer_id: ProducerId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    NewProducer(NewProducer),
    ProducerClosed(ProducerClosed),
}

impl Notification {
    /// Event name used on the wire
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::NewProducer(_) => "new-producer",
            Self::ProducerClosed(_) => "producer-closed",
        }
    }

    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::NewProducer(n) => serde_json::to_value(n),
            Self::ProducerClosed(n) => serde_json::to_value(n),
        }
    }
}

/// Per-peer outbound channel. Unbounded so the registry never blocks on a
/// slow connection while holding room state.
pub type NotificationSender = mpsc::UnboundedSender<Notification>;
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;
