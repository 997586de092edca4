//! Huddle SFU signaling core
//!
//! Session state machine of a multi-party conference: the registry of rooms,
//! peers, transports, producers and consumers, and the negotiation steps
//! that drive a media engine (capabilities → transport → connect →
//! produce/consume → resume). The engine does the actual forwarding and is
//! reached through the traits in [`engine`].
//!
//! ## Architecture
//!
//! - **`SessionRegistry`**: room key → room, with single router creation per key
//! - **`Room`**: one engine router plus its peers, behind a per-room lock
//! - **`Peer`**: one connection's transports, producers and consumers
//! - **`SfuManager`**: membership and the negotiation operations
//! - **`LocalEngine`**: in-process engine used by the server and the tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use huddle_sfu::{LocalEngine, SfuConfig, SfuManager, WorkerSettings};
//!
//! let engine = LocalEngine::new(WorkerSettings::default())?;
//! let sfu = SfuManager::new(Arc::new(engine), SfuConfig::default());
//!
//! sfu.join(&room_id, &peer_id, notifier).await?;
//! let caps = sfu.rtp_capabilities(&room_id)?;
//! let transport = sfu.create_transport(&room_id, &peer_id, TransportDirection::Send).await?;
//! ```

mod cleanup;
mod config;
pub mod engine;
mod error;
mod manager;
mod negotiate;
mod notify;
mod peer;
mod registry;
mod room;
pub mod rtp;
mod types;

pub use config::SfuConfig;
pub use engine::{EngineError, LocalEngine, MediaEngine, WorkerSettings};
pub use error::{Result, SfuError};
pub use manager::{ManagerStats, SfuManager};
pub use negotiate::{ConsumerInfo, ProducerInfo, TransportInfo};
pub use notify::{
    NewProducer, Notification, NotificationReceiver, NotificationSender, ProducerClosed,
};
pub use peer::{
    ConsumerSnapshot, ConsumerState, Peer, PeerSnapshot, PeerStats, ProducerSnapshot,
    TransportSnapshot, TransportState,
};
pub use registry::SessionRegistry;
pub use room::{Room, RoomStats};
pub use types::{
    ConsumerId, MediaKind, PeerId, ProducerId, RoomId, RouterId, TransportDirection, TransportId,
};
