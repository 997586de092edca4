//! Media engine boundary
//!
//! The signaling plane never touches RTP. It drives an engine through the
//! handle traits below: a router per room, WebRTC transports on routers, and
//! producers/consumers on transports. Every handle exposes a [`CloseSignal`]
//! so the registry can prune itself when the engine closes something.

mod local;

pub use local::{LocalEngine, WorkerSettings};

use crate::rtp::{
    DtlsParameters, IceCandidate, IceParameters, RtpCapabilities, RtpCodecCapability,
    RtpParameters, SctpParameters,
};
use crate::types::{ConsumerId, MediaKind, ProducerId, RouterId, TransportId};
use async_trait::async_trait;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No free RTC port in range {min}-{max}")]
    PortsExhausted { min: u16, max: u16 },

    #[error("Router closed: {0}")]
    RouterClosed(RouterId),

    #[error("Transport closed: {0}")]
    TransportClosed(TransportId),

    #[error("Producer closed or unknown: {0}")]
    ProducerClosed(ProducerId),

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Engine request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Engine error: {0}")]
    Other(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Bound an engine request. Expiry fails only this request.
pub async fn with_timeout<T>(
    limit: Duration,
    request: impl Future<Output = EngineResult<T>>,
) -> EngineResult<T> {
    tokio::time::timeout(limit, request)
        .await
        .unwrap_or(Err(EngineError::Timeout(limit)))
}

/// Why an engine object was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed directly
    Closed,
    /// The transport it lived on was closed
    TransportClosed,
    /// The producer it consumed was closed
    ProducerClosed,
    /// The router it lived on was closed
    RouterClosed,
}

/// Engine-side half of a close notification. The first `close` wins.
#[derive(Debug)]
pub struct CloseHandle {
    tx: watch::Sender<Option<CloseReason>>,
}

impl CloseHandle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Mark as closed. Returns `false` if it was already closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_some() {
                false
            } else {
                *state = Some(reason);
                true
            }
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.borrow().is_some()
    }

    #[must_use]
    pub fn signal(&self) -> CloseSignal {
        CloseSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CloseHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber half of a close notification
#[derive(Debug, Clone)]
pub struct CloseSignal {
    rx: watch::Receiver<Option<CloseReason>>,
}

impl CloseSignal {
    /// Resolve once the object is closed. A dropped engine object counts as
    /// closed.
    pub async fn wait(mut self) -> CloseReason {
        loop {
            if let Some(reason) = *self.rx.borrow_and_update() {
                return reason;
            }
            if self.rx.changed().await.is_err() {
                return (*self.rx.borrow()).unwrap_or(CloseReason::Closed);
            }
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

/// Options for creating a WebRTC transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRtcTransportOptions {
    pub listen_ip: IpAddr,
    /// Public address advertised in ICE candidates instead of `listen_ip`
    pub announced_address: Option<String>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
    pub enable_sctp: bool,
}

/// Entry point into the media engine (one worker)
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_router(
        &self,
        media_codecs: Vec<RtpCodecCapability>,
    ) -> EngineResult<Arc<dyn Router>>;
}

#[async_trait]
pub trait Router: Send + Sync {
    fn id(&self) -> RouterId;

    fn rtp_capabilities(&self) -> RtpCapabilities;

    /// Whether a live producer with this id exists on the router
    fn has_producer(&self, producer_id: &ProducerId) -> bool;

    fn can_consume(&self, producer_id: &ProducerId, rtp_capabilities: &RtpCapabilities) -> bool;

    async fn create_webrtc_transport(
        &self,
        options: WebRtcTransportOptions,
    ) -> EngineResult<Arc<dyn WebRtcTransport>>;

    fn close(&self);
}

#[async_trait]
pub trait WebRtcTransport: Send + Sync {
    fn id(&self) -> TransportId;

    fn ice_parameters(&self) -> IceParameters;

    fn ice_candidates(&self) -> Vec<IceCandidate>;

    fn dtls_parameters(&self) -> DtlsParameters;

    fn sctp_parameters(&self) -> Option<SctpParameters>;

    async fn connect(&self, dtls_parameters: DtlsParameters) -> EngineResult<()>;

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> EngineResult<Arc<dyn Producer>>;

    async fn consume(
        &self,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
        paused: bool,
    ) -> EngineResult<Arc<dyn Consumer>>;

    fn closed(&self) -> CloseSignal;

    fn close(&self);
}

pub trait Producer: Send + Sync {
    fn id(&self) -> ProducerId;

    fn kind(&self) -> MediaKind;

    fn closed(&self) -> CloseSignal;

    fn close(&self);
}

#[async_trait]
pub trait Consumer: Send + Sync {
    fn id(&self) -> ConsumerId;

    fn producer_id(&self) -> ProducerId;

    fn kind(&self) -> MediaKind;

    fn rtp_parameters(&self) -> RtpParameters;

    /// Paused consumers forward no media
    fn paused(&self) -> bool;

    async fn resume(&self) -> EngineResult<()>;

    fn closed(&self) -> CloseSignal;

    fn close(&self);
}
