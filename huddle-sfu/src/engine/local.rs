//! In-process media engine
//!
//! Keeps the full object graph of a worker (routers, transports, producers,
//! consumers) with real negotiation bookkeeping: port allocation from the
//! worker range, ICE/DTLS parameter generation, codec validation and close
//! cascades. It does not move RTP. Used for single-process deployments
//! without an external media worker and by the test suites.

use super::{
    CloseHandle, CloseReason, CloseSignal, Consumer, EngineError, EngineResult, MediaEngine,
    Producer, Router, WebRtcTransport, WebRtcTransportOptions,
};
use crate::rtp::{
    default_rtcp_feedback, DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate,
    IceCandidateTcpType, IceCandidateType, IceParameters, Protocol, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpParameters, SctpParameters,
};
use crate::types::{ConsumerId, MediaKind, ProducerId, RouterId, TransportId};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use uuid::Uuid;

/// First payload type handed out to router codecs (dynamic range)
const FIRST_DYNAMIC_PAYLOAD_TYPE: u8 = 100;

const SCTP_PORT: u16 = 5000;
const SCTP_STREAMS: u16 = 1024;
const SCTP_MAX_MESSAGE_SIZE: u32 = 262_144;

/// Worker settings (the `createWorker` options)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            rtc_min_port: 40_000,
            rtc_max_port: 49_999,
        }
    }
}

struct PortPool {
    min: u16,
    max: u16,
    next: u16,
    in_use: HashSet<u16>,
}

impl PortPool {
    fn new(min: u16, max: u16) -> Self {
        Self {
            min,
            max,
            next: min,
            in_use: HashSet::new(),
        }
    }

    fn allocate(&mut self) -> Option<u16> {
        let span = u32::from(self.max - self.min) + 1;
        for _ in 0..span {
            let port = self.next;
            self.next = if self.next >= self.max {
                self.min
            } else {
                self.next + 1
            };
            if self.in_use.insert(port) {
                return Some(port);
            }
        }
        None
    }

    fn release(&mut self, port: u16) {
        self.in_use.remove(&port);
    }
}

struct EngineInner {
    settings: WorkerSettings,
    ports: Mutex<PortPool>,
    routers: DashMap<RouterId, Arc<LocalRouter>>,
    routers_created: AtomicU64,
}

impl EngineInner {
    fn release_port(&self, port: u16) {
        self.ports.lock().release(port);
    }
}

/// Engine worker living inside the signaling process
#[derive(Clone)]
pub struct LocalEngine {
    inner: Arc<EngineInner>,
}

impl LocalEngine {
    pub fn new(settings: WorkerSettings) -> EngineResult<Self> {
        if settings.rtc_min_port == 0 || settings.rtc_min_port > settings.rtc_max_port {
            return Err(EngineError::InvalidState(format!(
                "invalid RTC port range {}-{}",
                settings.rtc_min_port, settings.rtc_max_port
            )));
        }

        info!(
            rtc_min_port = settings.rtc_min_port,
            rtc_max_port = settings.rtc_max_port,
            "Local media worker created"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                settings,
                ports: Mutex::new(PortPool::new(settings.rtc_min_port, settings.rtc_max_port)),
                routers: DashMap::new(),
                routers_created: AtomicU64::new(0),
            }),
        })
    }

    /// Number of routers ever created by this worker
    #[must_use]
    pub fn routers_created(&self) -> u64 {
        self.inner.routers_created.load(Ordering::SeqCst)
    }

    /// Number of live routers
    #[must_use]
    pub fn router_count(&self) -> usize {
        self.inner.routers.len()
    }

    #[must_use]
    pub fn ports_in_use(&self) -> usize {
        self.inner.ports.lock().in_use.len()
    }

    fn routers(&self) -> Vec<Arc<LocalRouter>> {
        self.inner
            .routers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Look up a live transport by id
    #[must_use]
    pub fn transport(&self, id: &TransportId) -> Option<Arc<dyn WebRtcTransport>> {
        self.routers().into_iter().find_map(|router| {
            router
                .transports
                .get(id)
                .map(|t| Arc::clone(t.value()) as Arc<dyn WebRtcTransport>)
        })
    }

    /// Look up a live producer by id
    #[must_use]
    pub fn producer(&self, id: &ProducerId) -> Option<Arc<dyn Producer>> {
        self.routers().into_iter().find_map(|router| {
            router
                .producers
                .get(id)
                .map(|p| Arc::clone(p.value()) as Arc<dyn Producer>)
        })
    }

    /// Look up a live consumer by id
    #[must_use]
    pub fn consumer(&self, id: &ConsumerId) -> Option<Arc<dyn Consumer>> {
        for router in self.routers() {
            let transports: Vec<_> = router
                .transports
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect();
            for transport in transports {
                let found = transport
                    .consumers
                    .lock()
                    .iter()
                    .filter_map(Weak::upgrade)
                    .find(|c| c.id == *id && !c.close.is_closed());
                if let Some(consumer) = found {
                    return Some(consumer as Arc<dyn Consumer>);
                }
            }
        }
        None
    }
}

#[async_trait]
impl MediaEngine for LocalEngine {
    async fn create_router(
        &self,
        media_codecs: Vec<RtpCodecCapability>,
    ) -> EngineResult<Arc<dyn Router>> {
        let codecs = media_codecs
            .into_iter()
            .zip(FIRST_DYNAMIC_PAYLOAD_TYPE..)
            .map(|(mut codec, payload_type)| {
                codec.preferred_payload_type.get_or_insert(payload_type);
                if codec.rtcp_feedback.is_empty() {
                    codec.rtcp_feedback = default_rtcp_feedback(codec.kind);
                }
                codec
            })
            .collect();

        let id = RouterId::new(Uuid::new_v4().to_string());
        let router = Arc::new_cyclic(|me| LocalRouter {
            id: id.clone(),
            me: me.clone(),
            engine: Arc::downgrade(&self.inner),
            codecs,
            close: CloseHandle::new(),
            transports: DashMap::new(),
            producers: DashMap::new(),
        });

        self.inner.routers.insert(id.clone(), Arc::clone(&router));
        self.inner.routers_created.fetch_add(1, Ordering::SeqCst);
        debug!(router_id = %id, "Router created");

        Ok(router)
    }
}

struct LocalRouter {
    id: RouterId,
    me: Weak<LocalRouter>,
    engine: Weak<EngineInner>,
    codecs: Vec<RtpCodecCapability>,
    close: CloseHandle,
    transports: DashMap<TransportId, Arc<LocalTransport>>,
    producers: DashMap<ProducerId, Arc<LocalProducer>>,
}

impl LocalRouter {
    fn live_producer(&self, producer_id: &ProducerId) -> Option<Arc<LocalProducer>> {
        self.producers
            .get(producer_id)
            .map(|p| Arc::clone(p.value()))
            .filter(|p| !p.close.is_closed())
    }

    fn supports(&self, kind: MediaKind, codec: &RtpCodecParameters) -> bool {
        self.codecs
            .iter()
            .any(|capability| capability.kind == kind && capability.matches(codec))
    }
}

#[async_trait]
impl Router for LocalRouter {
    fn id(&self) -> RouterId {
        self.id.clone()
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        RtpCapabilities {
            codecs: self.codecs.clone(),
            header_extensions: Vec::new(),
        }
    }

    fn has_producer(&self, producer_id: &ProducerId) -> bool {
        self.live_producer(producer_id).is_some()
    }

    fn can_consume(&self, producer_id: &ProducerId, rtp_capabilities: &RtpCapabilities) -> bool {
        let Some(producer) = self.live_producer(producer_id) else {
            return false;
        };
        let Some(codec) = producer.rtp_parameters.media_codec() else {
            return false;
        };
        rtp_capabilities
            .codecs
            .iter()
            .any(|capability| capability.kind == producer.kind && capability.matches(codec))
    }

    async fn create_webrtc_transport(
        &self,
        options: WebRtcTransportOptions,
    ) -> EngineResult<Arc<dyn WebRtcTransport>> {
        if self.close.is_closed() {
            return Err(EngineError::RouterClosed(self.id.clone()));
        }
        if !options.enable_udp && !options.enable_tcp {
            return Err(EngineError::InvalidState(
                "transport needs UDP or TCP enabled".to_string(),
            ));
        }

        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| EngineError::Other("media worker is gone".to_string()))?;
        let port = engine
            .ports
            .lock()
            .allocate()
            .ok_or(EngineError::PortsExhausted {
                min: engine.settings.rtc_min_port,
                max: engine.settings.rtc_max_port,
            })?;

        let id = TransportId::new(Uuid::new_v4().to_string());
        let transport = Arc::new_cyclic(|me| LocalTransport {
            id: id.clone(),
            me: me.clone(),
            router: self.me.clone(),
            engine: Arc::downgrade(&engine),
            port,
            ice_parameters: IceParameters {
                username_fragment: nanoid::nanoid!(16),
                password: nanoid::nanoid!(32),
                ice_lite: true,
            },
            ice_candidates: build_candidates(&options, port),
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: random_fingerprint(),
                }],
            },
            sctp_parameters: options.enable_sctp.then_some(SctpParameters {
                port: SCTP_PORT,
                os: SCTP_STREAMS,
                mis: SCTP_STREAMS,
                max_message_size: SCTP_MAX_MESSAGE_SIZE,
            }),
            remote_dtls: Mutex::new(None),
            close: CloseHandle::new(),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            next_mid: AtomicU32::new(0),
        });

        self.transports.insert(id.clone(), Arc::clone(&transport));

        // A router closed while we were allocating must not keep the transport.
        if self.close.is_closed() {
            transport.close_with(CloseReason::RouterClosed);
            return Err(EngineError::RouterClosed(self.id.clone()));
        }

        debug!(router_id = %self.id, transport_id = %id, port, "WebRTC transport created");
        Ok(transport)
    }

    fn close(&self) {
        if !self.close.close(CloseReason::Closed) {
            return;
        }

        let transports: Vec<_> = self
            .transports
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for transport in transports {
            transport.close_with(CloseReason::RouterClosed);
        }
        self.transports.clear();
        self.producers.clear();

        if let Some(engine) = self.engine.upgrade() {
            engine.routers.remove(&self.id);
        }
        debug!(router_id = %self.id, "Router closed");
    }
}

fn build_candidates(options: &WebRtcTransportOptions, port: u16) -> Vec<IceCandidate> {
    let address = options
        .announced_address
        .clone()
        .unwrap_or_else(|| options.listen_ip.to_string());
    let mut candidates = Vec::with_capacity(2);

    if options.enable_udp {
        candidates.push(IceCandidate {
            foundation: "udpcandidate".to_string(),
            priority: if options.prefer_udp { 1_076_302_079 } else { 1_076_302_078 },
            address: address.clone(),
            protocol: Protocol::Udp,
            port,
            candidate_type: IceCandidateType::Host,
            tcp_type: None,
        });
    }
    if options.enable_tcp {
        candidates.push(IceCandidate {
            foundation: "tcpcandidate".to_string(),
            priority: if options.prefer_udp { 1_076_276_479 } else { 1_076_302_079 },
            address,
            protocol: Protocol::Tcp,
            port,
            candidate_type: IceCandidateType::Host,
            tcp_type: Some(IceCandidateTcpType::Passive),
        });
    }

    candidates
}

fn random_fingerprint() -> String {
    let bytes: Vec<u8> = Uuid::new_v4()
        .as_bytes()
        .iter()
        .chain(Uuid::new_v4().as_bytes())
        .copied()
        .collect();
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Register a child handle, dropping entries whose owner is gone
fn push_child<T>(children: &Mutex<Vec<Weak<T>>>, child: Weak<T>) {
    let mut children = children.lock();
    children.retain(|entry| entry.strong_count() > 0);
    children.push(child);
}

/// Unregister a closed child
fn remove_child<T>(children: &Mutex<Vec<Weak<T>>>, child: &T) {
    children
        .lock()
        .retain(|entry| entry.strong_count() > 0 && !std::ptr::eq(entry.as_ptr(), child));
}

struct LocalTransport {
    id: TransportId,
    me: Weak<LocalTransport>,
    router: Weak<LocalRouter>,
    engine: Weak<EngineInner>,
    port: u16,
    ice_parameters: IceParameters,
    ice_candidates: Vec<IceCandidate>,
    dtls_parameters: DtlsParameters,
    sctp_parameters: Option<SctpParameters>,
    remote_dtls: Mutex<Option<DtlsParameters>>,
    close: CloseHandle,
    producers: Mutex<Vec<Weak<LocalProducer>>>,
    consumers: Mutex<Vec<Weak<LocalConsumer>>>,
    next_mid: AtomicU32,
}

impl LocalTransport {
    fn ensure_open(&self) -> EngineResult<Arc<LocalRouter>> {
        if self.close.is_closed() {
            return Err(EngineError::TransportClosed(self.id.clone()));
        }
        self.router
            .upgrade()
            .ok_or_else(|| EngineError::TransportClosed(self.id.clone()))
    }

    fn close_with(&self, reason: CloseReason) {
        if !self.close.close(reason) {
            return;
        }

        if let Some(engine) = self.engine.upgrade() {
            engine.release_port(self.port);
        }
        if let Some(router) = self.router.upgrade() {
            router.transports.remove(&self.id);
        }

        let producers = std::mem::take(&mut *self.producers.lock());
        for producer in producers.iter().filter_map(Weak::upgrade) {
            producer.close_with(CloseReason::TransportClosed);
        }
        let consumers = std::mem::take(&mut *self.consumers.lock());
        for consumer in consumers.iter().filter_map(Weak::upgrade) {
            consumer.close_with(CloseReason::TransportClosed);
        }

        debug!(transport_id = %self.id, ?reason, "WebRTC transport closed");
    }
}

#[async_trait]
impl WebRtcTransport for LocalTransport {
    fn id(&self) -> TransportId {
        self.id.clone()
    }

    fn ice_parameters(&self) -> IceParameters {
        self.ice_parameters.clone()
    }

    fn ice_candidates(&self) -> Vec<IceCandidate> {
        self.ice_candidates.clone()
    }

    fn dtls_parameters(&self) -> DtlsParameters {
        self.dtls_parameters.clone()
    }

    fn sctp_parameters(&self) -> Option<SctpParameters> {
        self.sctp_parameters
    }

    async fn connect(&self, dtls_parameters: DtlsParameters) -> EngineResult<()> {
        self.ensure_open()?;
        if dtls_parameters.fingerprints.is_empty() {
            return Err(EngineError::InvalidState(
                "DTLS parameters carry no fingerprint".to_string(),
            ));
        }

        let mut remote = self.remote_dtls.lock();
        match remote.as_ref() {
            None => {
                *remote = Some(dtls_parameters);
                Ok(())
            }
            Some(previous) if *previous == dtls_parameters => Ok(()),
            Some(_) => Err(EngineError::InvalidState(format!(
                "transport {} already connected",
                self.id
            ))),
        }
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> EngineResult<Arc<dyn Producer>> {
        let router = self.ensure_open()?;

        let codec = rtp_parameters
            .media_codec()
            .ok_or_else(|| EngineError::UnsupportedCodec("no media codec given".to_string()))?;
        if !router.supports(kind, codec) {
            return Err(EngineError::UnsupportedCodec(format!(
                "{} ({kind})",
                codec.mime_type
            )));
        }

        let producer = Arc::new(LocalProducer {
            id: ProducerId::new(Uuid::new_v4().to_string()),
            kind,
            rtp_parameters,
            router: Arc::downgrade(&router),
            transport: self.me.clone(),
            close: CloseHandle::new(),
            consumers: Mutex::new(Vec::new()),
        });

        router
            .producers
            .insert(producer.id.clone(), Arc::clone(&producer));
        push_child(&self.producers, Arc::downgrade(&producer));

        if self.close.is_closed() {
            producer.close_with(CloseReason::TransportClosed);
            return Err(EngineError::TransportClosed(self.id.clone()));
        }

        debug!(transport_id = %self.id, producer_id = %producer.id, %kind, "Producer created");
        Ok(producer)
    }

    async fn consume(
        &self,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
        paused: bool,
    ) -> EngineResult<Arc<dyn Consumer>> {
        let router = self.ensure_open()?;

        let producer = router
            .live_producer(&producer_id)
            .ok_or_else(|| EngineError::ProducerClosed(producer_id.clone()))?;
        let codec = producer
            .rtp_parameters
            .media_codec()
            .ok_or_else(|| {
                EngineError::UnsupportedCodec("producer has no media codec".to_string())
            })?;
        let capability = rtp_capabilities
            .codecs
            .iter()
            .find(|capability| capability.kind == producer.kind && capability.matches(codec))
            .ok_or_else(|| EngineError::UnsupportedCodec(codec.mime_type.clone()))?;

        let mid = self.next_mid.fetch_add(1, Ordering::Relaxed);
        let ssrc = (Uuid::new_v4().as_u128() & u128::from(u32::MAX)) as u32;
        let cname = producer
            .rtp_parameters
            .rtcp
            .as_ref()
            .and_then(|rtcp| rtcp.get("cname"))
            .and_then(|cname| cname.as_str())
            .map_or_else(|| producer.id.to_string(), str::to_string);

        let rtp_parameters = RtpParameters {
            mid: Some(mid.to_string()),
            codecs: vec![RtpCodecParameters {
                mime_type: codec.mime_type.clone(),
                payload_type: capability.preferred_payload_type.unwrap_or(codec.payload_type),
                clock_rate: codec.clock_rate,
                channels: codec.channels,
                parameters: codec.parameters.clone(),
                rtcp_feedback: capability.rtcp_feedback.clone(),
            }],
            header_extensions: Vec::new(),
            encodings: vec![json!({ "ssrc": ssrc })],
            rtcp: Some(json!({ "cname": cname, "reducedSize": true })),
        };

        let consumer = Arc::new(LocalConsumer {
            id: ConsumerId::new(Uuid::new_v4().to_string()),
            producer_id: producer.id.clone(),
            kind: producer.kind,
            rtp_parameters,
            paused: AtomicBool::new(paused),
            producer: Arc::downgrade(&producer),
            transport: self.me.clone(),
            close: CloseHandle::new(),
        });

        push_child(&producer.consumers, Arc::downgrade(&consumer));
        push_child(&self.consumers, Arc::downgrade(&consumer));

        if producer.close.is_closed() {
            consumer.close_with(CloseReason::ProducerClosed);
            return Err(EngineError::ProducerClosed(producer_id));
        }
        if self.close.is_closed() {
            consumer.close_with(CloseReason::TransportClosed);
            return Err(EngineError::TransportClosed(self.id.clone()));
        }

        debug!(
            transport_id = %self.id,
            consumer_id = %consumer.id,
            producer_id = %producer_id,
            paused,
            "Consumer created"
        );
        Ok(consumer)
    }

    fn closed(&self) -> CloseSignal {
        self.close.signal()
    }

    fn close(&self) {
        self.close_with(CloseReason::Closed);
    }
}

struct LocalProducer {
    id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    router: Weak<LocalRouter>,
    transport: Weak<LocalTransport>,
    close: CloseHandle,
    consumers: Mutex<Vec<Weak<LocalConsumer>>>,
}

impl LocalProducer {
    fn close_with(&self, reason: CloseReason) {
        if !self.close.close(reason) {
            return;
        }

        if let Some(router) = self.router.upgrade() {
            router.producers.remove(&self.id);
        }
        if let Some(transport) = self.transport.upgrade() {
            remove_child(&transport.producers, self);
        }

        let consumers = std::mem::take(&mut *self.consumers.lock());
        for consumer in consumers.iter().filter_map(Weak::upgrade) {
            consumer.close_with(CloseReason::ProducerClosed);
        }

        debug!(producer_id = %self.id, ?reason, "Producer closed");
    }
}

impl Producer for LocalProducer {
    fn id(&self) -> ProducerId {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn closed(&self) -> CloseSignal {
        self.close.signal()
    }

    fn close(&self) {
        self.close_with(CloseReason::Closed);
    }
}

struct LocalConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    paused: AtomicBool,
    producer: Weak<LocalProducer>,
    transport: Weak<LocalTransport>,
    close: CloseHandle,
}

impl LocalConsumer {
    fn close_with(&self, reason: CloseReason) {
        if !self.close.close(reason) {
            return;
        }

        if let Some(producer) = self.producer.upgrade() {
            remove_child(&producer.consumers, self);
        }
        if let Some(transport) = self.transport.upgrade() {
            remove_child(&transport.consumers, self);
        }
        debug!(consumer_id = %self.id, ?reason, "Consumer closed");
    }
}

#[async_trait]
impl Consumer for LocalConsumer {
    fn id(&self) -> ConsumerId {
        self.id.clone()
    }

    fn producer_id(&self) -> ProducerId {
        self.producer_id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn resume(&self) -> EngineResult<()> {
        if self.close.is_closed() {
            return Err(EngineError::InvalidState(format!(
                "consumer {} is closed",
                self.id
            )));
        }
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn closed(&self) -> CloseSignal {
        self.close.signal()
    }

    fn close(&self) {
        self.close_with(CloseReason::Closed);
    }
}
