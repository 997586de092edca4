//! End-to-end negotiation flows against the in-process engine

use async_trait::async_trait;
use huddle_sfu::engine::{
    CloseSignal, Consumer, EngineResult, Producer, Router, WebRtcTransport,
    WebRtcTransportOptions,
};
use huddle_sfu::rtp::{
    DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpParameters, SctpParameters,
};
use huddle_sfu::{
    ConsumerState, LocalEngine, MediaEngine, MediaKind, Notification, NotificationReceiver,
    PeerId, ProducerId, RoomId, RouterId, SfuConfig, SfuError, SfuManager, TransportDirection,
    TransportId, TransportState, WorkerSettings,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

struct Client {
    id: PeerId,
    rx: NotificationReceiver,
}

fn setup() -> (LocalEngine, Arc<SfuManager>) {
    setup_with(WorkerSettings::default(), SfuConfig::default())
}

fn setup_with(settings: WorkerSettings, config: SfuConfig) -> (LocalEngine, Arc<SfuManager>) {
    let engine = LocalEngine::new(settings).unwrap();
    let sfu = SfuManager::new(Arc::new(engine.clone()), config);
    (engine, sfu)
}

async fn join(sfu: &SfuManager, room: &RoomId, id: &str) -> Client {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = PeerId::from(id);
    sfu.join(room, &id, tx).await.unwrap();
    Client { id, rx }
}

fn dtls() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value: "82:5A:68:3D:36:C3:0A:DE:AF:E7:32:43:D2:88:83:57".to_string(),
        }],
    }
}

fn opus() -> RtpParameters {
    RtpParameters {
        mid: Some("0".to_string()),
        codecs: vec![RtpCodecParameters {
            mime_type: "audio/opus".to_string(),
            payload_type: 111,
            clock_rate: 48_000,
            channels: Some(2),
            parameters: serde_json::Map::new(),
            rtcp_feedback: Vec::new(),
        }],
        ..Default::default()
    }
}

async fn next(rx: &mut NotificationReceiver) -> Notification {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("notification channel closed")
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Send transport connected, one audio producer
async fn publish(sfu: &SfuManager, room: &RoomId, peer: &PeerId) -> ProducerId {
    let transport = sfu
        .create_transport(room, peer, TransportDirection::Send)
        .await
        .unwrap();
    sfu.connect_transport(room, peer, TransportDirection::Send, &transport.id, dtls())
        .await
        .unwrap();
    sfu.produce(room, peer, &transport.id, MediaKind::Audio, opus())
        .await
        .unwrap()
        .id
}

async fn open_recv(sfu: &SfuManager, room: &RoomId, peer: &PeerId) {
    let transport = sfu
        .create_transport(room, peer, TransportDirection::Recv)
        .await
        .unwrap();
    sfu.connect_transport(room, peer, TransportDirection::Recv, &transport.id, dtls())
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_joins_create_one_router() {
    let (engine, sfu) = setup();
    let room = RoomId::from("R1");

    let mut joins = JoinSet::new();
    for i in 0..16 {
        let sfu = Arc::clone(&sfu);
        let room = room.clone();
        joins.spawn(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            sfu.join(&room, &PeerId::new(format!("peer-{i}")), tx).await.map(|()| rx)
        });
    }
    let mut receivers = Vec::new();
    while let Some(result) = joins.join_next().await {
        receivers.push(result.unwrap().unwrap());
    }

    assert_eq!(engine.routers_created(), 1);
    let registered = sfu.registry().get_room(&room).unwrap();
    assert_eq!(registered.peer_count(), 16);
    assert_eq!(sfu.registry().room_count(), 1);
}

#[tokio::test]
async fn capabilities_of_unknown_room() {
    let (_engine, sfu) = setup();
    let err = sfu.rtp_capabilities(&RoomId::from("R9")).unwrap_err();
    assert!(matches!(err, SfuError::RoomNotFound(_)));
    assert_eq!(err.code(), "room_not_found");
}

#[tokio::test]
async fn capabilities_carry_fixed_codecs() {
    let (_engine, sfu) = setup();
    let room = RoomId::from("R1");
    join(&sfu, &room, "A").await;

    let caps = sfu.rtp_capabilities(&room).unwrap();
    let mimes: Vec<_> = caps.codecs.iter().map(|c| c.mime_type.as_str()).collect();
    assert_eq!(mimes, vec!["audio/opus", "video/VP8"]);
}

#[tokio::test]
async fn produce_announces_to_others_only() {
    let (_engine, sfu) = setup();
    let room = RoomId::from("R1");
    let mut a = join(&sfu, &room, "A").await;
    let mut b = join(&sfu, &room, "B").await;
    let mut c = join(&sfu, &room, "C").await;

    let producer_id = publish(&sfu, &room, &a.id).await;

    for rx in [&mut b.rx, &mut c.rx] {
        match next(rx).await {
            Notification::NewProducer(n) => {
                assert_eq!(n.producer_id, producer_id);
                assert_eq!(n.peer_id, a.id);
                assert_eq!(n.kind, MediaKind::Audio);
            }
            other => panic!("unexpected notification {other:?}"),
        }
    }
    assert!(a.rx.try_recv().is_err());

    let snapshot = sfu.peer_snapshot(&room, &a.id).unwrap();
    assert_eq!(snapshot.producers.len(), 1);
    assert_eq!(snapshot.transports[0].state, TransportState::Connected);
}

#[tokio::test]
async fn consumer_starts_paused_until_resumed() {
    let (engine, sfu) = setup();
    let room = RoomId::from("R1");
    let a = join(&sfu, &room, "A").await;
    let b = join(&sfu, &room, "B").await;
    let producer_id = publish(&sfu, &room, &a.id).await;

    open_recv(&sfu, &room, &b.id).await;
    let caps = sfu.rtp_capabilities(&room).unwrap();
    let consumer = sfu.consume(&room, &b.id, &producer_id, caps).await.unwrap();

    assert_eq!(consumer.producer_id, producer_id);
    assert_eq!(consumer.kind, MediaKind::Audio);
    assert_eq!(consumer.rtp_parameters.codecs[0].payload_type, 100);
    assert!(engine.consumer(&consumer.id).unwrap().paused());
    let snapshot = sfu.peer_snapshot(&room, &b.id).unwrap();
    assert_eq!(snapshot.consumer(&consumer.id).unwrap().state, ConsumerState::Paused);

    sfu.resume_consumer(&room, &b.id, &consumer.id).await.unwrap();

    assert!(!engine.consumer(&consumer.id).unwrap().paused());
    let snapshot = sfu.peer_snapshot(&room, &b.id).unwrap();
    assert_eq!(snapshot.consumer(&consumer.id).unwrap().state, ConsumerState::Active);
}

#[tokio::test]
async fn producer_close_notifies_each_consumer_once() {
    let (engine, sfu) = setup();
    let room = RoomId::from("R1");
    let a = join(&sfu, &room, "A").await;
    let mut b = join(&sfu, &room, "B").await;
    let mut c = join(&sfu, &room, "C").await;
    let producer_id = publish(&sfu, &room, &a.id).await;
    next(&mut b.rx).await;
    next(&mut c.rx).await;

    // B holds two consumers of the same producer, C holds none
    open_recv(&sfu, &room, &b.id).await;
    let caps = sfu.rtp_capabilities(&room).unwrap();
    sfu.consume(&room, &b.id, &producer_id, caps.clone()).await.unwrap();
    sfu.consume(&room, &b.id, &producer_id, caps).await.unwrap();

    engine.producer(&producer_id).unwrap().close();

    match next(&mut b.rx).await {
        Notification::ProducerClosed(n) => assert_eq!(n.producer_id, producer_id),
        other => panic!("unexpected notification {other:?}"),
    }
    eventually(|| {
        sfu.peer_snapshot(&room, &b.id)
            .is_some_and(|snapshot| snapshot.consumers.is_empty())
    })
    .await;
    eventually(|| {
        sfu.peer_snapshot(&room, &a.id)
            .is_some_and(|snapshot| snapshot.producers.is_empty())
    })
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(b.rx.try_recv().is_err());
    assert!(c.rx.try_recv().is_err());
}

#[tokio::test]
async fn incompatible_capabilities_create_no_consumer() {
    let (_engine, sfu) = setup();
    let room = RoomId::from("R1");
    let a = join(&sfu, &room, "A").await;
    let b = join(&sfu, &room, "B").await;
    let producer_id = publish(&sfu, &room, &a.id).await;
    open_recv(&sfu, &room, &b.id).await;

    let mut caps = sfu.rtp_capabilities(&room).unwrap();
    caps.codecs.retain(|codec: &RtpCodecCapability| codec.kind == MediaKind::Video);

    let err = sfu.consume(&room, &b.id, &producer_id, caps).await.unwrap_err();
    assert!(matches!(err, SfuError::IncompatibleCapabilities(_)));
    assert!(sfu.peer_snapshot(&room, &b.id).unwrap().consumers.is_empty());
}

#[tokio::test]
async fn consume_error_order() {
    let (_engine, sfu) = setup();
    let room = RoomId::from("R1");
    let a = join(&sfu, &room, "A").await;
    let b = join(&sfu, &room, "B").await;
    let producer_id = publish(&sfu, &room, &a.id).await;
    let caps = sfu.rtp_capabilities(&room).unwrap();

    let err = sfu
        .consume(&RoomId::from("R9"), &b.id, &producer_id, caps.clone())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "room_not_found");

    let err = sfu
        .consume(&room, &PeerId::from("Z"), &producer_id, caps.clone())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "peer_not_found");

    let err = sfu
        .consume(&room, &b.id, &ProducerId::from("nope"), caps.clone())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "producer_not_found");

    // No RECV transport yet
    let err = sfu.consume(&room, &b.id, &producer_id, caps).await.unwrap_err();
    assert!(matches!(err, SfuError::NoTransport(TransportDirection::Recv)));
    assert_eq!(err.code(), "transport_not_found");
}

#[tokio::test]
async fn resources_are_reachable_only_through_their_peer() {
    let (_engine, sfu) = setup();
    let room = RoomId::from("R1");
    let a = join(&sfu, &room, "A").await;
    let b = join(&sfu, &room, "B").await;
    let c = join(&sfu, &room, "C").await;

    let a_send = sfu
        .create_transport(&room, &a.id, TransportDirection::Send)
        .await
        .unwrap();

    let err = sfu
        .connect_transport(&room, &b.id, TransportDirection::Send, &a_send.id, dtls())
        .await
        .unwrap_err();
    assert!(matches!(err, SfuError::TransportNotFound(_)));

    let err = sfu
        .produce(&room, &b.id, &a_send.id, MediaKind::Audio, opus())
        .await
        .unwrap_err();
    assert!(matches!(err, SfuError::TransportNotFound(_)));

    // B consumes A's producer; C cannot resume B's consumer
    let producer_id = sfu
        .produce(&room, &a.id, &a_send.id, MediaKind::Audio, opus())
        .await
        .unwrap()
        .id;
    open_recv(&sfu, &room, &b.id).await;
    let caps = sfu.rtp_capabilities(&room).unwrap();
    let consumer = sfu.consume(&room, &b.id, &producer_id, caps).await.unwrap();

    let err = sfu
        .resume_consumer(&room, &c.id, &consumer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, SfuError::ConsumerNotFound(_)));
}

#[tokio::test]
async fn transport_direction_is_enforced() {
    let (_engine, sfu) = setup();
    let room = RoomId::from("R1");
    let a = join(&sfu, &room, "A").await;

    let recv = sfu
        .create_transport(&room, &a.id, TransportDirection::Recv)
        .await
        .unwrap();

    let err = sfu
        .connect_transport(&room, &a.id, TransportDirection::Send, &recv.id, dtls())
        .await
        .unwrap_err();
    assert!(matches!(err, SfuError::TransportNotFound(_)));

    let err = sfu
        .produce(&room, &a.id, &recv.id, MediaKind::Audio, opus())
        .await
        .unwrap_err();
    assert!(matches!(err, SfuError::TransportNotFound(_)));
}

#[tokio::test]
async fn connect_is_repeatable() {
    let (_engine, sfu) = setup();
    let room = RoomId::from("R1");
    let a = join(&sfu, &room, "A").await;
    let send = sfu
        .create_transport(&room, &a.id, TransportDirection::Send)
        .await
        .unwrap();

    for _ in 0..2 {
        sfu.connect_transport(&room, &a.id, TransportDirection::Send, &send.id, dtls())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn new_transport_replaces_previous_direction() {
    let (engine, sfu) = setup();
    let room = RoomId::from("R1");
    let a = join(&sfu, &room, "A").await;

    let first = sfu
        .create_transport(&room, &a.id, TransportDirection::Recv)
        .await
        .unwrap();
    let second = sfu
        .create_transport(&room, &a.id, TransportDirection::Recv)
        .await
        .unwrap();

    assert!(engine.transport(&first.id).is_none());
    let snapshot = sfu.peer_snapshot(&room, &a.id).unwrap();
    assert_eq!(snapshot.recv_transport, Some(second.id));
    assert_eq!(snapshot.transports.len(), 1);
    assert_eq!(engine.ports_in_use(), 1);
}

#[tokio::test]
async fn leave_tears_down_and_removes_empty_room() {
    let (engine, sfu) = setup();
    let room = RoomId::from("R1");
    let a = join(&sfu, &room, "A").await;
    let mut b = join(&sfu, &room, "B").await;
    let producer_id = publish(&sfu, &room, &a.id).await;
    next(&mut b.rx).await;

    open_recv(&sfu, &room, &b.id).await;
    let caps = sfu.rtp_capabilities(&room).unwrap();
    sfu.consume(&room, &b.id, &producer_id, caps).await.unwrap();

    assert!(sfu.leave(&a.id));
    match next(&mut b.rx).await {
        Notification::ProducerClosed(n) => assert_eq!(n.producer_id, producer_id),
        other => panic!("unexpected notification {other:?}"),
    }
    assert!(engine.producer(&producer_id).is_none());
    assert_eq!(sfu.room_stats(&room).unwrap().peer_count, 1);

    assert!(sfu.leave(&b.id));
    assert!(sfu.registry().get_room(&room).is_none());
    assert_eq!(engine.router_count(), 0);
    assert_eq!(engine.ports_in_use(), 0);

    // The key can be reused with a fresh router
    join(&sfu, &room, "C").await;
    assert_eq!(engine.routers_created(), 2);
}

#[tokio::test]
async fn rejoin_replaces_peer_record() {
    let (engine, sfu) = setup();
    let room = RoomId::from("R1");
    let a = join(&sfu, &room, "A").await;
    let send = sfu
        .create_transport(&room, &a.id, TransportDirection::Send)
        .await
        .unwrap();

    join(&sfu, &room, "A").await;

    assert!(engine.transport(&send.id).is_none());
    let snapshot = sfu.peer_snapshot(&room, &a.id).unwrap();
    assert!(snapshot.transports.is_empty());
    assert_eq!(sfu.room_stats(&room).unwrap().peer_count, 1);
}

#[tokio::test]
async fn port_exhaustion_fails_only_that_request() {
    let (_engine, sfu) = setup_with(
        WorkerSettings {
            rtc_min_port: 50_000,
            rtc_max_port: 50_000,
        },
        SfuConfig::default(),
    );
    let room = RoomId::from("R1");
    let a = join(&sfu, &room, "A").await;
    let b = join(&sfu, &room, "B").await;

    sfu.create_transport(&room, &a.id, TransportDirection::Send)
        .await
        .unwrap();
    let err = sfu
        .create_transport(&room, &b.id, TransportDirection::Recv)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "engine_failure");
    assert!(sfu.peer_snapshot(&room, &b.id).unwrap().transports.is_empty());
}

/// Engine whose router creation never completes
struct StalledEngine;

#[async_trait]
impl MediaEngine for StalledEngine {
    async fn create_router(
        &self,
        _media_codecs: Vec<RtpCodecCapability>,
    ) -> EngineResult<Arc<dyn Router>> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_engine_times_out() {
    let sfu = SfuManager::new(
        Arc::new(StalledEngine),
        SfuConfig {
            request_timeout_ms: 100,
            ..Default::default()
        },
    );
    let room = RoomId::from("R1");
    let (tx, _rx) = mpsc::unbounded_channel();

    let err = sfu.join(&room, &PeerId::from("A"), tx).await.unwrap_err();
    assert!(matches!(
        err,
        SfuError::EngineFailure(huddle_sfu::EngineError::Timeout(_))
    ));
    assert!(sfu.registry().get_room(&room).is_none());
    assert_eq!(sfu.registry().room_count(), 0);
}

const DELAY: Duration = Duration::from_millis(20);

/// Engine that finishes router, transport and producer requests late. The
/// underlying object exists for the whole delay.
struct SlowEngine {
    inner: LocalEngine,
}

struct SlowRouter {
    inner: Arc<dyn Router>,
}

struct SlowTransport {
    inner: Arc<dyn WebRtcTransport>,
}

#[async_trait]
impl MediaEngine for SlowEngine {
    async fn create_router(
        &self,
        media_codecs: Vec<RtpCodecCapability>,
    ) -> EngineResult<Arc<dyn Router>> {
        let inner = self.inner.create_router(media_codecs).await?;
        tokio::time::sleep(DELAY).await;
        Ok(Arc::new(SlowRouter { inner }))
    }
}

#[async_trait]
impl Router for SlowRouter {
    fn id(&self) -> RouterId {
        self.inner.id()
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.inner.rtp_capabilities()
    }

    fn has_producer(&self, producer_id: &ProducerId) -> bool {
        self.inner.has_producer(producer_id)
    }

    fn can_consume(&self, producer_id: &ProducerId, rtp_capabilities: &RtpCapabilities) -> bool {
        self.inner.can_consume(producer_id, rtp_capabilities)
    }

    async fn create_webrtc_transport(
        &self,
        options: WebRtcTransportOptions,
    ) -> EngineResult<Arc<dyn WebRtcTransport>> {
        let inner = self.inner.create_webrtc_transport(options).await?;
        tokio::time::sleep(DELAY).await;
        Ok(Arc::new(SlowTransport { inner }))
    }

    fn close(&self) {
        self.inner.close();
    }
}

#[async_trait]
impl WebRtcTransport for SlowTransport {
    fn id(&self) -> TransportId {
        self.inner.id()
    }

    fn ice_parameters(&self) -> IceParameters {
        self.inner.ice_parameters()
    }

    fn ice_candidates(&self) -> Vec<IceCandidate> {
        self.inner.ice_candidates()
    }

    fn dtls_parameters(&self) -> DtlsParameters {
        self.inner.dtls_parameters()
    }

    fn sctp_parameters(&self) -> Option<SctpParameters> {
        self.inner.sctp_parameters()
    }

    async fn connect(&self, dtls_parameters: DtlsParameters) -> EngineResult<()> {
        self.inner.connect(dtls_parameters).await
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> EngineResult<Arc<dyn Producer>> {
        let producer = self.inner.produce(kind, rtp_parameters).await?;
        tokio::time::sleep(DELAY).await;
        Ok(producer)
    }

    async fn consume(
        &self,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
        paused: bool,
    ) -> EngineResult<Arc<dyn Consumer>> {
        self.inner.consume(producer_id, rtp_capabilities, paused).await
    }

    fn closed(&self) -> CloseSignal {
        self.inner.closed()
    }

    fn close(&self) {
        self.inner.close();
    }
}

fn slow_setup(config: SfuConfig) -> (LocalEngine, Arc<SfuManager>) {
    let engine = LocalEngine::new(WorkerSettings::default()).unwrap();
    let sfu = SfuManager::new(
        Arc::new(SlowEngine {
            inner: engine.clone(),
        }),
        config,
    );
    (engine, sfu)
}

#[tokio::test(start_paused = true)]
async fn concurrent_joins_of_two_rooms_leave_one_membership() {
    let (engine, sfu) = slow_setup(SfuConfig::default());
    let peer = PeerId::from("A");
    let (r1, r2) = (RoomId::from("R1"), RoomId::from("R2"));
    let (tx, _rx) = mpsc::unbounded_channel();

    let (first, second) = tokio::join!(
        sfu.join(&r1, &peer, tx.clone()),
        sfu.join(&r2, &peer, tx)
    );
    first.unwrap();
    second.unwrap();

    let member_of: Vec<_> = [&r1, &r2]
        .into_iter()
        .filter(|room| sfu.peer_snapshot(room, &peer).is_some())
        .cloned()
        .collect();
    assert_eq!(member_of.len(), 1);
    assert_eq!(sfu.membership(&peer).as_ref(), member_of.first());
    assert_eq!(sfu.registry().room_count(), 1);

    assert!(sfu.leave(&peer));
    assert_eq!(sfu.registry().room_count(), 0);
    assert_eq!(engine.router_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn transport_finished_after_leave_is_closed() {
    let (engine, sfu) = slow_setup(SfuConfig::default());
    let room = RoomId::from("R1");
    let a = join(&sfu, &room, "A").await;
    let c = join(&sfu, &room, "C").await;

    let pending = tokio::spawn({
        let sfu = Arc::clone(&sfu);
        let room = room.clone();
        let peer = a.id.clone();
        async move {
            sfu.create_transport(&room, &peer, TransportDirection::Send)
                .await
        }
    });
    tokio::time::sleep(DELAY / 2).await;
    assert_eq!(engine.ports_in_use(), 1);

    assert!(sfu.leave(&a.id));
    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.code(), "peer_not_found");
    assert_eq!(engine.ports_in_use(), 0);
    assert!(sfu.peer_snapshot(&room, &c.id).is_some());
}

#[tokio::test(start_paused = true)]
async fn producer_finished_after_leave_is_never_announced() {
    let (_engine, sfu) = slow_setup(SfuConfig::default());
    let room = RoomId::from("R1");
    let a = join(&sfu, &room, "A").await;
    let mut c = join(&sfu, &room, "C").await;

    let send = sfu
        .create_transport(&room, &a.id, TransportDirection::Send)
        .await
        .unwrap();
    sfu.connect_transport(&room, &a.id, TransportDirection::Send, &send.id, dtls())
        .await
        .unwrap();

    let pending = tokio::spawn({
        let sfu = Arc::clone(&sfu);
        let room = room.clone();
        let peer = a.id.clone();
        async move {
            sfu.produce(&room, &peer, &send.id, MediaKind::Audio, opus())
                .await
        }
    });
    tokio::time::sleep(DELAY / 2).await;

    assert!(sfu.leave(&a.id));
    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.code(), "peer_not_found");

    tokio::time::sleep(DELAY).await;
    assert!(c.rx.try_recv().is_err());
    let stats = sfu.room_stats(&room).unwrap();
    assert_eq!(stats.peer_count, 1);
    assert_eq!(stats.producer_count, 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_new_rooms_respect_room_limit() {
    let (engine, sfu) = slow_setup(SfuConfig {
        max_rooms: 1,
        ..Default::default()
    });
    let (tx, _rx) = mpsc::unbounded_channel();
    let (a, b) = (PeerId::from("A"), PeerId::from("B"));
    let (r1, r2) = (RoomId::from("R1"), RoomId::from("R2"));

    let (first, second) = tokio::join!(sfu.join(&r1, &a, tx.clone()), sfu.join(&r2, &b, tx));

    let limited = [&first, &second]
        .into_iter()
        .filter(|result| matches!(result, Err(SfuError::RoomLimitReached(1))))
        .count();
    assert_eq!(limited, 1);
    assert!(first.is_ok() || second.is_ok());
    assert_eq!(engine.routers_created(), 1);
    assert_eq!(sfu.registry().room_count(), 1);
}

#[tokio::test]
async fn recv_transport_close_drops_consumers_silently() {
    let (engine, sfu) = setup();
    let room = RoomId::from("R1");
    let a = join(&sfu, &room, "A").await;
    let mut b = join(&sfu, &room, "B").await;
    let producer_id = publish(&sfu, &room, &a.id).await;
    next(&mut b.rx).await;

    let recv = sfu
        .create_transport(&room, &b.id, TransportDirection::Recv)
        .await
        .unwrap();
    sfu.connect_transport(&room, &b.id, TransportDirection::Recv, &recv.id, dtls())
        .await
        .unwrap();
    let caps = sfu.rtp_capabilities(&room).unwrap();
    let consumer = sfu.consume(&room, &b.id, &producer_id, caps).await.unwrap();

    engine.transport(&recv.id).unwrap().close();

    eventually(|| {
        sfu.peer_snapshot(&room, &b.id).is_some_and(|snapshot| {
            snapshot.consumers.is_empty() && snapshot.transports.is_empty()
        })
    })
    .await;
    assert!(engine.consumer(&consumer.id).is_none());
    assert!(engine.producer(&producer_id).is_some());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(b.rx.try_recv().is_err());
}
