//! Integration test: accept a real TCP connection, hand it over to a
//! library, and verify the published frames match the literal scenario in
//! `spec.md` §8 ("Accept + logon + release").
//!
//! Drives a real `Framer` bound to a loopback socket with hand-rolled
//! stand-in collaborators, the way the teacher crate's
//! `tests/integration.rs` drives a real `Server` over a real TCP client.

use std::net::{SocketAddr, TcpStream as StdTcpStream};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use gateway::collaborators::{
    ErrorHandler, IlinkProxyFactory, PositionSender, PublishResult, Publication, SequenceKind,
    SequenceNumberIndex, SessionIdError, SessionIdStrategy, Subscription,
};
use gateway::config::FramerConfig;
use gateway::error::GatewayError;
use gateway::framer::admin::admin_channel;
use gateway::gateway_session::{CompositeKey, GatewaySessionState};
use gateway::ids::{ConnectionId, CorrelationId, LibraryId, SessionId};
use gateway::ilink::{EstablishRequest, IlinkProxy, NegotiateRequest, TerminateRequest};
use gateway::messages::{DisconnectReason, InboundMessage, LogonStatus, OutboundMessage, SessionReplyStatus};
use gateway::{Framer, FramerDependencies, SystemClock};

/// Held behind an `Arc` so the test can still read `.frames` after the
/// value it wraps (`ArcPublication`) has been moved into `FramerDependencies`.
#[derive(Default)]
struct RecordingPublication {
    frames: Mutex<Vec<InboundMessage>>,
    position: AtomicI64,
}

#[derive(Default)]
struct QueuedSubscription {
    fragments: Mutex<Vec<Vec<u8>>>,
}

impl QueuedSubscription {
    fn push(&self, message: &OutboundMessage) {
        self.fragments
            .lock()
            .unwrap()
            .push(bincode::serialize(message).unwrap());
    }
}

impl Subscription for QueuedSubscription {
    fn poll(&mut self, limit: usize, on_fragment: &mut dyn FnMut(&[u8])) -> usize {
        let mut guard = self.fragments.lock().unwrap();
        let mut read = 0;
        while read < limit && !guard.is_empty() {
            on_fragment(&guard.remove(0));
            read += 1;
        }
        read
    }
}

struct NoopPositionSender;
impl PositionSender for NoopPositionSender {
    fn send(&self, _library_id: LibraryId, _position: i64) {}
}

#[derive(Default)]
struct NeverIndexed;
impl SequenceNumberIndex for NeverIndexed {
    fn last_known(&self, _session_id: SessionId, _kind: SequenceKind) -> Option<i64> {
        None
    }
    fn indexed_position(&self) -> i64 {
        i64::MAX
    }
}

#[derive(Default)]
struct SequentialSessionIds {
    next: AtomicI64,
}
impl SessionIdStrategy for SequentialSessionIds {
    fn on_logon(&mut self, _key: &CompositeKey) -> Result<SessionId, SessionIdError> {
        Ok(SessionId(self.next.fetch_add(1, Ordering::SeqCst) as u64 + 1))
    }
}

#[derive(Default)]
struct PanicOnErrorHandler;
impl ErrorHandler for PanicOnErrorHandler {
    fn on_error(&self, err: &GatewayError) {
        panic!("unexpected gateway error: {err}");
    }
}

/// This test's connections are plain acceptor connections; the ILink3
/// negotiate/establish handshake is only driven on the initiator path, so
/// the proxy this factory hands out is never called here.
struct NoopIlinkProxy;
impl IlinkProxy for NoopIlinkProxy {
    fn send_negotiate(&mut self, _request: &NegotiateRequest) -> Result<(), GatewayError> {
        Ok(())
    }
    fn send_establish(&mut self, _request: &EstablishRequest) -> Result<(), GatewayError> {
        Ok(())
    }
    fn send_terminate(&mut self, _request: &TerminateRequest) -> Result<(), GatewayError> {
        Ok(())
    }
    fn request_disconnect(&mut self, _reason: DisconnectReason) {}
    fn notify_unbound(&mut self) {}
}

struct NoopIlinkProxyFactory;
impl IlinkProxyFactory for NoopIlinkProxyFactory {
    fn create(&self, _connection_id: ConnectionId) -> Box<dyn IlinkProxy> {
        Box::new(NoopIlinkProxy)
    }
}

fn run_until<F: Fn(&mut Framer) -> bool>(framer: &mut Framer, max_passes: usize, done: F) {
    for _ in 0..max_passes {
        framer.do_work();
        if done(framer) {
            return;
        }
    }
    panic!("condition not satisfied within {max_passes} passes");
}

/// Fixed port for the integration test; bind_address must be explicit
/// since nothing here reads the listener's address back out of `Framer`.
const TEST_BIND: &str = "127.0.0.1:19999";

#[test]
fn accept_then_library_acquires_session_matches_literal_scenario() {
    let addr: SocketAddr = TEST_BIND.parse().unwrap();
    let mut config = FramerConfig::default();
    config.bind_address = Some(addr);

    let outbound = std::sync::Arc::new(QueuedSubscription::default());
    let inbound = std::sync::Arc::new(RecordingPublication::default());
    let deps = FramerDependencies {
        inbound: Box::new(ArcPublication(inbound.clone())),
        outbound: Box::new(ArcSubscription(outbound.clone())),
        replay: Box::new(QueuedSubscription::default()),
        position_sender: Box::new(NoopPositionSender),
        sequence_index: Box::new(NeverIndexed::default()),
        session_id_strategy: Box::new(SequentialSessionIds::default()),
        error_handler: Box::new(PanicOnErrorHandler),
        ilink_proxy_factory: Box::new(NoopIlinkProxyFactory),
    };

    let (_admin, admin_rx) = admin_channel(8);
    let mut framer = Framer::new(config, Box::new(SystemClock::new()), deps, admin_rx).unwrap();

    // Client connects; we don't send an ILink3 logon payload since SBE
    // decoding is out of scope for this crate (§4.1 accept handling takes
    // ownership of the connection at accept time regardless).
    let _client = StdTcpStream::connect(addr).unwrap();

    run_until(&mut framer, 50, |f| f.connection_count() > 0);
    assert_eq!(framer.connection_count(), 1);
    assert_eq!(framer.gateway_session_count(), 1);

    let session_id = framer.gateway_sessions().next().unwrap().session_id;
    assert_eq!(
        framer.gateway_sessions().next().unwrap().state,
        GatewaySessionState::Connected
    );

    // Library connects, then requests the session the gateway is holding.
    outbound.push(&OutboundMessage::LibraryConnect {
        library_id: LibraryId(7),
        correlation_id: CorrelationId(1),
        publication_channel_id: 1,
    });
    outbound.push(&OutboundMessage::RequestSession {
        library_id: LibraryId(7),
        session_id,
        correlation_id: CorrelationId(42),
        replay_from_sequence_number: -1,
    });

    run_until(&mut framer, 50, |f| f.library_count() == 1 && f.gateway_session_count() == 0);

    assert_eq!(framer.library_count(), 1);
    assert_eq!(framer.gateway_session_count(), 0, "session handed to the library");

    // The session moving off the gateway pool only means `on_request_session`
    // ran; its `RequestSessionReply` transaction still has continuations left
    // to retry (RetryManager advances one continuation per pending
    // transaction per pass). Drain those before reading the published frames.
    for _ in 0..20 {
        framer.do_work();
    }

    let frames = inbound.frames.lock().unwrap();
    assert_eq!(
        frames.len(),
        6,
        "expected the literal §8 accept+logon+release scenario, got {frames:?}"
    );

    match &frames[0] {
        InboundMessage::Connect { .. } => {}
        other => panic!("frame 0: expected Connect, got {other:?}"),
    }
    match &frames[1] {
        InboundMessage::ManageConnection { library_id, .. } => {
            assert_eq!(*library_id, gateway::ids::GATEWAY_LIBRARY_ID);
        }
        other => panic!("frame 1: expected ManageConnection(gateway), got {other:?}"),
    }
    match &frames[2] {
        InboundMessage::Logon { status, library_id, .. } => {
            assert_eq!(*status, LogonStatus::New);
            assert_eq!(*library_id, gateway::ids::GATEWAY_LIBRARY_ID);
        }
        other => panic!("frame 2: expected Logon(New) to the gateway, got {other:?}"),
    }
    match &frames[3] {
        InboundMessage::ManageConnection { library_id, .. } => {
            assert_eq!(*library_id, LibraryId(7));
        }
        other => panic!("frame 3: expected ManageConnection(library 7), got {other:?}"),
    }
    match &frames[4] {
        InboundMessage::Logon { status, library_id, .. } => {
            assert_eq!(*status, LogonStatus::New);
            assert_eq!(*library_id, LibraryId(7));
        }
        other => panic!("frame 4: expected Logon(New) to library 7, got {other:?}"),
    }
    match &frames[5] {
        InboundMessage::RequestSessionReply { status, correlation_id } => {
            assert_eq!(*status, SessionReplyStatus::Ok);
            assert_eq!(*correlation_id, CorrelationId(42));
        }
        other => panic!("frame 5: expected RequestSessionReply(Ok, 42), got {other:?}"),
    }
}

struct ArcSubscription(std::sync::Arc<QueuedSubscription>);
impl Subscription for ArcSubscription {
    fn poll(&mut self, limit: usize, on_fragment: &mut dyn FnMut(&[u8])) -> usize {
        let mut guard = self.0.fragments.lock().unwrap();
        let mut read = 0;
        while read < limit && !guard.is_empty() {
            on_fragment(&guard.remove(0));
            read += 1;
        }
        read
    }
}

struct ArcPublication(std::sync::Arc<RecordingPublication>);
impl Publication for ArcPublication {
    fn offer(&mut self, frame: &[u8]) -> PublishResult {
        let decoded: InboundMessage = bincode::deserialize(frame).expect("valid inbound frame");
        self.0.frames.lock().unwrap().push(decoded);
        let position = self.0.position.fetch_add(1, Ordering::SeqCst) + 1;
        PublishResult::Position(position)
    }

    fn position(&self) -> i64 {
        self.0.position.load(Ordering::SeqCst)
    }
}

