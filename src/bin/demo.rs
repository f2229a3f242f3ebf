//! Minimal driver: binds a listening socket, wires stand-in collaborators
//! for every out-of-scope external system (publication log, sequence-number
//! index, session-id allocator), and calls `Framer::do_work()` in a loop
//! with a busy-spin idle strategy until the operator presses Enter.
//!
//! The real collaborators (SBE codec, persistent sequence-number index,
//! replay engine, shared-memory transport, session-id store) are someone
//! else's crate; this binary exists to exercise the Framer end to end
//! against a real TCP listener, not to be a production entrypoint.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use gateway::collaborators::{
    ErrorHandler, IdleStrategy, IlinkProxyFactory, PositionSender, PublishResult, Publication,
    SequenceKind, SequenceNumberIndex, SessionIdError, SessionIdStrategy, Subscription,
};
use gateway::config::FramerConfig;
use gateway::error::{GatewayError, Result};
use gateway::framer::admin::admin_channel;
use gateway::gateway_session::CompositeKey;
use gateway::ids::{ConnectionId, LibraryId, SessionId};
use gateway::ilink::{EstablishRequest, IlinkProxy, NegotiateRequest, TerminateRequest};
use gateway::messages::DisconnectReason;
use gateway::{Framer, FramerDependencies, SystemClock};

/// Prints every offered frame's length instead of handing it to a real
/// shared-memory log.
struct LoggingPublication {
    position: AtomicI64,
}

impl Publication for LoggingPublication {
    fn offer(&mut self, frame: &[u8]) -> PublishResult {
        let position = self.position.fetch_add(frame.len() as i64, Ordering::SeqCst) + frame.len() as i64;
        println!("inbound: {} bytes, position now {position}", frame.len());
        PublishResult::Position(position)
    }

    fn position(&self) -> i64 {
        self.position.load(Ordering::SeqCst)
    }
}

/// No library is driving the outbound/replay streams in this demo, so both
/// always report nothing available.
struct EmptySubscription;

impl Subscription for EmptySubscription {
    fn poll(&mut self, _limit: usize, _on_fragment: &mut dyn FnMut(&[u8])) -> usize {
        0
    }
}

struct LoggingPositionSender;

impl PositionSender for LoggingPositionSender {
    fn send(&self, library_id: LibraryId, position: i64) {
        println!("position broadcast: library={} position={position}", library_id.0);
    }
}

/// No session has ever logged in from this process's point of view; every
/// accepted connection is treated as brand new.
struct NeverIndexed;

impl SequenceNumberIndex for NeverIndexed {
    fn last_known(&self, _session_id: SessionId, _kind: SequenceKind) -> Option<i64> {
        None
    }

    fn indexed_position(&self) -> i64 {
        i64::MAX
    }
}

/// Allocates session ids sequentially; never rejects a key as duplicate,
/// since this demo never handles more than one connection at a time.
struct SequentialSessionIds {
    next: AtomicI64,
}

impl SessionIdStrategy for SequentialSessionIds {
    fn on_logon(&mut self, _key: &CompositeKey) -> Result<SessionId, SessionIdError> {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(SessionId(id as u64))
    }
}

struct StderrErrorHandler;

impl ErrorHandler for StderrErrorHandler {
    fn on_error(&self, err: &GatewayError) {
        eprintln!("gateway error: {err}");
    }
}

/// Prints every ILink3 request instead of encoding it to SBE and writing
/// it to a socket.
struct LoggingIlinkProxy {
    connection_id: ConnectionId,
}

impl IlinkProxy for LoggingIlinkProxy {
    fn send_negotiate(&mut self, request: &NegotiateRequest) -> Result<()> {
        println!("ilink[{}]: negotiate uuid={}", self.connection_id.0, request.uuid);
        Ok(())
    }

    fn send_establish(&mut self, request: &EstablishRequest) -> Result<()> {
        println!("ilink[{}]: establish uuid={}", self.connection_id.0, request.uuid);
        Ok(())
    }

    fn send_terminate(&mut self, request: &TerminateRequest) -> Result<()> {
        println!("ilink[{}]: terminate uuid={}", self.connection_id.0, request.uuid);
        Ok(())
    }

    fn request_disconnect(&mut self, reason: DisconnectReason) {
        println!("ilink[{}]: disconnect requested ({reason:?})", self.connection_id.0);
    }

    fn notify_unbound(&mut self) {
        println!("ilink[{}]: unbound", self.connection_id.0);
    }
}

struct LoggingIlinkProxyFactory;

impl IlinkProxyFactory for LoggingIlinkProxyFactory {
    fn create(&self, connection_id: ConnectionId) -> Box<dyn IlinkProxy> {
        Box::new(LoggingIlinkProxy { connection_id })
    }
}

fn main() {
    let bind_address: SocketAddr = "127.0.0.1:9999".parse().expect("static address parses");

    let mut config = FramerConfig::default();
    config.bind_address = Some(bind_address);

    let deps = FramerDependencies {
        inbound: Box::new(LoggingPublication { position: AtomicI64::new(0) }),
        outbound: Box::new(EmptySubscription),
        replay: Box::new(EmptySubscription),
        position_sender: Box::new(LoggingPositionSender),
        sequence_index: Box::new(NeverIndexed),
        session_id_strategy: Box::new(SequentialSessionIds { next: AtomicI64::new(1) }),
        error_handler: Box::new(StderrErrorHandler),
        ilink_proxy_factory: Box::new(LoggingIlinkProxyFactory),
    };

    let (_admin_handle, admin_rx) = admin_channel(16);
    let mut framer = match Framer::new(config, Box::new(SystemClock::new()), deps, admin_rx) {
        Ok(framer) => framer,
        Err(err) => {
            eprintln!("failed to bind {bind_address}: {err}");
            return;
        }
    };

    println!("listening on {bind_address}; press Enter to stop");

    let idle = Arc::new(gateway::collaborators::BusySpinIdleStrategy);
    let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
    {
        let running = running.clone();
        std::thread::spawn(move || {
            let mut input = String::new();
            let _ = io::stdin().read_line(&mut input);
            running.store(false, Ordering::SeqCst);
        });
    }

    while running.load(Ordering::SeqCst) {
        let work = framer.do_work();
        idle.idle(work);
    }

    println!("stopped");
}
