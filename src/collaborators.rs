//! Trait seams for collaborators that live outside this crate: the SBE
//! codec, the persistent sequence-number index, the replay engine, the
//! outbound shared-memory log transport, the session-id/persistence store,
//! and metrics sinks. Only their interfaces are specified here, so the
//! worker stays testable against in-memory doubles without pulling in a
//! real wire codec or persistence layer.

use crate::error::GatewayError;
use crate::ids::{LibraryId, SessionId};

/// Result of offering a frame to a [`Publication`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishResult {
    /// Accepted; the log position after this frame.
    Position(i64),
    /// Rejected for now — transient, retry the same frame later.
    BackPressured,
}

/// The in-process publish/subscribe log the worker writes control and
/// session frames to (the inbound publication stream).
pub trait Publication: Send {
    fn offer(&mut self, frame: &[u8]) -> PublishResult;

    /// Current write position, used by [`PositionSender`] broadcasts.
    fn position(&self) -> i64;
}

/// A stream the worker reads from: the outbound library stream or the
/// replay stream. `poll` hands each available fragment to `on_fragment`
/// and returns the number of fragments consumed, bounded by `limit`.
pub trait Subscription: Send {
    fn poll(&mut self, limit: usize, on_fragment: &mut dyn FnMut(&[u8])) -> usize;
}

/// Broadcasts the current outbound-library-stream position to each
/// per-library image whenever new fragments were read from the primary
/// stream, so libraries can tell how far the shared log has advanced.
pub trait PositionSender: Send {
    fn send(&self, library_id: LibraryId, position: i64);
}

/// Which sequence-number series a [`SequenceNumberIndex`] lookup is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    Sent,
    Received,
}

/// The external persistent sequence-number index; only its read interface
/// is used by the core.
pub trait SequenceNumberIndex: Send {
    /// Last known sequence number for `session_id`, or `None` if the
    /// session has never logged in. A gateway session is considered
    /// active exactly when this returns a non-negative number for its
    /// received-sequence series.
    fn last_known(&self, session_id: SessionId, kind: SequenceKind) -> Option<i64>;

    /// The position this index has indexed up to. Used by
    /// `awaiting_indexing_up_to` to cooperatively wait for the index to
    /// catch up to a publication position before reading sequence numbers.
    fn indexed_position(&self) -> i64;
}

/// Error reported by [`SessionIdStrategy::on_logon`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionIdError {
    /// The composite key already maps to a different session id.
    Duplicate,
}

/// The external session-id allocator / persistence store. Given a
/// composite key, returns the `session_id` to use, rejecting a genuine
/// duplicate.
pub trait SessionIdStrategy: Send {
    fn on_logon(&mut self, key: &crate::gateway_session::CompositeKey) -> Result<SessionId, SessionIdError>;
}

/// The external error-handler callback: internal failures never propagate
/// out of `Framer::do_work`; they convert to a published error frame plus
/// a call to this hook.
pub trait ErrorHandler: Send {
    fn on_error(&self, err: &GatewayError);
}

/// Builds the per-connection [`IlinkProxy`](crate::ilink::IlinkProxy) the
/// worker drives an `IlinkSession` through. SBE encoding and the actual
/// wire write live outside this crate; this seam is how a real deployment
/// plugs that codec in without `Framer` knowing about it.
pub trait IlinkProxyFactory: Send {
    fn create(&self, connection_id: crate::ids::ConnectionId) -> Box<dyn crate::ilink::IlinkProxy>;
}

/// The idle hook the external driver applies when `do_work()` returns
/// zero, and that `awaiting_indexing_up_to` spins between index re-reads —
/// the only cooperative yield point in the worker's loop.
pub trait IdleStrategy: Send + Sync {
    fn idle(&self, work_done: usize);
}

/// Spins without yielding. Appropriate for dedicated-core low-latency
/// deployments; the default for [`FramerConfig`](crate::config::FramerConfig).
pub struct BusySpinIdleStrategy;

impl IdleStrategy for BusySpinIdleStrategy {
    fn idle(&self, work_done: usize) {
        if work_done == 0 {
            std::hint::spin_loop();
        }
    }
}

/// Parks the current thread for a fixed duration when idle. Friendlier to
/// shared hosts at the cost of latency.
pub struct ParkNanosIdleStrategy {
    pub nanos: u64,
}

impl IdleStrategy for ParkNanosIdleStrategy {
    fn idle(&self, work_done: usize) {
        if work_done == 0 {
            std::thread::sleep(std::time::Duration::from_nanos(self.nanos));
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// An in-memory [`Publication`] that can be told to back-pressure the
    /// next N offers, for exercising retry behavior deterministically.
    #[derive(Default)]
    pub struct InMemoryPublication {
        pub frames: Vec<Vec<u8>>,
        pub back_pressure_remaining: usize,
        position: i64,
    }

    impl InMemoryPublication {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn back_pressure_next(mut self, n: usize) -> Self {
            self.back_pressure_remaining = n;
            self
        }
    }

    impl Publication for InMemoryPublication {
        fn offer(&mut self, frame: &[u8]) -> PublishResult {
            if self.back_pressure_remaining > 0 {
                self.back_pressure_remaining -= 1;
                return PublishResult::BackPressured;
            }
            self.frames.push(frame.to_vec());
            self.position += frame.len() as i64;
            PublishResult::Position(self.position)
        }

        fn position(&self) -> i64 {
            self.position
        }
    }

    /// An in-memory [`Subscription`] backed by a queue of pre-loaded
    /// fragments.
    #[derive(Default)]
    pub struct InMemorySubscription {
        pub fragments: VecDeque<Vec<u8>>,
    }

    impl InMemorySubscription {
        pub fn new(fragments: Vec<Vec<u8>>) -> Self {
            Self {
                fragments: fragments.into(),
            }
        }
    }

    impl Subscription for InMemorySubscription {
        fn poll(&mut self, limit: usize, on_fragment: &mut dyn FnMut(&[u8])) -> usize {
            let mut read = 0;
            while read < limit {
                match self.fragments.pop_front() {
                    Some(frame) => {
                        on_fragment(&frame);
                        read += 1;
                    }
                    None => break,
                }
            }
            read
        }
    }

    /// Records every `(library_id, position)` broadcast for assertions.
    #[derive(Default)]
    pub struct RecordingPositionSender {
        pub sent: Mutex<Vec<(LibraryId, i64)>>,
    }

    impl PositionSender for RecordingPositionSender {
        fn send(&self, library_id: LibraryId, position: i64) {
            self.sent.lock().unwrap().push((library_id, position));
        }
    }

    /// A [`SequenceNumberIndex`] backed by a fixed map, always fully
    /// indexed.
    #[derive(Default)]
    pub struct FixedSequenceIndex {
        pub sent: std::collections::HashMap<u64, i64>,
        pub received: std::collections::HashMap<u64, i64>,
        pub position: i64,
    }

    impl SequenceNumberIndex for FixedSequenceIndex {
        fn last_known(&self, session_id: SessionId, kind: SequenceKind) -> Option<i64> {
            match kind {
                SequenceKind::Sent => self.sent.get(&session_id.0).copied(),
                SequenceKind::Received => self.received.get(&session_id.0).copied(),
            }
        }

        fn indexed_position(&self) -> i64 {
            self.position
        }
    }

    /// A [`SessionIdStrategy`] that allocates sequentially and rejects a
    /// composite key it has already seen.
    #[derive(Default)]
    pub struct SequentialSessionIdStrategy {
        pub next: u64,
        pub allocated: std::collections::HashMap<crate::gateway_session::CompositeKey, SessionId>,
    }

    impl SessionIdStrategy for SequentialSessionIdStrategy {
        fn on_logon(
            &mut self,
            key: &crate::gateway_session::CompositeKey,
        ) -> Result<SessionId, SessionIdError> {
            if let Some(existing) = self.allocated.get(key) {
                return Ok(*existing);
            }
            self.next += 1;
            let id = SessionId(self.next);
            self.allocated.insert(key.clone(), id);
            Ok(id)
        }
    }

    /// Records every reported error for assertions.
    #[derive(Default)]
    pub struct RecordingErrorHandler {
        pub errors: Mutex<Vec<String>>,
    }

    impl ErrorHandler for RecordingErrorHandler {
        fn on_error(&self, err: &GatewayError) {
            self.errors.lock().unwrap().push(err.to_string());
        }
    }

    /// An idle strategy that counts how many times it was invoked while
    /// idle, for assertions, without actually sleeping.
    #[derive(Default)]
    pub struct CountingIdleStrategy {
        pub idle_calls: std::sync::atomic::AtomicUsize,
    }

    impl IdleStrategy for CountingIdleStrategy {
        fn idle(&self, work_done: usize) {
            if work_done == 0 {
                self.idle_calls
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }
    }

    /// An [`crate::ilink::IlinkProxy`] that records every call instead of
    /// touching a socket.
    #[derive(Default)]
    pub struct RecordingIlinkProxy {
        pub negotiates: Vec<crate::ilink::NegotiateRequest>,
        pub establishes: Vec<crate::ilink::EstablishRequest>,
        pub terminates: Vec<crate::ilink::TerminateRequest>,
        pub disconnects: Vec<crate::messages::DisconnectReason>,
        pub unbound_calls: usize,
    }

    impl crate::ilink::IlinkProxy for RecordingIlinkProxy {
        fn send_negotiate(&mut self, request: &crate::ilink::NegotiateRequest) -> Result<(), GatewayError> {
            self.negotiates.push(request.clone());
            Ok(())
        }
        fn send_establish(&mut self, request: &crate::ilink::EstablishRequest) -> Result<(), GatewayError> {
            self.establishes.push(request.clone());
            Ok(())
        }
        fn send_terminate(&mut self, request: &crate::ilink::TerminateRequest) -> Result<(), GatewayError> {
            self.terminates.push(request.clone());
            Ok(())
        }
        fn request_disconnect(&mut self, reason: crate::messages::DisconnectReason) {
            self.disconnects.push(reason);
        }
        fn notify_unbound(&mut self) {
            self.unbound_calls += 1;
        }
    }

    /// Hands out a fresh [`RecordingIlinkProxy`] per connection and keeps a
    /// handle to each one, keyed by `connection_id`, for assertions.
    #[derive(Default)]
    pub struct RecordingIlinkProxyFactory {
        pub created: Mutex<std::collections::HashMap<u64, std::sync::Arc<Mutex<RecordingIlinkProxy>>>>,
    }

    impl RecordingIlinkProxyFactory {
        pub fn proxy_for(&self, connection_id: crate::ids::ConnectionId) -> Option<std::sync::Arc<Mutex<RecordingIlinkProxy>>> {
            self.created.lock().unwrap().get(&connection_id.0).cloned()
        }
    }

    struct SharedIlinkProxy(std::sync::Arc<Mutex<RecordingIlinkProxy>>);

    impl crate::ilink::IlinkProxy for SharedIlinkProxy {
        fn send_negotiate(&mut self, request: &crate::ilink::NegotiateRequest) -> Result<(), GatewayError> {
            self.0.lock().unwrap().send_negotiate(request)
        }
        fn send_establish(&mut self, request: &crate::ilink::EstablishRequest) -> Result<(), GatewayError> {
            self.0.lock().unwrap().send_establish(request)
        }
        fn send_terminate(&mut self, request: &crate::ilink::TerminateRequest) -> Result<(), GatewayError> {
            self.0.lock().unwrap().send_terminate(request)
        }
        fn request_disconnect(&mut self, reason: crate::messages::DisconnectReason) {
            self.0.lock().unwrap().request_disconnect(reason)
        }
        fn notify_unbound(&mut self) {
            self.0.lock().unwrap().notify_unbound()
        }
    }

    impl IlinkProxyFactory for RecordingIlinkProxyFactory {
        fn create(&self, connection_id: crate::ids::ConnectionId) -> Box<dyn crate::ilink::IlinkProxy> {
            let proxy = std::sync::Arc::new(Mutex::new(RecordingIlinkProxy::default()));
            self.created.lock().unwrap().insert(connection_id.0, proxy.clone());
            Box::new(SharedIlinkProxy(proxy))
        }
    }
}
