//! The Framer: single-owner cooperative worker that drives every other
//! component in this crate.
//!
//! One public entry point, [`Framer::do_work`], performs one pass over all
//! work sources in the fixed order spelled out below and returns the total
//! units of work done in that pass. It never blocks: every sub-step is
//! either already non-blocking (socket I/O, publication offers) or bounded
//! by a configured per-pass limit.
//!
//! Work-loop order, fixed:
//! 1. `retry_manager.attempt_steps()`
//! 2. `send_outbound_messages()`
//! 3. `send_replay_messages()`
//! 4. `poll_end_points()`
//! 5. `poll_new_connections()`
//! 6. `poll_libraries()`
//! 7. `poll_gateway_sessions()`
//! 8. `drain_admin_commands()`
//!
//! Retry steps run first so back-pressured work gets a chance to drain
//! before more is enqueued; outbound drains before inbound so pressure
//! doesn't compound.

pub mod admin;
mod continuations;

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use mio::net::{TcpListener, TcpStream};

use crate::clock::Clock;
use crate::collaborators::{
    ErrorHandler, IdleStrategy, IlinkProxyFactory, PositionSender, Publication, PublishResult, SequenceKind,
    SequenceNumberIndex, SessionIdError, SessionIdStrategy, Subscription,
};
use crate::config::FramerConfig;
use crate::connection::{self, Connection, ConnectionDirection};
use crate::endpoint::{EndpointTable, ReadOutcome, SBE_FRAME_HEADER_LEN};
use crate::error::{GatewayError, Result};
use crate::gateway_session::{CompositeKey, GatewaySession, GatewaySessionPool, GatewaySessionState};
use crate::ids::{ConnectionId, ConnectionIdSequence, CorrelationId, CorrelationIdSequence, GATEWAY_LIBRARY_ID, LibraryId, SessionId};
use crate::ilink::{IlinkSession, IlinkSessionConfig};
use crate::library::{DuplicateLibraryId, LibraryInfo, LibraryRegistry};
use crate::messages::{self, DisconnectReason, ErrorKind, InboundMessage, LogonStatus, OutboundMessage, SessionReplyStatus};
use crate::retry::{RetryManager, Transaction};

use admin::AdminCommand;
use continuations::SaveFrame;

/// The external collaborators a [`Framer`] is constructed with: the
/// publish/subscribe log, the replay engine, the sequence-number index, the
/// session-id allocator, and the error-handler hook. Grouped into one
/// struct so `Framer::new` doesn't take seven positional trait-object
/// arguments.
pub struct FramerDependencies {
    pub inbound: Box<dyn Publication>,
    pub outbound: Box<dyn Subscription>,
    pub replay: Box<dyn Subscription>,
    pub position_sender: Box<dyn PositionSender>,
    pub sequence_index: Box<dyn SequenceNumberIndex>,
    pub session_id_strategy: Box<dyn SessionIdStrategy>,
    pub error_handler: Box<dyn ErrorHandler>,
    pub ilink_proxy_factory: Box<dyn IlinkProxyFactory>,
}

/// Single-owner cooperative worker. See module docs for the work-loop order.
pub struct Framer {
    config: FramerConfig,
    clock: Box<dyn Clock>,
    idle_strategy: Arc<dyn IdleStrategy>,

    connection_id_seq: ConnectionIdSequence,
    internal_correlation_seq: CorrelationIdSequence,

    listener: Option<TcpListener>,
    connections: HashMap<ConnectionId, Connection>,
    endpoints: EndpointTable,
    libraries: LibraryRegistry,
    gateway_sessions: GatewaySessionPool,
    retry_manager: RetryManager,
    ilink_sessions: HashMap<ConnectionId, IlinkSession>,
    ilink_proxy_factory: Box<dyn IlinkProxyFactory>,

    /// Replay fragments offered to `inbound` that back-pressured; retried
    /// ahead of freshly-read ones on the next pass so nothing is dropped.
    replay_pending: VecDeque<Vec<u8>>,

    inbound: Box<dyn Publication>,
    outbound: Box<dyn Subscription>,
    replay: Box<dyn Subscription>,
    position_sender: Box<dyn PositionSender>,
    sequence_index: Box<dyn SequenceNumberIndex>,
    session_id_strategy: Box<dyn SessionIdStrategy>,
    error_handler: Box<dyn ErrorHandler>,

    admin_rx: Receiver<AdminCommand>,
}

impl Framer {
    pub fn new(
        config: FramerConfig,
        clock: Box<dyn Clock>,
        deps: FramerDependencies,
        admin_rx: Receiver<AdminCommand>,
    ) -> Result<Self> {
        let listener = match config.bind_address {
            Some(addr) => Some(TcpListener::bind(addr)?),
            None => None,
        };
        let idle_strategy = config.idle_strategy.clone();

        Ok(Self {
            config,
            clock,
            idle_strategy,
            connection_id_seq: ConnectionIdSequence::new(),
            internal_correlation_seq: CorrelationIdSequence::new(),
            listener,
            connections: HashMap::new(),
            endpoints: EndpointTable::new(),
            libraries: LibraryRegistry::new(),
            gateway_sessions: GatewaySessionPool::new(),
            retry_manager: RetryManager::new(),
            ilink_sessions: HashMap::new(),
            ilink_proxy_factory: deps.ilink_proxy_factory,
            replay_pending: VecDeque::new(),
            inbound: deps.inbound,
            outbound: deps.outbound,
            replay: deps.replay,
            position_sender: deps.position_sender,
            sequence_index: deps.sequence_index,
            session_id_strategy: deps.session_id_strategy,
            error_handler: deps.error_handler,
            admin_rx,
        })
    }

    /// Performs one pass over every work source. Never blocks; returns the
    /// total units of work performed, used by the external driver to decide
    /// whether to idle.
    pub fn do_work(&mut self) -> usize {
        let now_ms = self.clock.now_ms();

        let mut work = 0;
        work += self.attempt_retries();
        work += self.send_outbound_messages();
        work += self.send_replay_messages();
        work += self.poll_end_points();
        work += self.poll_new_connections(now_ms);
        work += self.poll_libraries(now_ms);
        work += self.poll_gateway_sessions(now_ms);
        work += self.drain_admin_commands();
        work
    }

    // ---- introspection, mostly for tests and admin queries ----

    pub fn gateway_session_count(&self) -> usize {
        self.gateway_sessions.len()
    }

    pub fn library_count(&self) -> usize {
        self.libraries.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn gateway_sessions(&self) -> impl Iterator<Item = &GatewaySession> {
        self.gateway_sessions.iter()
    }

    // ---- 1. retry ----

    fn attempt_retries(&mut self) -> usize {
        let inbound = &mut *self.inbound;
        let error_handler = &self.error_handler;
        self.retry_manager.attempt_steps(inbound, |err| {
            tracing::error!(error = %err, "transaction aborted");
            error_handler.on_error(&err);
        })
    }

    // ---- 2. outbound library stream ----

    fn send_outbound_messages(&mut self) -> usize {
        let limit = self.config.outbound_library_fragment_limit;
        let mut fragments = Vec::new();
        let read = self.outbound.poll(limit, &mut |frame| fragments.push(frame.to_vec()));

        let mut work = 0;
        for frame in fragments {
            match messages::decode_outbound(&frame) {
                Ok(message) => {
                    self.handle_outbound_message(message);
                    work += 1;
                }
                Err(err) => self.report_error(err),
            }
        }

        work += self.flush_slow_senders();

        if read > 0 {
            let position = self.inbound.position();
            let library_ids: Vec<LibraryId> = self.libraries.iter().map(|lib| lib.library_id).collect();
            for library_id in library_ids {
                self.position_sender.send(library_id, position);
            }
        }

        work
    }

    fn flush_slow_senders(&mut self) -> usize {
        let slow = self.endpoints.slow_connection_ids();
        let mut flushed = 0;
        for connection_id in slow {
            let Some(connection) = self.connections.get_mut(&connection_id) else {
                continue;
            };
            let Some(sender) = self.endpoints.sender_mut(connection_id) else {
                continue;
            };
            match sender.flush(&mut connection.stream) {
                Ok(()) => flushed += 1,
                Err(err) => self.report_error(err),
            }
        }
        flushed
    }

    fn handle_outbound_message(&mut self, message: OutboundMessage) {
        match message {
            OutboundMessage::InitiateConnection {
                library_id,
                correlation_id,
                address,
                key,
                username,
                password,
                heartbeat_interval_s,
            } => self.on_initiate_connection(
                library_id,
                correlation_id,
                address,
                key,
                username,
                password,
                heartbeat_interval_s,
            ),
            OutboundMessage::RequestDisconnect { connection_id, reason } => {
                self.handle_request_disconnect(connection_id, reason);
            }
            OutboundMessage::LibraryConnect {
                library_id,
                correlation_id,
                publication_channel_id,
            } => self.on_library_connect(library_id, correlation_id, publication_channel_id),
            OutboundMessage::ApplicationHeartbeat { library_id } => {
                self.on_application_heartbeat(library_id);
            }
            OutboundMessage::ReleaseSession { session_id, correlation_id } => {
                self.on_release_session(session_id, correlation_id);
            }
            OutboundMessage::RequestSession {
                library_id,
                session_id,
                correlation_id,
                replay_from_sequence_number,
            } => self.on_request_session(library_id, session_id, correlation_id, replay_from_sequence_number),
            OutboundMessage::SessionMessage { connection_id, payload } => {
                self.write_session_message(connection_id, &payload);
            }
        }
    }

    fn write_session_message(&mut self, connection_id: ConnectionId, payload: &[u8]) {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            tracing::warn!(connection_id = connection_id.0, "session message for unknown connection dropped");
            return;
        };
        let Some(sender) = self.endpoints.sender_mut(connection_id) else {
            return;
        };

        let total_len = (SBE_FRAME_HEADER_LEN + payload.len()) as u16;
        let mut frame = Vec::with_capacity(total_len as usize);
        frame.extend_from_slice(&total_len.to_le_bytes());
        frame.extend_from_slice(&[0u8; SBE_FRAME_HEADER_LEN - 2]);
        frame.extend_from_slice(payload);

        if let Err(err) = sender.write(&mut connection.stream, &frame) {
            self.report_error(err);
        }
    }

    fn handle_request_disconnect(&mut self, connection_id: ConnectionId, reason: DisconnectReason) {
        tracing::info!(connection_id = connection_id.0, ?reason, "disconnect requested");
        self.disconnect_connection(connection_id);
    }

    /// On `on_initiate_connection`: validate the library, open a
    /// non-blocking socket, allocate a `session_id` via the id strategy,
    /// register endpoints, drive an `IlinkSession` through Negotiate, then
    /// enqueue the two-step `save_manage_connection` / `save_logon`
    /// transaction.
    #[allow(clippy::too_many_arguments)]
    fn on_initiate_connection(
        &mut self,
        library_id: LibraryId,
        correlation_id: CorrelationId,
        address: String,
        key: CompositeKey,
        username: String,
        password: String,
        heartbeat_interval_s: u32,
    ) {
        if !self.libraries.contains(library_id) {
            self.publish_error(ErrorKind::UnknownLibrary, Some(library_id), Some(correlation_id), String::new());
            return;
        }

        let socket_addr: SocketAddr = match address.parse() {
            Ok(addr) => addr,
            Err(err) => {
                self.publish_error(ErrorKind::UnableToConnect, Some(library_id), Some(correlation_id), err.to_string());
                return;
            }
        };

        // The password carries the user's base64url HMAC secret; decoded
        // up front so a malformed secret fails before any socket or
        // session state is created, same as the other validations above.
        let hmac_key = match crate::ilink::hmac_sign::decode_secret(&password) {
            Ok(key) => key,
            Err(err) => {
                self.publish_error(ErrorKind::Exception, Some(library_id), Some(correlation_id), err.to_string());
                return;
            }
        };

        // mio's connect begins a non-blocking handshake; on a loopback
        // address used throughout this crate's tests the connection
        // establishes synchronously enough that a subsequent `Ok` means
        // "connected" for our purposes. A deployment dialing a real WAN
        // endpoint would need to confirm via a writable-readiness event;
        // that belongs to the out-of-scope transport layer, not here.
        let stream = match TcpStream::connect(socket_addr) {
            Ok(stream) => stream,
            Err(err) => {
                self.publish_error(ErrorKind::UnableToConnect, Some(library_id), Some(correlation_id), err.to_string());
                return;
            }
        };
        if let Err(err) = connection::configure_socket(
            &stream,
            self.config.receiver_socket_buffer_size,
            self.config.sender_socket_buffer_size,
        ) {
            self.publish_error(ErrorKind::UnableToConnect, Some(library_id), Some(correlation_id), err.to_string());
            return;
        }

        let session_id = match self.session_id_strategy.on_logon(&key) {
            Ok(id) => id,
            Err(SessionIdError::Duplicate) => {
                self.publish_error(ErrorKind::DuplicateSession, Some(library_id), Some(correlation_id), String::new());
                return;
            }
        };

        let connection_id = self.connection_id_seq.next();
        let now_ms = self.clock.now_ms();
        let connection = Connection::new(connection_id, stream, address, ConnectionDirection::Initiator, now_ms);
        self.connections.insert(connection_id, connection);
        self.endpoints.insert(connection_id);

        // Cooperative wait for the sent-sequence index to have indexed up
        // to the current inbound position before trusting its reading —
        // the only suspension point in the worker's loop (§5).
        let inbound_position = self.inbound.position();
        self.await_indexing_up_to(inbound_position);

        let last_sent = self.sequence_index.last_known(session_id, SequenceKind::Sent).unwrap_or(-1);
        let last_received = self.sequence_index.last_known(session_id, SequenceKind::Received).unwrap_or(-1);
        let status = if last_received >= 0 { LogonStatus::Existing } else { LogonStatus::New };

        let ilink_config = IlinkSessionConfig {
            connection_id,
            session_id: username.clone(),
            firm_id: key.sender_comp_id.clone(),
            trading_system_name: self.config.trading_system_name.clone(),
            trading_system_version: self.config.trading_system_version.clone(),
            trading_system_vendor: self.config.trading_system_vendor.clone(),
            keep_alive_interval_s: heartbeat_interval_s,
            initial_sent_sequence_number: self.config.ilink_initial_sequence_number,
            hmac_key,
        };

        let session = GatewaySession::new(
            session_id,
            connection_id,
            key,
            username,
            password,
            heartbeat_interval_s,
            last_sent,
            last_received,
        );
        self.gateway_sessions.insert(session);
        if let Some(connection) = self.connections.get_mut(&connection_id) {
            connection.bind_session(session_id);
        }

        let proxy = self.ilink_proxy_factory.create(connection_id);
        let mut ilink_session = IlinkSession::new(self.clock.as_ref(), ilink_config, proxy);
        if let Err(err) = ilink_session.send_negotiate(self.clock.as_ref()) {
            self.report_error(err);
        }
        self.ilink_sessions.insert(connection_id, ilink_session);

        self.enqueue_transaction(
            correlation_id,
            vec![
                SaveFrame::manage_connection(connection_id, library_id),
                SaveFrame::logon(library_id, connection_id, session_id, last_sent, last_received, status),
            ],
        );
    }

    // ---- ILink3 negotiate/establish/terminate driving ----
    //
    // These are called by the external SBE decoder once it has parsed a
    // Negotiation Response, Establishment Ack, Terminate, or reject off
    // the wire for `connection_id`. Decoding itself is out of scope here;
    // this is the callback surface it drives the session through.

    pub fn on_ilink_negotiation_response(&mut self, connection_id: ConnectionId, response_uuid: u64) {
        let clock = self.clock.as_ref();
        let Some(session) = self.ilink_sessions.get_mut(&connection_id) else {
            tracing::warn!(connection_id = connection_id.0, "negotiation response for unknown ilink session");
            return;
        };
        if let Err(err) = session.on_negotiation_response(clock, response_uuid) {
            self.report_error(err);
        }
    }

    pub fn on_ilink_establishment_ack(&mut self, connection_id: ConnectionId, response_uuid: u64) {
        let Some(session) = self.ilink_sessions.get_mut(&connection_id) else {
            tracing::warn!(connection_id = connection_id.0, "establishment ack for unknown ilink session");
            return;
        };
        if let Err(err) = session.on_establishment_ack(response_uuid) {
            self.report_error(err);
        }
    }

    pub fn on_ilink_terminate(&mut self, connection_id: ConnectionId) {
        let clock = self.clock.as_ref();
        let Some(session) = self.ilink_sessions.get_mut(&connection_id) else {
            tracing::warn!(connection_id = connection_id.0, "terminate for unknown ilink session");
            return;
        };
        if let Err(err) = session.on_terminate(clock) {
            self.report_error(err);
        }
    }

    pub fn on_ilink_reject(&mut self, connection_id: ConnectionId) {
        let Some(session) = self.ilink_sessions.get_mut(&connection_id) else {
            tracing::warn!(connection_id = connection_id.0, "reject for unknown ilink session");
            return;
        };
        if let Err(err) = session.reject() {
            self.report_error(err);
        }
    }

    fn on_library_connect(&mut self, library_id: LibraryId, correlation_id: CorrelationId, publication_channel_id: i32) {
        let now_ms = self.clock.now_ms();
        let info = LibraryInfo::new(library_id, publication_channel_id, self.config.reply_timeout_ms, now_ms);
        if let Err(DuplicateLibraryId) = self.libraries.register(info) {
            self.publish_error(ErrorKind::DuplicateLibraryId, Some(library_id), Some(correlation_id), String::new());
        }
    }

    fn on_application_heartbeat(&mut self, library_id: LibraryId) {
        let now_ms = self.clock.now_ms();
        if let Some(info) = self.libraries.get_mut(library_id) {
            info.liveness.on_heartbeat(now_ms);
        }
    }

    /// A library acquires a gateway-owned session: `save_manage_connection`,
    /// `save_logon`, an optional catch-up (skipped when there is nothing to
    /// replay), then a typed reply.
    fn on_request_session(
        &mut self,
        library_id: LibraryId,
        session_id: SessionId,
        correlation_id: CorrelationId,
        replay_from_sequence_number: i64,
    ) {
        if !self.libraries.contains(library_id) {
            self.reply_request_session(SessionReplyStatus::UnknownLibrary, correlation_id);
            return;
        }

        let Some(session) = self.gateway_sessions.get(session_id) else {
            self.reply_request_session(SessionReplyStatus::UnknownSession, correlation_id);
            return;
        };

        if replay_from_sequence_number > session.last_received_seq_no {
            self.reply_request_session(SessionReplyStatus::SequenceNumberTooHigh, correlation_id);
            return;
        }

        let session = self.gateway_sessions.remove(session_id).expect("checked present above");
        let connection_id = session.connection_id;
        let last_sent = session.last_sent_seq_no;
        let last_received = session.last_received_seq_no;
        let status = if last_received >= 0 { LogonStatus::Existing } else { LogonStatus::New };
        let expected_count = (last_received - replay_from_sequence_number).max(0) as usize;

        if let Some(info) = self.libraries.get_mut(library_id) {
            info.sessions.insert(session_id, session);
        }
        // The session just moved off the gateway pool; whatever no-logon
        // deadline accept_connection set no longer applies once a library
        // owns it (§5: cleared on successful logon).
        if let Some(connection) = self.connections.get_mut(&connection_id) {
            connection.bind_session(session_id);
        }

        let mut continuations = vec![
            SaveFrame::manage_connection(connection_id, library_id),
            SaveFrame::logon(library_id, connection_id, session_id, last_sent, last_received, status),
        ];
        if expected_count > 0 {
            continuations.push(SaveFrame::catchup(library_id, connection_id, expected_count));
        }
        continuations.push(SaveFrame::request_session_reply(SessionReplyStatus::Ok, correlation_id));

        self.enqueue_transaction(correlation_id, continuations);
    }

    fn reply_request_session(&mut self, status: SessionReplyStatus, correlation_id: CorrelationId) {
        self.enqueue_transaction(correlation_id, vec![SaveFrame::request_session_reply(status, correlation_id)]);
    }

    /// Moves a session back to the gateway pool. If the OK reply
    /// back-pressures, the session stays with the library — the handover
    /// is atomic from the caller's view, so nothing moves until the reply
    /// is actually accepted.
    fn on_release_session(&mut self, session_id: SessionId, correlation_id: CorrelationId) {
        let owner = self
            .libraries
            .iter()
            .find(|lib| lib.sessions.contains_key(&session_id))
            .map(|lib| lib.library_id);

        let Some(library_id) = owner else {
            self.reply_release_session_best_effort(SessionReplyStatus::UnknownSession, correlation_id);
            return;
        };

        let reply = InboundMessage::ReleaseSessionReply {
            status: SessionReplyStatus::Ok,
            correlation_id,
        };
        let frame = match messages::encode_inbound(&reply) {
            Ok(frame) => frame,
            Err(err) => {
                self.report_error(GatewayError::Codec(err.to_string()));
                return;
            }
        };

        match self.inbound.offer(&frame) {
            PublishResult::Position(_) => {
                if let Some(info) = self.libraries.get_mut(library_id) {
                    if let Some(session) = info.sessions.remove(&session_id) {
                        self.gateway_sessions.insert(session);
                    }
                }
            }
            PublishResult::BackPressured => {
                tracing::warn!(session_id = session_id.0, "release_session reply back-pressured; session stays with library");
            }
        }
    }

    fn reply_release_session_best_effort(&mut self, status: SessionReplyStatus, correlation_id: CorrelationId) {
        let reply = InboundMessage::ReleaseSessionReply { status, correlation_id };
        if let Ok(frame) = messages::encode_inbound(&reply) {
            if let PublishResult::BackPressured = self.inbound.offer(&frame) {
                tracing::warn!(?status, "release_session error reply back-pressured and dropped");
            }
        }
    }

    fn enqueue_transaction(&mut self, correlation_id: CorrelationId, continuations: Vec<Box<dyn crate::retry::Continuation>>) {
        if self.retry_manager.has_pending(correlation_id) {
            self.report_error(GatewayError::IllegalState(format!(
                "duplicate correlation id {correlation_id:?}: a transaction is already in flight"
            )));
            return;
        }
        self.retry_manager.first_attempt(Transaction::new(correlation_id, continuations));
    }

    fn publish_error(&mut self, kind: ErrorKind, library_id: Option<LibraryId>, correlation_id: Option<CorrelationId>, message: String) {
        let frame = InboundMessage::Error {
            kind,
            library_id,
            correlation_id,
            message,
        };
        match messages::encode_inbound(&frame) {
            Ok(bytes) => {
                if let PublishResult::BackPressured = self.inbound.offer(&bytes) {
                    tracing::warn!(?kind, "error notice back-pressured and dropped");
                }
            }
            Err(err) => tracing::error!(error = %err, "failed to encode error frame"),
        }
    }

    fn report_error(&mut self, err: GatewayError) {
        tracing::error!(error = %err, "internal error");
        self.error_handler.on_error(&err);
    }

    /// The only cooperative yield point in the worker: spins the idle
    /// strategy between re-reads of `sequence_index.indexed_position()`
    /// until it catches up to `position`. Used only during session
    /// handover (initiate, reclamation) — never inside a normal pass.
    fn await_indexing_up_to(&self, position: i64) {
        while self.sequence_index.indexed_position() < position {
            self.idle_strategy.idle(0);
        }
    }

    // ---- 3. replay stream ----

    fn send_replay_messages(&mut self) -> usize {
        let limit = self.config.replay_fragment_limit;
        let mut work = 0;

        while work < limit {
            let Some(frame) = self.replay_pending.pop_front() else { break };
            match self.inbound.offer(&frame) {
                PublishResult::Position(_) => work += 1,
                PublishResult::BackPressured => {
                    self.replay_pending.push_front(frame);
                    return work;
                }
            }
        }

        if work >= limit {
            return work;
        }

        let mut fresh = Vec::new();
        let _read = self.replay.poll(limit - work, &mut |frame| fresh.push(frame.to_vec()));
        for frame in fresh {
            match self.inbound.offer(&frame) {
                PublishResult::Position(_) => work += 1,
                PublishResult::BackPressured => self.replay_pending.push_back(frame),
            }
        }

        work
    }

    // ---- 4. receiver endpoints ----

    fn poll_end_points(&mut self) -> usize {
        let limit = self.config.inbound_bytes_received_limit;
        let mut total_bytes = 0usize;
        let mut to_disconnect = Vec::new();

        'outer: loop {
            let ids: Vec<ConnectionId> = self.endpoints.connection_ids().collect();
            if ids.is_empty() {
                break;
            }

            let mut any_progress = false;
            for id in ids {
                if total_bytes >= limit {
                    break 'outer;
                }

                let Some(connection) = self.connections.get_mut(&id) else { continue };
                let Some(receiver) = self.endpoints.receiver_mut(id) else { continue };
                let inbound = &mut self.inbound;

                let outcome = receiver.poll_once(&mut connection.stream, &mut |frame| {
                    offer_session_message(&mut **inbound, id, frame)
                });

                match outcome {
                    Ok(ReadOutcome::Progress(0)) => {}
                    Ok(ReadOutcome::Progress(n)) => {
                        total_bytes += n;
                        any_progress = true;
                    }
                    Ok(ReadOutcome::Closed) => to_disconnect.push(id),
                    Err(err) => {
                        self.report_error(err);
                        to_disconnect.push(id);
                    }
                }
            }

            if !any_progress {
                break;
            }
        }

        for id in to_disconnect {
            self.disconnect_connection(id);
        }

        total_bytes
    }

    // ---- 5. accept ----

    fn poll_new_connections(&mut self, now_ms: i64) -> usize {
        let Some(listener) = self.listener.take() else { return 0 };
        let mut accepted = 0;

        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    self.accept_connection(stream, addr, now_ms);
                    accepted += 1;
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    self.report_error(GatewayError::Io(err));
                    break;
                }
            }
        }

        self.listener = Some(listener);
        accepted
    }

    fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr, now_ms: i64) {
        if let Err(err) = connection::configure_socket(
            &stream,
            self.config.receiver_socket_buffer_size,
            self.config.sender_socket_buffer_size,
        ) {
            self.report_error(GatewayError::Io(err));
            return;
        }

        let connection_id = self.connection_id_seq.next();
        let remote_address = addr.to_string();
        let mut connection = Connection::new(connection_id, stream, remote_address.clone(), ConnectionDirection::Acceptor, now_ms);
        connection.set_disconnect_deadline(now_ms + self.config.no_logon_disconnect_timeout_ms);
        self.connections.insert(connection_id, connection);
        self.endpoints.insert(connection_id);

        let connect_notice = InboundMessage::Connect {
            connection_id,
            address: remote_address,
        };
        match messages::encode_inbound(&connect_notice) {
            Ok(frame) => {
                if let PublishResult::BackPressured = self.inbound.offer(&frame) {
                    // Back-pressure on the connect notice is reported but
                    // does not block the accept from completing (§8
                    // scenario 3): the connection already exists and
                    // downstream consumers will see it via ManageConnection.
                    self.report_error(GatewayError::IllegalState(format!(
                        "connect notice back-pressured for peer {addr}"
                    )));
                }
            }
            Err(err) => self.report_error(GatewayError::Codec(err.to_string())),
        }

        // The acceptor side does not yet know the peer's composite key —
        // that's only revealed by the peer's own Negotiate/Establish, which
        // this crate does not parse (SBE decoding is out of scope). The
        // gateway still takes ownership of the connection at accept time
        // per §4.1, scoped by a placeholder key until identified.
        let placeholder_key = CompositeKey {
            sender_comp_id: format!("UNIDENTIFIED-{}", connection_id.0),
            sender_sub_id: String::new(),
            sender_location_id: String::new(),
            target_comp_id: String::new(),
        };
        let session_id = match self.session_id_strategy.on_logon(&placeholder_key) {
            Ok(id) => id,
            Err(SessionIdError::Duplicate) => {
                // A placeholder key collision can't happen in practice
                // (it's derived from a strictly-increasing connection id),
                // but the allocator is free to reject it; treat as fatal
                // for this accept rather than silently reusing an id.
                self.report_error(GatewayError::DuplicateSession(connection_id));
                return;
            }
        };

        let last_sent = if self.config.acceptor_sequence_numbers_reset_upon_reconnect {
            -1
        } else {
            self.sequence_index.last_known(session_id, SequenceKind::Sent).unwrap_or(-1)
        };
        let last_received = if self.config.acceptor_sequence_numbers_reset_upon_reconnect {
            -1
        } else {
            self.sequence_index.last_known(session_id, SequenceKind::Received).unwrap_or(-1)
        };
        let status = if last_received >= 0 { LogonStatus::Existing } else { LogonStatus::New };

        let session = GatewaySession::new(
            session_id,
            connection_id,
            placeholder_key,
            String::new(),
            String::new(),
            self.config.default_heartbeat_interval_s,
            last_sent,
            last_received,
        );
        self.gateway_sessions.insert(session);
        // This placeholder Logon is, for an acceptor connection, the only
        // event this crate models as "logon completing" — SBE decoding of
        // the peer's real Negotiate/Establish is out of scope. Clear the
        // no-logon deadline set above accordingly (§5).
        if let Some(connection) = self.connections.get_mut(&connection_id) {
            connection.bind_session(session_id);
        }

        let correlation_id = self.internal_correlation_seq.next();
        self.enqueue_transaction(
            correlation_id,
            vec![
                SaveFrame::manage_connection(connection_id, GATEWAY_LIBRARY_ID),
                SaveFrame::logon(
                    GATEWAY_LIBRARY_ID,
                    connection_id,
                    session_id,
                    last_sent,
                    last_received,
                    status,
                ),
            ],
        );

        tracing::info!(connection_id = connection_id.0, address = %addr, "accepted connection");
    }

    fn disconnect_connection(&mut self, connection_id: ConnectionId) {
        self.endpoints.remove(connection_id);
        self.connections.remove(&connection_id);
        self.gateway_sessions.remove_by_connection(connection_id);
        self.ilink_sessions.remove(&connection_id);
        for lib in self.libraries.iter_mut() {
            lib.sessions.retain(|_, session| session.connection_id != connection_id);
        }
        tracing::info!(connection_id = connection_id.0, "connection disconnected");
    }

    // ---- 6. library liveness ----

    fn poll_libraries(&mut self, now_ms: i64) -> usize {
        let dead = self.libraries.dead_libraries(now_ms);
        for library_id in &dead {
            self.reclaim_library(*library_id);
        }
        dead.len()
    }

    /// Re-acquires every session a dead library held: awaits the
    /// sent-sequence index catching up, re-reads current sequence numbers,
    /// then reinserts into the gateway pool with state `Active` (ever
    /// logged in) or `Connected`.
    fn reclaim_library(&mut self, library_id: LibraryId) {
        let Some(info) = self.libraries.remove(library_id) else { return };
        tracing::warn!(library_id = library_id.0, "library declared dead; reclaiming sessions");

        let inbound_position = self.inbound.position();
        self.await_indexing_up_to(inbound_position);

        for (session_id, mut session) in info.sessions {
            let last_sent = self
                .sequence_index
                .last_known(session_id, SequenceKind::Sent)
                .unwrap_or(session.last_sent_seq_no);
            let last_received = self
                .sequence_index
                .last_known(session_id, SequenceKind::Received)
                .unwrap_or(session.last_received_seq_no);
            session.last_sent_seq_no = last_sent;
            session.last_received_seq_no = last_received;
            session.state = GatewaySessionState::from_ever_logged_in(last_received >= 0);
            self.gateway_sessions.insert(session);
        }
    }

    // ---- 7. gateway-owned session timers ----

    /// Disconnects any gateway-owned connection that never completed logon
    /// within `no_logon_disconnect_timeout_ms` of being accepted.
    fn poll_gateway_sessions(&mut self, now_ms: i64) -> usize {
        let expired: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|conn| conn.deadline_elapsed(now_ms))
            .map(|conn| conn.connection_id)
            .collect();

        for connection_id in &expired {
            self.publish_error(
                ErrorKind::Exception,
                None,
                None,
                format!("connection {} exceeded no-logon timeout", connection_id.0),
            );
            self.disconnect_connection(*connection_id);
        }

        expired.len()
    }

    // ---- 8. admin commands ----

    fn drain_admin_commands(&mut self) -> usize {
        let mut work = 0;
        while let Ok(command) = self.admin_rx.try_recv() {
            match command {
                AdminCommand::ListLibraries { reply } => {
                    let ids: Vec<LibraryId> = self.libraries.iter().map(|lib| lib.library_id).collect();
                    let _ = reply.send(ids);
                }
                AdminCommand::ListGatewaySessions { reply } => {
                    let sessions: Vec<GatewaySession> = self.gateway_sessions.iter().cloned().collect();
                    let _ = reply.send(sessions);
                }
                AdminCommand::ResetSessionIds { reply } => {
                    if let Ok(frame) = messages::encode_inbound(&InboundMessage::ResetSessionIds) {
                        let _ = self.inbound.offer(&frame);
                    }
                    let _ = reply.send(());
                }
            }
            work += 1;
        }
        work
    }
}

/// Encodes `payload` as a `SessionMessage` frame and offers it to `inbound`.
/// A local encode failure (never expected — `InboundMessage`'s `Serialize`
/// impl cannot fail for this variant) is logged and treated as consumed
/// rather than retried; there is no transaction here for an `AlwaysAbort`
/// to fail.
fn offer_session_message(inbound: &mut dyn Publication, connection_id: ConnectionId, payload: &[u8]) -> PublishResult {
    let message = InboundMessage::SessionMessage {
        connection_id,
        payload: payload.to_vec(),
    };
    match messages::encode_inbound(&message) {
        Ok(frame) => inbound.offer(&frame),
        Err(err) => {
            tracing::error!(connection_id = connection_id.0, error = %err, "failed to encode session message frame");
            PublishResult::Position(inbound.position())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FakeClock;
    use crate::collaborators::test_support::{
        FixedSequenceIndex, InMemoryPublication, InMemorySubscription, RecordingErrorHandler, RecordingIlinkProxyFactory,
        RecordingPositionSender, SequentialSessionIdStrategy,
    };
    use crate::collaborators::BusySpinIdleStrategy;
    use crate::ilink::IlinkSessionState;
    use std::net::TcpStream as StdTcpStream;
    use std::sync::Arc;

    fn deps() -> FramerDependencies {
        FramerDependencies {
            inbound: Box::new(InMemoryPublication::new()),
            outbound: Box::new(InMemorySubscription::default()),
            replay: Box::new(InMemorySubscription::default()),
            position_sender: Box::new(RecordingPositionSender::default()),
            sequence_index: Box::new(FixedSequenceIndex::default()),
            session_id_strategy: Box::new(SequentialSessionIdStrategy::default()),
            error_handler: Box::new(RecordingErrorHandler::default()),
            ilink_proxy_factory: Box::new(RecordingIlinkProxyFactory::default()),
        }
    }

    fn config() -> FramerConfig {
        FramerConfig {
            idle_strategy: Arc::new(BusySpinIdleStrategy),
            ..FramerConfig::default()
        }
    }

    fn framer(bind_address: Option<SocketAddr>) -> (Framer, Receiver<AdminCommand>) {
        let mut cfg = config();
        cfg.bind_address = bind_address;
        let (_handle, admin_rx) = admin::admin_channel(8);
        let clock = Box::new(FakeClock::new(1_700_000_000_000, 0));
        let framer = Framer::new(cfg, clock, deps(), admin_rx.clone()).unwrap();
        (framer, admin_rx)
    }

    #[test]
    fn do_work_with_no_listener_and_no_sources_does_nothing() {
        let (mut framer, _rx) = framer(None);
        assert_eq!(framer.do_work(), 0);
    }

    #[test]
    fn accept_publishes_connect_and_creates_a_gateway_session() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (mut framer, _rx) = framer(Some(addr));
        let bound = framer.listener.as_ref().unwrap().local_addr().unwrap();

        let _client = StdTcpStream::connect(bound).unwrap();
        // Accept may need a pass or two depending on OS scheduling of the
        // loopback handshake; a handful of passes is generous and
        // deterministic enough for a unit test.
        let mut accepted = false;
        for _ in 0..20 {
            if framer.do_work() > 0 {
                accepted = true;
            }
            if framer.connection_count() > 0 {
                break;
            }
        }
        assert!(accepted);
        assert_eq!(framer.connection_count(), 1);
        assert_eq!(framer.gateway_session_count(), 1);
    }

    #[test]
    fn duplicate_library_connect_is_reported() {
        let (mut framer, _rx) = framer(None);
        framer.on_library_connect(LibraryId(7), CorrelationId(1), 1);
        assert_eq!(framer.library_count(), 1);

        framer.on_library_connect(LibraryId(7), CorrelationId(1), 2);
        assert_eq!(framer.library_count(), 1, "second registration must be rejected, not replace the first");
    }

    #[test]
    fn release_session_moves_session_back_to_gateway_pool() {
        let (mut framer, _rx) = framer(None);
        framer.on_library_connect(LibraryId(1), CorrelationId(1), 1);

        let key = CompositeKey {
            sender_comp_id: "S".into(),
            sender_sub_id: String::new(),
            sender_location_id: String::new(),
            target_comp_id: "T".into(),
        };
        let session = GatewaySession::new(SessionId(5), ConnectionId(9), key, "u".into(), "p".into(), 30, 1, 1);
        framer
            .libraries
            .get_mut(LibraryId(1))
            .unwrap()
            .sessions
            .insert(SessionId(5), session);

        framer.on_release_session(SessionId(5), CorrelationId(2));

        assert!(framer.gateway_sessions.contains(SessionId(5)));
        assert!(!framer.libraries.get(LibraryId(1)).unwrap().sessions.contains_key(&SessionId(5)));
    }

    #[test]
    fn library_death_reacquires_its_sessions_as_active() {
        let (mut framer, _rx) = framer(None);
        let now_ms = framer.clock.now_ms();
        framer.libraries.register(LibraryInfo::new(LibraryId(3), 1, 1_000, now_ms)).unwrap();

        let key = CompositeKey {
            sender_comp_id: "S".into(),
            sender_sub_id: String::new(),
            sender_location_id: String::new(),
            target_comp_id: "T".into(),
        };
        let session = GatewaySession::new(SessionId(11), ConnectionId(1), key, "u".into(), "p".into(), 30, 5, 5);
        framer.libraries.get_mut(LibraryId(3)).unwrap().sessions.insert(SessionId(11), session);

        framer.reclaim_library(LibraryId(3));

        assert!(framer.libraries.get(LibraryId(3)).is_none());
        let reacquired = framer.gateway_sessions.get(SessionId(11)).unwrap();
        assert_eq!(reacquired.state, GatewaySessionState::Active);
    }

    #[test]
    fn session_message_is_framed_and_written_to_the_socket() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let std_client = StdTcpStream::connect(addr).unwrap();
        std_client.set_nonblocking(true).unwrap();
        let mio_client = TcpStream::from_std(std_client);
        let (mut server_std, _) = listener.accept().unwrap();

        let (mut framer, _rx) = framer(None);
        let connection_id = ConnectionId(42);
        let now_ms = framer.clock.now_ms();
        framer
            .connections
            .insert(connection_id, Connection::new(connection_id, mio_client, addr.to_string(), ConnectionDirection::Initiator, now_ms));
        framer.endpoints.insert(connection_id);

        framer.write_session_message(connection_id, b"hello");

        let mut buf = [0u8; SBE_FRAME_HEADER_LEN + 5];
        use std::io::Read;
        server_std.read_exact(&mut buf).unwrap();
        let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        assert_eq!(len, SBE_FRAME_HEADER_LEN + 5);
        assert_eq!(&buf[SBE_FRAME_HEADER_LEN..], b"hello");
    }

    #[test]
    fn initiate_connection_drives_an_ilink_session_to_sent_negotiate() {
        struct ArcIlinkProxyFactory(Arc<RecordingIlinkProxyFactory>);
        impl crate::collaborators::IlinkProxyFactory for ArcIlinkProxyFactory {
            fn create(&self, connection_id: ConnectionId) -> Box<dyn crate::ilink::IlinkProxy> {
                self.0.create(connection_id)
            }
        }

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let factory = Arc::new(RecordingIlinkProxyFactory::default());
        let mut base_deps = deps();
        base_deps.ilink_proxy_factory = Box::new(ArcIlinkProxyFactory(factory.clone()));

        let mut cfg = config();
        cfg.trading_system_name = "SYS".into();
        cfg.trading_system_version = "1.0".into();
        cfg.trading_system_vendor = "VENDOR".into();
        let (_handle, admin_rx) = admin::admin_channel(8);
        let clock = Box::new(FakeClock::new(1_700_000_000_000, 0));
        let mut framer = Framer::new(cfg, clock, base_deps, admin_rx).unwrap();

        framer.on_library_connect(LibraryId(1), CorrelationId(1), 1);

        let key = CompositeKey {
            sender_comp_id: "FIRM".into(),
            sender_sub_id: String::new(),
            sender_location_id: String::new(),
            target_comp_id: "TARGET".into(),
        };
        framer.on_initiate_connection(
            LibraryId(1),
            CorrelationId(2),
            addr.to_string(),
            key,
            "SESSION".into(),
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".into(),
            30,
        );

        assert_eq!(framer.connection_count(), 1);
        assert_eq!(framer.gateway_session_count(), 1);

        let connection_id = *framer.connections.keys().next().unwrap();
        let ilink_session = framer.ilink_sessions.get(&connection_id).expect("ilink session constructed");
        assert_eq!(ilink_session.state(), IlinkSessionState::SentNegotiate);

        let proxy = factory.proxy_for(connection_id).expect("proxy created for this connection");
        assert_eq!(proxy.lock().unwrap().negotiates.len(), 1);
    }

    #[test]
    fn disconnecting_a_connection_drops_its_ilink_session() {
        let (mut framer, _rx) = framer(None);
        let connection_id = ConnectionId(1);
        framer.ilink_sessions.insert(
            connection_id,
            IlinkSession::new(
                framer.clock.as_ref(),
                crate::ilink::IlinkSessionConfig {
                    connection_id,
                    session_id: "S".into(),
                    firm_id: "F".into(),
                    trading_system_name: String::new(),
                    trading_system_version: String::new(),
                    trading_system_vendor: String::new(),
                    keep_alive_interval_s: 30,
                    initial_sent_sequence_number: crate::ilink::InitialSequenceNumber::Automatic,
                    hmac_key: vec![0u8; 32],
                },
                RecordingIlinkProxyFactory::default().create(connection_id),
            ),
        );

        framer.disconnect_connection(connection_id);
        assert!(!framer.ilink_sessions.contains_key(&connection_id));
    }
}
