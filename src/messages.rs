//! Message and status enums exchanged over the external publication
//! streams.
//!
//! These are the typed control frames the worker itself interprets
//! (Connect/Logon/InitiateConnection and friends) — distinct from the
//! opaque per-session application payloads it never parses. Control
//! frames are serialized with `bincode` so they can cross a byte-oriented
//! `Publication`/`Subscription` boundary like any other frame.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::ids::{ConnectionId, CorrelationId, LibraryId, SessionId};

/// Reasons for requesting a connection disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    Logout,
    NoLogon,
    Exception,
}

/// Error kinds published on the inbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownLibrary,
    UnableToConnect,
    DuplicateSession,
    DuplicateLibraryId,
    Exception,
}

/// Session reply statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionReplyStatus {
    Ok,
    UnknownLibrary,
    UnknownSession,
    SessionNotLoggedIn,
    SequenceNumberTooHigh,
}

/// Whether a gateway session just logged on for the first time or is
/// continuing an already-active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogonStatus {
    New,
    Existing,
}

/// Frames the worker emits on the inbound publication stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InboundMessage {
    Connect {
        connection_id: ConnectionId,
        address: String,
    },
    ManageConnection {
        connection_id: ConnectionId,
        library_id: LibraryId,
    },
    Logon {
        library_id: LibraryId,
        connection_id: ConnectionId,
        session_id: SessionId,
        last_sent_seq_no: i64,
        last_received_seq_no: i64,
        status: LogonStatus,
    },
    Error {
        kind: ErrorKind,
        library_id: Option<LibraryId>,
        correlation_id: Option<CorrelationId>,
        message: String,
    },
    ReleaseSessionReply {
        status: SessionReplyStatus,
        correlation_id: CorrelationId,
    },
    RequestSessionReply {
        status: SessionReplyStatus,
        correlation_id: CorrelationId,
    },
    Catchup {
        library_id: LibraryId,
        connection_id: ConnectionId,
        expected_count: usize,
    },
    ResetSessionIds,
    /// A per-session application message frame, routed by `connection_id`.
    /// Payload bytes are opaque to the Framer (SBE decoding is external).
    SessionMessage {
        connection_id: ConnectionId,
        payload: Vec<u8>,
    },
}

/// Frames the worker reads from the outbound library stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutboundMessage {
    InitiateConnection {
        library_id: LibraryId,
        correlation_id: CorrelationId,
        address: String,
        key: crate::gateway_session::CompositeKey,
        username: String,
        password: String,
        heartbeat_interval_s: u32,
    },
    RequestDisconnect {
        connection_id: ConnectionId,
        reason: DisconnectReason,
    },
    LibraryConnect {
        library_id: LibraryId,
        correlation_id: CorrelationId,
        publication_channel_id: i32,
    },
    ApplicationHeartbeat {
        library_id: LibraryId,
    },
    ReleaseSession {
        session_id: SessionId,
        correlation_id: CorrelationId,
    },
    RequestSession {
        library_id: LibraryId,
        session_id: SessionId,
        correlation_id: CorrelationId,
        /// Sequence number the library wants replay to start from.
        /// `SEQUENCE_NUMBER_TOO_HIGH` is reported iff this exceeds the
        /// session's last received sequence number.
        replay_from_sequence_number: i64,
    },
    /// A per-session application message frame to be written to the
    /// session's connection. Payload bytes are opaque to the Framer.
    SessionMessage {
        connection_id: ConnectionId,
        payload: Vec<u8>,
    },
}

/// Encodes a control frame for the inbound publication stream.
pub fn encode_inbound(message: &InboundMessage) -> Result<Vec<u8>> {
    bincode::serialize(message).map_err(|e| GatewayError::Codec(e.to_string()))
}

/// Decodes a control frame read off the outbound library stream.
pub fn decode_outbound(bytes: &[u8]) -> Result<OutboundMessage> {
    bincode::deserialize(bytes).map_err(|e| GatewayError::Codec(e.to_string()))
}
