//! Error types for the gateway core.
//!
//! Variants map to the taxonomy in the design notes:
//!
//! - **Transient / back-pressure**: [`BackPressured`](Self::BackPressured) —
//!   never fatal, the caller retries on the next pass.
//! - **Protocol violation**: [`IllegalState`](Self::IllegalState),
//!   [`UuidMismatch`](Self::UuidMismatch),
//!   [`SequenceNumberTooHigh`](Self::SequenceNumberTooHigh).
//! - **I/O failure**: [`Io`](Self::Io).
//! - **Configuration / cryptographic**: [`Crypto`](Self::Crypto) — fatal at
//!   session construction, never recoverable.
//! - **Collaborator-reported**: [`UnknownLibrary`](Self::UnknownLibrary),
//!   [`DuplicateSession`](Self::DuplicateSession),
//!   [`DuplicateLibraryId`](Self::DuplicateLibraryId).

use crate::ids::{ConnectionId, LibraryId, SessionId};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Underlying socket or listener I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A downstream publication or subscription offer could not be
    /// accepted right now. Never fatal; the caller must retry without
    /// losing state.
    #[error("back-pressured")]
    BackPressured,

    /// An `IlinkSession` operation was attempted from a state that does
    /// not permit it (e.g. sending a business message before ESTABLISHED).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A protocol response referenced a UUID that does not match the
    /// session that sent the request.
    #[error("uuid mismatch on connection {connection_id:?}: expected {expected}, got {actual}")]
    UuidMismatch {
        connection_id: ConnectionId,
        expected: u64,
        actual: u64,
    },

    /// A replay request asked for a sequence number higher than the last
    /// one this session has received.
    #[error("sequence number too high: requested {requested}, last received {last_received}")]
    SequenceNumberTooHigh { requested: i64, last_received: i64 },

    /// `on_initiate_connection` or `on_request_session` referenced a
    /// library that is not registered.
    #[error("unknown library: {0:?}")]
    UnknownLibrary(LibraryId),

    /// The session-id strategy reported a duplicate composite key.
    #[error("duplicate session for connection {0:?}")]
    DuplicateSession(ConnectionId),

    /// `library_connect` was called twice with the same library id.
    #[error("duplicate library id: {0:?}")]
    DuplicateLibraryId(LibraryId),

    /// `on_request_session`/`on_release_session` referenced a session id
    /// the gateway has no record of.
    #[error("unknown session: {0:?}")]
    UnknownSession(SessionId),

    /// A session was referenced by a request that requires it to have
    /// logged in at least once.
    #[error("session not logged in: {0:?}")]
    SessionNotLoggedIn(SessionId),

    /// Failed to connect to a remote endpoint during `on_initiate_connection`.
    #[error("unable to connect: {0}")]
    UnableToConnect(String),

    /// A cryptographic or configuration failure at session construction
    /// time (malformed base64url key, HMAC key rejected). Fatal: the
    /// session cannot proceed safely and construction must fail.
    #[error("cryptographic/config error: {0}")]
    Crypto(String),

    /// A control-message frame failed to encode or decode. Indicates a
    /// version mismatch between writer and reader, or a corrupt frame.
    #[error("codec error: {0}")]
    Codec(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
