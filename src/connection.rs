//! `Connection`: a single non-blocking TCP socket plus the metadata the
//! Framer tracks about it. Receiver/Sender endpoints are kept separately in
//! [`crate::endpoint::EndpointTable`], keyed by the same `connection_id`,
//! rather than owned here — this keeps `Connection` movable without
//! dragging the endpoint machinery along.

use mio::net::TcpStream;

use crate::ids::{ConnectionId, SessionId};

/// Whether a connection was accepted from a listening socket or opened by
/// this worker as an initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    Acceptor,
    Initiator,
}

/// A single client-facing TCP connection owned by the Framer.
pub struct Connection {
    pub connection_id: ConnectionId,
    pub stream: TcpStream,
    pub remote_address: String,
    pub direction: ConnectionDirection,
    pub created_at_ms: i64,
    /// Cleared on successful logon; if still set when it elapses, the
    /// connection is disconnected.
    pub disconnect_deadline_ms: Option<i64>,
    /// The gateway session bound to this connection, if logon has
    /// completed.
    pub bound_session_id: Option<SessionId>,
}

impl Connection {
    pub fn new(
        connection_id: ConnectionId,
        stream: TcpStream,
        remote_address: String,
        direction: ConnectionDirection,
        created_at_ms: i64,
    ) -> Self {
        Self {
            connection_id,
            stream,
            remote_address,
            direction,
            created_at_ms,
            disconnect_deadline_ms: None,
            bound_session_id: None,
        }
    }

    pub fn set_disconnect_deadline(&mut self, deadline_ms: i64) {
        self.disconnect_deadline_ms = Some(deadline_ms);
    }

    pub fn clear_disconnect_deadline(&mut self) {
        self.disconnect_deadline_ms = None;
    }

    pub fn deadline_elapsed(&self, now_ms: i64) -> bool {
        matches!(self.disconnect_deadline_ms, Some(deadline) if now_ms >= deadline)
    }

    pub fn bind_session(&mut self, session_id: SessionId) {
        self.bound_session_id = Some(session_id);
        self.clear_disconnect_deadline();
    }
}

/// Sets the socket options required before registration: `TCP_NODELAY`
/// mandatory, `SO_RCVBUF`/`SO_SNDBUF` from configuration (`0` means OS
/// default, left untouched).
pub fn configure_socket(
    stream: &TcpStream,
    receiver_buffer_size: usize,
    sender_buffer_size: usize,
) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let socket = socket2::SockRef::from(stream);
    if receiver_buffer_size > 0 {
        socket.set_recv_buffer_size(receiver_buffer_size)?;
    }
    if sender_buffer_size > 0 {
        socket.set_send_buffer_size(sender_buffer_size)?;
    }
    Ok(())
}
