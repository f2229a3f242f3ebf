//! Framer configuration.
//!
//! This is a plain data struct, not a loader — reading it from a file or
//! environment is the external configuration loader's job. Defaults are
//! conservative values appropriate for a low-latency gateway worker.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::collaborators::IdleStrategy;
use crate::ilink::InitialSequenceNumber;

/// Recognized configuration options for a [`Framer`](crate::framer::Framer).
#[derive(Clone)]
pub struct FramerConfig {
    /// `host:port` to accept connections on. `None` disables accept
    /// entirely (`poll_new_connections` becomes a no-op).
    pub bind_address: Option<SocketAddr>,

    /// Per-pass cap on fragments drained from the outbound library stream.
    pub outbound_library_fragment_limit: usize,

    /// Per-pass cap on fragments drained from the replay stream.
    pub replay_fragment_limit: usize,

    /// Per-pass cap on cumulative bytes read across all receiver endpoints.
    pub inbound_bytes_received_limit: usize,

    /// Deadline (from accept/connect) by which a connection must have
    /// completed logon, or it is disconnected.
    pub no_logon_disconnect_timeout_ms: i64,

    /// Library liveness reply timeout: a library that hasn't heartbeated
    /// within this window is declared dead and its sessions reclaimed.
    pub reply_timeout_ms: i64,

    /// Heartbeat interval assigned to a gateway session when the logon
    /// request does not specify one.
    pub default_heartbeat_interval_s: u32,

    /// Whether an acceptor connection resets sequence numbers on
    /// reconnect, or preserves the previously negotiated ones.
    pub acceptor_sequence_numbers_reset_upon_reconnect: bool,

    /// `SO_RCVBUF` size in bytes for accepted sockets. `0` means OS default.
    pub receiver_socket_buffer_size: usize,

    /// `SO_SNDBUF` size in bytes for accepted sockets. `0` means OS default.
    pub sender_socket_buffer_size: usize,

    /// `tradingSystemName` sent in every Establish request this worker
    /// issues as an ILink3 initiator.
    pub trading_system_name: String,

    /// `tradingSystemVersion` sent in every Establish request.
    pub trading_system_version: String,

    /// `tradingSystemVendor` sent in every Establish request.
    pub trading_system_vendor: String,

    /// `initialSentSequenceNumber` strategy for ILink3 sessions this worker
    /// initiates.
    pub ilink_initial_sequence_number: InitialSequenceNumber,

    /// The idle hook invoked by cooperative waits (`awaiting_indexing_up_to`)
    /// and by the external driver when `do_work()` returns zero.
    pub idle_strategy: Arc<dyn IdleStrategy>,
}

impl std::fmt::Debug for FramerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramerConfig")
            .field("bind_address", &self.bind_address)
            .field(
                "outbound_library_fragment_limit",
                &self.outbound_library_fragment_limit,
            )
            .field("replay_fragment_limit", &self.replay_fragment_limit)
            .field(
                "inbound_bytes_received_limit",
                &self.inbound_bytes_received_limit,
            )
            .field(
                "no_logon_disconnect_timeout_ms",
                &self.no_logon_disconnect_timeout_ms,
            )
            .field("reply_timeout_ms", &self.reply_timeout_ms)
            .field(
                "default_heartbeat_interval_s",
                &self.default_heartbeat_interval_s,
            )
            .field(
                "acceptor_sequence_numbers_reset_upon_reconnect",
                &self.acceptor_sequence_numbers_reset_upon_reconnect,
            )
            .field(
                "receiver_socket_buffer_size",
                &self.receiver_socket_buffer_size,
            )
            .field(
                "sender_socket_buffer_size",
                &self.sender_socket_buffer_size,
            )
            .field("trading_system_name", &self.trading_system_name)
            .field("trading_system_version", &self.trading_system_version)
            .field("trading_system_vendor", &self.trading_system_vendor)
            .finish_non_exhaustive()
    }
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            outbound_library_fragment_limit: 10,
            replay_fragment_limit: 10,
            inbound_bytes_received_limit: 8 * 1024,
            no_logon_disconnect_timeout_ms: 10_000,
            reply_timeout_ms: 5_000,
            default_heartbeat_interval_s: 30,
            acceptor_sequence_numbers_reset_upon_reconnect: false,
            receiver_socket_buffer_size: 0,
            sender_socket_buffer_size: 0,
            trading_system_name: String::new(),
            trading_system_version: String::new(),
            trading_system_vendor: String::new(),
            ilink_initial_sequence_number: InitialSequenceNumber::Automatic,
            idle_strategy: Arc::new(crate::collaborators::BusySpinIdleStrategy),
        }
    }
}
