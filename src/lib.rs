//! # gateway — ILink3 session and framing core
//!
//! The core session and framing engine of a low-latency FIX/ILink3
//! market-access gateway. A single cooperatively-scheduled worker
//! ([`framer::Framer`]) owns every client-facing TCP socket, dispatches
//! bytes to per-connection parsers, drains outbound library streams,
//! retries back-pressured multi-step transactions, and tracks library
//! liveness. A second state machine ([`ilink::IlinkSession`]) drives the
//! CME ILink3 negotiate/establish/terminate handshake, including
//! HMAC-SHA256 request signing and UUID/timestamp derivation.
//!
//! ## Out of scope
//!
//! The SBE message codec, the persistent sequence-number index, the replay
//! query engine, the outbound shared-memory log transport, the
//! configuration loader, CLI bootstrap, metrics sinks, and the
//! session-id persistence store all live outside this crate. This crate
//! only specifies the trait seams they plug into — see [`collaborators`].
//!
//! ## Crate layout
//!
//! - [`framer`] — the [`framer::Framer`] orchestrator and its fixed
//!   per-pass work loop.
//! - [`ilink`] — the [`ilink::IlinkSession`] negotiate/establish/terminate
//!   state machine, HMAC signing, and UUID/timestamp derivation.
//! - [`retry`] — [`retry::Transaction`]/[`retry::Continuation`] and the
//!   [`retry::RetryManager`] that advances them pass by pass.
//! - [`endpoint`] — the [`endpoint::EndpointTable`] bridging sockets to
//!   the publish/subscribe log.
//! - [`library`] — [`library::LibraryRegistry`] and liveness detection.
//! - [`gateway_session`] — [`gateway_session::GatewaySession`] and its
//!   ownership-transfer pool.
//! - [`connection`] — the per-socket [`connection::Connection`].
//! - [`collaborators`] — trait seams for every out-of-scope external
//!   collaborator.
//! - [`messages`] — the inbound/outbound wire-control-message enums.
//! - [`config`] — [`config::FramerConfig`].
//! - [`clock`] — the [`clock::Clock`] trait and its real implementation.
//! - [`ids`] — newtyped identifiers and id-minting sequences.
//! - [`error`] — [`error::GatewayError`] and [`error::Result`].

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod framer;
pub mod gateway_session;
pub mod ids;
pub mod ilink;
pub mod library;
pub mod messages;
pub mod retry;

pub use clock::{Clock, SystemClock};
pub use config::FramerConfig;
pub use error::{GatewayError, Result};
pub use framer::{Framer, FramerDependencies};
pub use ilink::IlinkSession;
