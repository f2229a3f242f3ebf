//! The ILink3 negotiate/establish/terminate session state machine.
//!
//! ```text
//! CONNECTED ──sendNegotiate──▶ SENT_NEGOTIATE
//! SENT_NEGOTIATE ──onNegotiationResponse──▶ NEGOTIATED ──sendEstablish──▶ SENT_ESTABLISH
//! SENT_NEGOTIATE ──reject──▶ NEGOTIATE_REJECTED
//! SENT_ESTABLISH ──onEstablishmentAck──▶ ESTABLISHED
//! SENT_ESTABLISH ──reject──▶ ESTABLISH_REJECTED
//! ESTABLISHED ──terminate()──▶ UNBINDING ──onTerminate──▶ UNBOUND
//! ESTABLISHED ──onTerminate(peer)──▶ (echo terminate) ──▶ UNBOUND
//! ```
//!
//! A successful negotiation response automatically issues Establish in the
//! same call, so callers observe CONNECTED → SENT_NEGOTIATE →
//! `on_negotiation_response` → SENT_ESTABLISH without a separate step.

pub mod hmac_sign;
pub mod uuid;

use crate::clock::Clock;
use crate::error::{GatewayError, Result};
use crate::ids::ConnectionId;
use crate::messages::DisconnectReason;

/// State of a single ILink3 session's negotiate/establish/terminate
/// handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IlinkSessionState {
    Connected,
    SentNegotiate,
    Negotiated,
    SentEstablish,
    Established,
    Unbinding,
    Unbound,
    NegotiateRejected,
    EstablishRejected,
}

/// Whether `initialSentSequenceNumber` should be derived automatically
/// (always `1`) or taken from configuration verbatim.
#[derive(Debug, Clone, Copy)]
pub enum InitialSequenceNumber {
    Automatic,
    Configured(i64),
}

impl InitialSequenceNumber {
    fn resolve(self) -> i64 {
        match self {
            InitialSequenceNumber::Automatic => 1,
            InitialSequenceNumber::Configured(n) => n,
        }
    }
}

/// Static configuration for one ILink3 session: identity fields used in the
/// HMAC canonical strings, plus the already-decoded signing key.
#[derive(Debug, Clone)]
pub struct IlinkSessionConfig {
    pub connection_id: ConnectionId,
    pub session_id: String,
    pub firm_id: String,
    pub trading_system_name: String,
    pub trading_system_version: String,
    pub trading_system_vendor: String,
    pub keep_alive_interval_s: u32,
    pub initial_sent_sequence_number: InitialSequenceNumber,
    pub hmac_key: Vec<u8>,
}

/// A signed Negotiate request ready for encoding.
#[derive(Debug, Clone)]
pub struct NegotiateRequest {
    pub uuid: u64,
    pub request_timestamp: u64,
    pub session_id: String,
    pub firm_id: String,
    pub hmac_signature: [u8; 32],
}

/// A signed Establish request ready for encoding.
#[derive(Debug, Clone)]
pub struct EstablishRequest {
    pub uuid: u64,
    pub request_timestamp: u64,
    pub session_id: String,
    pub firm_id: String,
    pub trading_system_name: String,
    pub trading_system_version: String,
    pub trading_system_vendor: String,
    pub next_sent_seq_no: i64,
    pub keep_alive_interval_s: u32,
    pub hmac_signature: [u8; 32],
}

/// A Terminate request (self-initiated or echoed back to a peer).
#[derive(Debug, Clone)]
pub struct TerminateRequest {
    pub uuid: u64,
    pub request_timestamp: u64,
}

/// The encoder+publisher collaborator an `IlinkSession` drives: turns signed
/// requests into wire bytes and hands them to the outbound transport. SBE
/// encoding itself lives outside this crate.
pub trait IlinkProxy: Send {
    fn send_negotiate(&mut self, request: &NegotiateRequest) -> Result<()>;
    fn send_establish(&mut self, request: &EstablishRequest) -> Result<()>;
    fn send_terminate(&mut self, request: &TerminateRequest) -> Result<()>;
    fn request_disconnect(&mut self, reason: DisconnectReason);
    /// Called once, from `unbind()`, so the owning registry can drop this
    /// session's bookkeeping.
    fn notify_unbound(&mut self);
}

fn illegal(state: IlinkSessionState, action: &str) -> GatewayError {
    GatewayError::IllegalState(format!("cannot {action} from state {state:?}"))
}

/// A single connection's ILink3 protocol state machine.
pub struct IlinkSession {
    uuid: u64,
    state: IlinkSessionState,
    next_sent_seq_no: i64,
    config: IlinkSessionConfig,
    proxy: Box<dyn IlinkProxy>,
}

impl IlinkSession {
    pub fn new(clock: &dyn Clock, config: IlinkSessionConfig, proxy: Box<dyn IlinkProxy>) -> Self {
        let uuid = uuid::compute_uuid(clock);
        let next_sent_seq_no = config.initial_sent_sequence_number.resolve();
        Self {
            uuid,
            state: IlinkSessionState::Connected,
            next_sent_seq_no,
            config,
            proxy,
        }
    }

    pub fn uuid(&self) -> u64 {
        self.uuid
    }

    pub fn state(&self) -> IlinkSessionState {
        self.state
    }

    pub fn next_sent_seq_no(&self) -> i64 {
        self.next_sent_seq_no
    }

    /// Business messages may be claimed only in state ESTABLISHED.
    pub fn validate_send(&self) -> Result<()> {
        if self.state == IlinkSessionState::Established {
            Ok(())
        } else {
            Err(illegal(self.state, "send a business message"))
        }
    }

    /// CONNECTED → SENT_NEGOTIATE.
    pub fn send_negotiate(&mut self, clock: &dyn Clock) -> Result<()> {
        if self.state != IlinkSessionState::Connected {
            return Err(illegal(self.state, "send Negotiate"));
        }

        let request_timestamp = uuid::compute_request_timestamp(clock);
        let canonical = hmac_sign::negotiate_canonical_string(
            request_timestamp,
            self.uuid,
            &self.config.session_id,
            &self.config.firm_id,
        );
        let hmac_signature = hmac_sign::sign(&self.config.hmac_key, &canonical)?;

        self.proxy.send_negotiate(&NegotiateRequest {
            uuid: self.uuid,
            request_timestamp,
            session_id: self.config.session_id.clone(),
            firm_id: self.config.firm_id.clone(),
            hmac_signature,
        })?;

        self.state = IlinkSessionState::SentNegotiate;
        Ok(())
    }

    /// SENT_NEGOTIATE ── (uuid matches) ──▶ NEGOTIATED, immediately
    /// followed by an automatic Establish, landing in SENT_ESTABLISH.
    pub fn on_negotiation_response(&mut self, clock: &dyn Clock, response_uuid: u64) -> Result<()> {
        if self.state != IlinkSessionState::SentNegotiate {
            return Err(illegal(self.state, "accept a negotiation response"));
        }
        if response_uuid != self.uuid {
            return Err(GatewayError::UuidMismatch {
                connection_id: self.config.connection_id,
                expected: self.uuid,
                actual: response_uuid,
            });
        }

        self.state = IlinkSessionState::Negotiated;
        self.send_establish(clock)
    }

    /// NEGOTIATED → SENT_ESTABLISH. Exposed separately from
    /// `on_negotiation_response` for tests and for any caller that wants to
    /// pace the two steps explicitly.
    pub fn send_establish(&mut self, clock: &dyn Clock) -> Result<()> {
        if self.state != IlinkSessionState::Negotiated {
            return Err(illegal(self.state, "send Establish"));
        }

        let request_timestamp = uuid::compute_request_timestamp(clock);
        let canonical = hmac_sign::establish_canonical_string(
            request_timestamp,
            self.uuid,
            &self.config.session_id,
            &self.config.firm_id,
            &self.config.trading_system_name,
            &self.config.trading_system_version,
            &self.config.trading_system_vendor,
            self.next_sent_seq_no,
            self.config.keep_alive_interval_s,
        );
        let hmac_signature = hmac_sign::sign(&self.config.hmac_key, &canonical)?;

        self.proxy.send_establish(&EstablishRequest {
            uuid: self.uuid,
            request_timestamp,
            session_id: self.config.session_id.clone(),
            firm_id: self.config.firm_id.clone(),
            trading_system_name: self.config.trading_system_name.clone(),
            trading_system_version: self.config.trading_system_version.clone(),
            trading_system_vendor: self.config.trading_system_vendor.clone(),
            next_sent_seq_no: self.next_sent_seq_no,
            keep_alive_interval_s: self.config.keep_alive_interval_s,
            hmac_signature,
        })?;

        self.state = IlinkSessionState::SentEstablish;
        Ok(())
    }

    /// SENT_NEGOTIATE → NEGOTIATE_REJECTED, or SENT_ESTABLISH →
    /// ESTABLISH_REJECTED.
    pub fn reject(&mut self) -> Result<()> {
        self.state = match self.state {
            IlinkSessionState::SentNegotiate => IlinkSessionState::NegotiateRejected,
            IlinkSessionState::SentEstablish => IlinkSessionState::EstablishRejected,
            other => return Err(illegal(other, "reject")),
        };
        Ok(())
    }

    /// SENT_ESTABLISH ── (uuid matches) ──▶ ESTABLISHED.
    pub fn on_establishment_ack(&mut self, response_uuid: u64) -> Result<()> {
        if self.state != IlinkSessionState::SentEstablish {
            return Err(illegal(self.state, "accept an establishment ack"));
        }
        if response_uuid != self.uuid {
            return Err(GatewayError::UuidMismatch {
                connection_id: self.config.connection_id,
                expected: self.uuid,
                actual: response_uuid,
            });
        }
        self.state = IlinkSessionState::Established;
        Ok(())
    }

    /// ESTABLISHED → UNBINDING: sends one outgoing Terminate and waits for
    /// the peer's own Terminate before unbinding.
    pub fn terminate(&mut self, clock: &dyn Clock) -> Result<()> {
        if self.state != IlinkSessionState::Established {
            return Err(illegal(self.state, "terminate"));
        }
        self.send_terminate_frame(clock)?;
        self.state = IlinkSessionState::Unbinding;
        Ok(())
    }

    /// Handles an incoming Terminate. From UNBINDING (our own terminate was
    /// acknowledged) this simply unbinds. From ESTABLISHED (the peer
    /// terminated first) this echoes one outgoing Terminate before
    /// unbinding.
    pub fn on_terminate(&mut self, clock: &dyn Clock) -> Result<()> {
        match self.state {
            IlinkSessionState::Unbinding => {
                self.unbind();
                Ok(())
            }
            IlinkSessionState::Established => {
                self.send_terminate_frame(clock)?;
                self.unbind();
                Ok(())
            }
            other => Err(illegal(other, "accept a terminate")),
        }
    }

    fn send_terminate_frame(&mut self, clock: &dyn Clock) -> Result<()> {
        let request_timestamp = uuid::compute_request_timestamp(clock);
        self.proxy.send_terminate(&TerminateRequest {
            uuid: self.uuid,
            request_timestamp,
        })
    }

    /// Sets state = UNBOUND, requests a LOGOUT disconnect, and notifies the
    /// owning registry that this session has died.
    pub fn unbind(&mut self) {
        self.state = IlinkSessionState::Unbound;
        self.proxy.request_disconnect(DisconnectReason::Logout);
        self.proxy.notify_unbound();
    }
}
