//! Concrete [`Continuation`]s the Framer enqueues into [`Transaction`]s.
//!
//! Every continuation used by the Framer bottoms out in a single publish
//! to the inbound stream, so there is exactly one shape: encode a frame up
//! front (a pure function of already-known data), then re-offer the same
//! bytes on every `attempt()` until accepted. Re-offering identical bytes
//! is what makes these safe to retry after `BackPressured` — the spec's
//! idempotent/replay-safe requirement for continuations (§4.4).

use crate::collaborators::{Publication, PublishResult};
use crate::error::GatewayError;
use crate::ids::{ConnectionId, CorrelationId, LibraryId, SessionId};
use crate::messages::{self, InboundMessage, LogonStatus, SessionReplyStatus};
use crate::retry::{Continuation, ContinuationResult};

/// A pre-encoded frame, offered verbatim on every attempt until accepted.
pub struct SaveFrame {
    label: &'static str,
    frame: Vec<u8>,
}

impl SaveFrame {
    fn encode(label: &'static str, message: &InboundMessage) -> Box<dyn Continuation> {
        match messages::encode_inbound(message) {
            Ok(frame) => Box::new(SaveFrame { label, frame }),
            // Our own enums always encode; a failure here would be a bug in
            // `InboundMessage`'s Serialize impl, not a runtime condition
            // worth retrying. There is nothing to re-offer, so fail the
            // transaction rather than silently pretend the frame was saved.
            Err(err) => Box::new(AlwaysAbort(GatewayError::Codec(err.to_string()))),
        }
    }

    pub fn manage_connection(connection_id: ConnectionId, library_id: LibraryId) -> Box<dyn Continuation> {
        Self::encode(
            "save_manage_connection",
            &InboundMessage::ManageConnection {
                connection_id,
                library_id,
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn logon(
        library_id: LibraryId,
        connection_id: ConnectionId,
        session_id: SessionId,
        last_sent_seq_no: i64,
        last_received_seq_no: i64,
        status: LogonStatus,
    ) -> Box<dyn Continuation> {
        Self::encode(
            "save_logon",
            &InboundMessage::Logon {
                library_id,
                connection_id,
                session_id,
                last_sent_seq_no,
                last_received_seq_no,
                status,
            },
        )
    }

    pub fn catchup(library_id: LibraryId, connection_id: ConnectionId, expected_count: usize) -> Box<dyn Continuation> {
        Self::encode(
            "save_catchup",
            &InboundMessage::Catchup {
                library_id,
                connection_id,
                expected_count,
            },
        )
    }

    pub fn request_session_reply(status: SessionReplyStatus, correlation_id: CorrelationId) -> Box<dyn Continuation> {
        Self::encode(
            "save_request_session_reply",
            &InboundMessage::RequestSessionReply {
                status,
                correlation_id,
            },
        )
    }

    pub fn release_session_reply(status: SessionReplyStatus, correlation_id: CorrelationId) -> Box<dyn Continuation> {
        Self::encode(
            "save_release_session_reply",
            &InboundMessage::ReleaseSessionReply {
                status,
                correlation_id,
            },
        )
    }
}

impl Continuation for SaveFrame {
    fn attempt(&mut self, inbound: &mut dyn Publication) -> ContinuationResult {
        match inbound.offer(&self.frame) {
            PublishResult::Position(_) => ContinuationResult::Complete,
            PublishResult::BackPressured => ContinuationResult::BackPressured,
        }
    }

    fn label(&self) -> &'static str {
        self.label
    }
}

/// A continuation that always fails; used for the rare construction-time
/// error path (e.g. codec failure before a transaction could be built at
/// all) where the caller needs a `Transaction` it can still enqueue and
/// have drained uniformly by the retry loop.
pub struct AlwaysAbort(pub GatewayError);

impl Continuation for AlwaysAbort {
    fn attempt(&mut self, _inbound: &mut dyn Publication) -> ContinuationResult {
        ContinuationResult::Abort(match &self.0 {
            GatewayError::Io(e) => GatewayError::Io(std::io::Error::new(e.kind(), e.to_string())),
            other => GatewayError::IllegalState(other.to_string()),
        })
    }

    fn label(&self) -> &'static str {
        "always_abort"
    }
}
