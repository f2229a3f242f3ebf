//! Bounded SPSC admin-command queue. Queries from outside the worker thread
//! (library listing, gateway-session listing, sequence-number reset) are
//! never answered synchronously — they're enqueued here and drained by
//! `drain_admin_commands`, the last of the eight fixed work-loop steps.

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::ids::LibraryId;

/// A command queued by an external caller, with a one-shot reply channel.
pub enum AdminCommand {
    /// List every currently registered `library_id`.
    ListLibraries {
        reply: Sender<Vec<LibraryId>>,
    },
    /// List every session currently owned by the gateway pool (not handed
    /// to a library).
    ListGatewaySessions {
        reply: Sender<Vec<crate::gateway_session::GatewaySession>>,
    },
    /// Reset the acceptor-side sequence-number-reset-on-reconnect policy
    /// flag; acknowledged once applied.
    ResetSessionIds {
        reply: Sender<()>,
    },
}

/// Handle given to external callers. Cloning shares the same bounded queue;
/// a full queue reports [`AdminQueueFull`] rather than blocking, since the
/// worker thread must never be made to wait on a caller.
#[derive(Clone)]
pub struct AdminHandle {
    sender: Sender<AdminCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("admin command queue is full")]
pub struct AdminQueueFull;

impl AdminHandle {
    fn send(&self, command: AdminCommand) -> Result<(), AdminQueueFull> {
        self.sender.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) | TrySendError::Disconnected(_) => AdminQueueFull,
        })
    }

    /// Enqueues a library-listing query; `recv()` on the returned channel
    /// resolves once the worker has drained it on a later pass.
    pub fn list_libraries(&self) -> Result<Receiver<Vec<LibraryId>>, AdminQueueFull> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.send(AdminCommand::ListLibraries { reply })?;
        Ok(rx)
    }

    pub fn list_gateway_sessions(
        &self,
    ) -> Result<Receiver<Vec<crate::gateway_session::GatewaySession>>, AdminQueueFull> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.send(AdminCommand::ListGatewaySessions { reply })?;
        Ok(rx)
    }

    pub fn reset_session_ids(&self) -> Result<Receiver<()>, AdminQueueFull> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.send(AdminCommand::ResetSessionIds { reply })?;
        Ok(rx)
    }
}

/// Builds a bounded admin-command queue of the given capacity, returning the
/// caller-facing [`AdminHandle`] and the worker-facing receiver.
pub fn admin_channel(capacity: usize) -> (AdminHandle, Receiver<AdminCommand>) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity);
    (AdminHandle { sender }, receiver)
}
