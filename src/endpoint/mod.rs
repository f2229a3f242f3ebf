//! Two parallel tables, keyed by `connection_id`: Receiver endpoints
//! (socket → frame parser → publication) and Sender endpoints
//! (publication → socket). Every live connection appears in exactly one
//! slot of each table.

mod receiver;
mod sender;

pub use receiver::{ReadOutcome, ReceiverEndpoint, SBE_FRAME_HEADER_LEN};
pub use sender::SenderEndpoint;

use std::collections::HashMap;

use crate::ids::ConnectionId;

/// The Receiver/Sender endpoint pair for every live connection.
#[derive(Default)]
pub struct EndpointTable {
    receivers: HashMap<ConnectionId, ReceiverEndpoint>,
    senders: HashMap<ConnectionId, SenderEndpoint>,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers both halves for a newly accepted or initiated connection.
    pub fn insert(&mut self, connection_id: ConnectionId) {
        self.receivers
            .insert(connection_id, ReceiverEndpoint::new(connection_id));
        self.senders
            .insert(connection_id, SenderEndpoint::new(connection_id));
    }

    /// Removes both halves for a connection that is disconnecting.
    pub fn remove(&mut self, connection_id: ConnectionId) {
        self.receivers.remove(&connection_id);
        self.senders.remove(&connection_id);
    }

    pub fn receiver_mut(&mut self, connection_id: ConnectionId) -> Option<&mut ReceiverEndpoint> {
        self.receivers.get_mut(&connection_id)
    }

    pub fn sender_mut(&mut self, connection_id: ConnectionId) -> Option<&mut SenderEndpoint> {
        self.senders.get_mut(&connection_id)
    }

    pub fn connection_ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.receivers.keys().copied()
    }

    /// Connections whose sender still has buffered, unwritten bytes —
    /// candidates for a retry flush on the next pass.
    pub fn slow_connection_ids(&self) -> Vec<ConnectionId> {
        self.senders
            .values()
            .filter(|s| s.is_slow())
            .map(|s| s.connection_id())
            .collect()
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    pub fn sender_count(&self) -> usize {
        self.senders.len()
    }
}
