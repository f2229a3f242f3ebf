//! `GatewaySession` and the pool of sessions currently owned by the
//! gateway.
//!
//! A `GatewaySession` lives in exactly one of two owners at a time: the
//! gateway pool (this module) or a [`LibraryInfo`](crate::library::LibraryInfo).
//! Handover between the two is always a remove from one side followed by
//! an insert into the other — never a shared reference.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionId, LibraryId, SessionId};

/// The tuple identifying a FIX logical session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    pub sender_comp_id: String,
    pub sender_sub_id: String,
    pub sender_location_id: String,
    pub target_comp_id: String,
}

/// A session transitions through `{Connected, Active}` while owned by the
/// gateway: `Active` iff the receive sequence-number index has a
/// last-known number >= 0 for this `session_id` — i.e. the session has
/// logged in before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewaySessionState {
    Connected,
    Active,
}

impl GatewaySessionState {
    /// Determine state from whether the session has ever logged in, per
    /// the invariant above.
    pub fn from_ever_logged_in(ever_logged_in: bool) -> Self {
        if ever_logged_in {
            GatewaySessionState::Active
        } else {
            GatewaySessionState::Connected
        }
    }
}

/// A session paired with its Connection, owned either by the gateway pool
/// or by a library.
#[derive(Debug, Clone)]
pub struct GatewaySession {
    pub session_id: SessionId,
    pub connection_id: ConnectionId,
    pub key: CompositeKey,
    pub username: String,
    pub password: String,
    pub heartbeat_interval_s: u32,
    pub last_sent_seq_no: i64,
    pub last_received_seq_no: i64,
    pub state: GatewaySessionState,
}

impl GatewaySession {
    pub fn new(
        session_id: SessionId,
        connection_id: ConnectionId,
        key: CompositeKey,
        username: String,
        password: String,
        heartbeat_interval_s: u32,
        last_sent_seq_no: i64,
        last_received_seq_no: i64,
    ) -> Self {
        let state = GatewaySessionState::from_ever_logged_in(last_received_seq_no >= 0);
        Self {
            session_id,
            connection_id,
            key,
            username,
            password,
            heartbeat_interval_s,
            last_sent_seq_no,
            last_received_seq_no,
            state,
        }
    }
}

/// Pool of sessions currently owned by the gateway (not yet handed to a
/// library, or released back from one).
#[derive(Debug, Default)]
pub struct GatewaySessionPool {
    sessions: HashMap<SessionId, GatewaySession>,
}

impl GatewaySessionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session into the pool. Used on accept, on release from a
    /// library, and during library-death reclamation.
    pub fn insert(&mut self, session: GatewaySession) {
        tracing::debug!(
            session_id = session.session_id.0,
            connection_id = session.connection_id.0,
            state = ?session.state,
            "session inserted into gateway pool"
        );
        self.sessions.insert(session.session_id, session);
    }

    /// Remove a session from the pool (e.g. handed over to a library).
    pub fn remove(&mut self, session_id: SessionId) -> Option<GatewaySession> {
        let removed = self.sessions.remove(&session_id);
        if removed.is_some() {
            tracing::debug!(session_id = session_id.0, "session removed from gateway pool");
        }
        removed
    }

    pub fn get(&self, session_id: SessionId) -> Option<&GatewaySession> {
        self.sessions.get(&session_id)
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// All sessions currently owned by the gateway, for the
    /// `gateway_sessions()` admin query.
    pub fn iter(&self) -> impl Iterator<Item = &GatewaySession> {
        self.sessions.values()
    }

    pub fn remove_by_connection(&mut self, connection_id: ConnectionId) -> Option<GatewaySession> {
        let id = self
            .sessions
            .values()
            .find(|s| s.connection_id == connection_id)
            .map(|s| s.session_id)?;
        self.remove(id)
    }
}
