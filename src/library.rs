//! Library registration and liveness.
//!
//! A `LibraryInfo` is created on `library_connect` and destroyed when its
//! [`LivenessDetector`] declares it dead, at which point every session it
//! owned is re-acquired by the gateway.

use std::collections::HashMap;

use crate::gateway_session::GatewaySession;
use crate::ids::{GATEWAY_LIBRARY_ID, LibraryId, SessionId};

/// Seeded with the library's registration timestamp; declares the library
/// dead once `reply_timeout_ms` elapses without a heartbeat.
#[derive(Debug, Clone)]
pub struct LivenessDetector {
    reply_timeout_ms: i64,
    last_heartbeat_ms: i64,
}

impl LivenessDetector {
    pub fn new(reply_timeout_ms: i64, registered_at_ms: i64) -> Self {
        Self {
            reply_timeout_ms,
            last_heartbeat_ms: registered_at_ms,
        }
    }

    pub fn on_heartbeat(&mut self, now_ms: i64) {
        self.last_heartbeat_ms = now_ms;
    }

    /// Dead once strictly more than `reply_timeout_ms` has elapsed since
    /// the last heartbeat.
    pub fn is_dead(&self, now_ms: i64) -> bool {
        now_ms - self.last_heartbeat_ms > self.reply_timeout_ms
    }

    pub fn last_heartbeat_ms(&self) -> i64 {
        self.last_heartbeat_ms
    }
}

/// Information the gateway keeps about a connected library.
///
/// `sessions` holds the actual [`GatewaySession`] records currently on loan
/// to this library — handover moves a session's data here out of the
/// gateway pool, it is never duplicated between the two owners.
#[derive(Debug)]
pub struct LibraryInfo {
    pub library_id: LibraryId,
    pub publication_channel_id: i32,
    pub liveness: LivenessDetector,
    pub sessions: HashMap<SessionId, GatewaySession>,
}

impl LibraryInfo {
    pub fn new(
        library_id: LibraryId,
        publication_channel_id: i32,
        reply_timeout_ms: i64,
        registered_at_ms: i64,
    ) -> Self {
        Self {
            library_id,
            publication_channel_id,
            liveness: LivenessDetector::new(reply_timeout_ms, registered_at_ms),
            sessions: HashMap::new(),
        }
    }
}

/// A library-id is unique across the registry and must not be the
/// gateway's own reserved sentinel; either violation is rejected the same
/// way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateLibraryId;

/// Registry of connected libraries, keyed by `library_id`.
#[derive(Debug, Default)]
pub struct LibraryRegistry {
    libraries: HashMap<LibraryId, LibraryInfo>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: LibraryInfo) -> Result<(), DuplicateLibraryId> {
        if info.library_id == GATEWAY_LIBRARY_ID || self.libraries.contains_key(&info.library_id) {
            return Err(DuplicateLibraryId);
        }
        tracing::info!(library_id = info.library_id.0, "library registered");
        self.libraries.insert(info.library_id, info);
        Ok(())
    }

    pub fn get(&self, library_id: LibraryId) -> Option<&LibraryInfo> {
        self.libraries.get(&library_id)
    }

    pub fn get_mut(&mut self, library_id: LibraryId) -> Option<&mut LibraryInfo> {
        self.libraries.get_mut(&library_id)
    }

    pub fn contains(&self, library_id: LibraryId) -> bool {
        self.libraries.contains_key(&library_id)
    }

    pub fn remove(&mut self, library_id: LibraryId) -> Option<LibraryInfo> {
        let removed = self.libraries.remove(&library_id);
        if removed.is_some() {
            tracing::info!(library_id = library_id.0, "library removed");
        }
        removed
    }

    /// Library ids whose liveness detector has expired as of `now_ms`.
    pub fn dead_libraries(&self, now_ms: i64) -> Vec<LibraryId> {
        self.libraries
            .values()
            .filter(|lib| lib.liveness.is_dead(now_ms))
            .map(|lib| lib.library_id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LibraryInfo> {
        self.libraries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut LibraryInfo> {
        self.libraries.values_mut()
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }
}
