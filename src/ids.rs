//! Strongly-typed identifiers and the `connection_id` minting sequence.
//!
//! `connection_id` is minted from a randomized high-entropy seed and
//! incremented per accept/connect, so it stays strictly increasing within a
//! single worker's lifetime.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

/// Signed so the gateway's own sentinel (`-1`) can never collide with a
/// real library id assigned by a registrar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LibraryId(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(pub i64);

/// Library id reserved for connections still owned by the gateway (not yet
/// handed to any library). Matches spec.md's literal `libraryId=-1`
/// sentinel; `LibraryRegistry::register` rejects it as a real library id.
pub const GATEWAY_LIBRARY_ID: LibraryId = LibraryId(-1);

/// Monotonically mints `connection_id`s from a randomized starting seed.
///
/// One instance lives for the lifetime of a `Framer`. Seeding from a random
/// value rather than `0` keeps connection ids from colliding across worker
/// restarts that share a publication log.
pub struct ConnectionIdSequence {
    next: AtomicU64,
}

impl ConnectionIdSequence {
    pub fn new() -> Self {
        let seed: u64 = rand::rng().random();
        Self {
            next: AtomicU64::new(seed),
        }
    }

    #[cfg(test)]
    pub fn seeded(seed: u64) -> Self {
        Self {
            next: AtomicU64::new(seed),
        }
    }

    pub fn next(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for ConnectionIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Mints `correlation_id`s for admin commands and library-initiated
/// requests that need a reply matched up later.
pub struct CorrelationIdSequence {
    next: AtomicI64,
}

impl CorrelationIdSequence {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    pub fn next(&self) -> CorrelationId {
        CorrelationId(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for CorrelationIdSequence {
    fn default() -> Self {
        Self::new()
    }
}
