//! UUID and RequestTimestamp generation for Negotiate/Establish/Terminate
//! requests.
//!
//! Both values are derived from the two distinct [`Clock`](crate::clock::Clock)
//! readings, never from one another — see the note in `clock.rs`.

use crate::clock::Clock;

/// Computes a 64-bit microsecond timestamp at session construction:
/// `(current_millis * 1000) + (monotonic_nanos * 1000 mod 1000)`, intended
/// to yield microsecond resolution with sub-millisecond refinement. Read
/// literally, `(monotonic_nanos * 1000) mod 1000` is always zero for any
/// integer `monotonic_nanos`; the formula is implemented verbatim rather
/// than "corrected" to `monotonic_nanos mod 1000`, since downstream
/// consumers pin the expected output to the literal reading.
pub fn compute_uuid(clock: &dyn Clock) -> u64 {
    let millis = clock.now_ms();
    let nanos = clock.monotonic_nanos();
    ((millis * 1000) + ((nanos * 1000).rem_euclid(1000))) as u64
}

/// Computes the request timestamp sent on each outgoing
/// Negotiate/Establish/Terminate:
/// `(current_millis * 1_000_000) + (monotonic_nanos mod 1_000_000)` —
/// nanosecond-resolution epoch time.
pub fn compute_request_timestamp(clock: &dyn Clock) -> u64 {
    let millis = clock.now_ms();
    let nanos = clock.monotonic_nanos();
    ((millis * 1_000_000) + nanos.rem_euclid(1_000_000)) as u64
}
