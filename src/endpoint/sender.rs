//! Writes frames for one connection, buffering whatever a non-blocking
//! write couldn't accept so later polls can resume mid-frame.

use std::collections::VecDeque;
use std::io::{ErrorKind, Write};

use mio::net::TcpStream;

use crate::error::Result;
use crate::ids::ConnectionId;

/// Per-connection write buffer. A connection is "slow" once it has
/// buffered bytes it could not hand to the kernel, and is registered with
/// the slow subscription path until it drains.
pub struct SenderEndpoint {
    connection_id: ConnectionId,
    pending: VecDeque<u8>,
}

impl SenderEndpoint {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            pending: VecDeque::new(),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn is_slow(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Enqueues `bytes` and attempts to flush immediately. Whatever the
    /// socket can't accept right now stays buffered for a later
    /// [`flush`](Self::flush) call.
    pub fn write(&mut self, stream: &mut TcpStream, bytes: &[u8]) -> Result<()> {
        self.pending.extend(bytes);
        self.flush(stream)
    }

    /// Attempts to write out everything currently buffered, stopping
    /// cleanly on `WouldBlock`.
    pub fn flush(&mut self, stream: &mut TcpStream) -> Result<()> {
        while !self.pending.is_empty() {
            let (front, _) = self.pending.as_slices();
            let chunk = if front.is_empty() {
                self.pending.make_contiguous()
            } else {
                front
            };

            match stream.write(chunk) {
                Ok(0) => break,
                Ok(n) => {
                    self.pending.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
