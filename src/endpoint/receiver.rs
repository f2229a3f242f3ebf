//! Reads bytes for one connection, frames complete ILink3/SBE messages out
//! of the stream, and publishes each raw frame to the inbound publication.
//!
//! Framing header (10 bytes, little-endian): `messageLength: u16` (total
//! frame length including this header), `blockLength: u16`,
//! `templateId: u16`, `schemaId: u16`, `version: u16`. Only `messageLength`
//! is consulted here — the rest is carried through untouched for whatever
//! decodes the payload downstream.

use std::io::{ErrorKind, Read};

use mio::net::TcpStream;

use crate::collaborators::PublishResult;
use crate::error::Result;
use crate::ids::ConnectionId;

pub const SBE_FRAME_HEADER_LEN: usize = 10;

/// Result of one non-blocking read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were read from the socket this call (0 means the read
    /// would have blocked and nothing happened).
    Progress(usize),
    Closed,
}

/// Per-connection read buffer and frame extractor.
pub struct ReceiverEndpoint {
    connection_id: ConnectionId,
    buffer: Vec<u8>,
    read_scratch: [u8; 8192],
}

impl ReceiverEndpoint {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            buffer: Vec::new(),
            read_scratch: [0u8; 8192],
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Reads once from `stream` (a single non-blocking `read` call),
    /// appends to the internal buffer, then drains as many complete frames
    /// as are available into `on_frame`. Stops draining — without losing
    /// the undrained bytes — the moment `on_frame` reports back-pressure,
    /// so the same frame is retried on the next call.
    pub fn poll_once(
        &mut self,
        stream: &mut TcpStream,
        on_frame: &mut dyn FnMut(&[u8]) -> PublishResult,
    ) -> Result<ReadOutcome> {
        match stream.read(&mut self.read_scratch) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => {
                self.buffer.extend_from_slice(&self.read_scratch[..n]);
                self.drain_frames(on_frame);
                Ok(ReadOutcome::Progress(n))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(ReadOutcome::Progress(0)),
            Err(e) => Err(e.into()),
        }
    }

    fn drain_frames(&mut self, on_frame: &mut dyn FnMut(&[u8]) -> PublishResult) {
        loop {
            if self.buffer.len() < SBE_FRAME_HEADER_LEN {
                return;
            }
            let message_length =
                u16::from_le_bytes([self.buffer[0], self.buffer[1]]) as usize;
            if message_length < SBE_FRAME_HEADER_LEN || self.buffer.len() < message_length {
                return;
            }

            match on_frame(&self.buffer[..message_length]) {
                PublishResult::Position(_) => {
                    self.buffer.drain(..message_length);
                }
                PublishResult::BackPressured => {
                    return;
                }
            }
        }
    }
}
