//! Streaming reassembly of chunked bytes into whole packets.
//!
//! The transport delivers byte chunks of arbitrary length; packet
//! boundaries fall anywhere, including inside the remaining-length
//! varint. The reassembler keeps the bytes that do not yet form a whole
//! packet in a carry buffer and consumes exactly one packet at a time.

use bytes::{Buf, BytesMut};

use crate::decode::{decode_body, decode_fixed_header, PayloadDecodeMode};
use crate::error::{ProtocolError, Result};
use crate::packet::Packet;

pub struct Reassembler {
    carry: BytesMut,
    mode: PayloadDecodeMode,
    /// Total packet size cap (0 = unlimited); bounds carry growth against
    /// an adversarial remaining length.
    max_packet_size: u32,
}

impl Reassembler {
    pub fn new(mode: PayloadDecodeMode) -> Self {
        Self::with_max_packet_size(mode, 0)
    }

    pub fn with_max_packet_size(mode: PayloadDecodeMode, max_packet_size: u32) -> Self {
        Self {
            carry: BytesMut::with_capacity(4096),
            mode,
            max_packet_size,
        }
    }

    /// Append a chunk from the transport.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.carry.extend_from_slice(chunk);
    }

    /// Consume one whole packet if the carry holds one.
    ///
    /// `Ok(None)` leaves the carry untouched so the next chunk resumes at
    /// the same position. A decode error consumes the offending frame and
    /// must be treated as loss of stream sync by the caller.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        let Some((header, header_len)) = decode_fixed_header(&self.carry)? else {
            return Ok(None);
        };
        let total = header_len + header.remaining_length as usize;
        if self.max_packet_size > 0 && total > self.max_packet_size as usize {
            return Err(ProtocolError::PacketTooLarge {
                size: total,
                max: self.max_packet_size as usize,
            });
        }
        if self.carry.len() < total {
            return Ok(None);
        }

        let mut frame = self.carry.split_to(total);
        frame.advance(header_len);
        decode_body(&header, frame.freeze(), self.mode).map(Some)
    }

    /// Drop any buffered partial packet. Called between connections so a
    /// torn frame from the previous transport cannot corrupt the next.
    pub fn reset(&mut self) {
        self.carry.clear();
    }

    /// Bytes buffered but not yet forming a whole packet.
    pub fn carry_len(&self) -> usize {
        self.carry.len()
    }
}
