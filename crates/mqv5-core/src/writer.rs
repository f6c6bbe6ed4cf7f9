//! Growable packet writer with a reserved fixed-header area.
//!
//! Every MQTT control packet starts with a 1-byte control field and a 1-4
//! byte remaining length, neither of which is known until the variable
//! header and payload have been serialized. The writer reserves the
//! maximum fixed-header width up front so [`Writer::finalize`] can
//! backfill both without copying the payload. Payload serialization never
//! addresses bytes below the reserved offset.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::EncodeError;
use crate::packet::PacketType;
use crate::varint;

/// 1 control byte + up to 4 remaining-length bytes.
const HEADER_RESERVE: usize = 5;

pub struct Writer {
    buf: BytesMut,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer {
    pub fn new() -> Self {
        let mut buf = BytesMut::with_capacity(256);
        buf.resize(HEADER_RESERVE, 0);
        Self { buf }
    }

    /// Bytes written past the reserved header.
    pub fn len(&self) -> usize {
        self.buf.len() - HEADER_RESERVE
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.put_u32(v.to_bits());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.put_u64(v.to_bits());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// MQTT UTF-8 string: u16 length prefix.
    pub fn write_string(&mut self, s: &str) -> Result<(), EncodeError> {
        self.write_binary(s.as_bytes())
    }

    /// MQTT binary data: u16 length prefix.
    pub fn write_binary(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        if bytes.len() > u16::MAX as usize {
            return Err(EncodeError::ValueTooLarge(bytes.len() as u64));
        }
        self.buf.put_u16(bytes.len() as u16);
        self.buf.put_slice(bytes);
        Ok(())
    }

    /// MQTT variable byte integer, 1-4 bytes.
    pub fn write_variable_byte_integer(&mut self, value: u64) -> Result<(), EncodeError> {
        let value = varint::check(value)?;
        let mut tmp = [0u8; 4];
        let n = varint::encode_to_slice(value, &mut tmp);
        self.buf.put_slice(&tmp[..n]);
        Ok(())
    }

    /// Backfill the control byte and remaining length in the reserved
    /// area, returning the finished packet.
    pub fn finalize(mut self, packet_type: PacketType, flags: u8) -> Result<Bytes, EncodeError> {
        if flags > 0x0F {
            return Err(EncodeError::InvalidFlags(flags));
        }
        let remaining = varint::check((self.buf.len() - HEADER_RESERVE) as u64)?;

        let mut len_buf = [0u8; 4];
        let len_bytes = varint::encode_to_slice(remaining, &mut len_buf);
        let start = HEADER_RESERVE - 1 - len_bytes;
        self.buf[start] = ((packet_type as u8) << 4) | flags;
        self.buf[start + 1..start + 1 + len_bytes].copy_from_slice(&len_buf[..len_bytes]);

        Ok(self.buf.freeze().slice(start..))
    }
}
