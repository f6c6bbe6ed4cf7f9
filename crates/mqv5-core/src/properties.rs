//! MQTT 5 property sub-codec.
//!
//! Properties serialize as `length (variable byte integer) || entries`,
//! each entry being `identifier (1 byte) || value`. One [`Properties`]
//! struct covers all 27 identifiers; each packet writes the fields it
//! carries and decodes whatever the peer sent.
//!
//! A second occurrence of a non-repeating property is rejected as
//! [`ProtocolError::DuplicateProperty`]. `User Property` may always
//! repeat; `Subscription Identifier` repeats only inside PUBLISH.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{EncodeError, ProtocolError, Result};
use crate::reader::Reader;
use crate::varint;
use crate::writer::Writer;

/// Property identifiers defined by MQTT 5.
pub mod property {
    pub const PAYLOAD_FORMAT_INDICATOR: u8 = 0x01;
    pub const MESSAGE_EXPIRY_INTERVAL: u8 = 0x02;
    pub const CONTENT_TYPE: u8 = 0x03;
    pub const RESPONSE_TOPIC: u8 = 0x08;
    pub const CORRELATION_DATA: u8 = 0x09;
    pub const SUBSCRIPTION_IDENTIFIER: u8 = 0x0B;
    pub const SESSION_EXPIRY_INTERVAL: u8 = 0x11;
    pub const ASSIGNED_CLIENT_IDENTIFIER: u8 = 0x12;
    pub const SERVER_KEEP_ALIVE: u8 = 0x13;
    pub const AUTHENTICATION_METHOD: u8 = 0x15;
    pub const AUTHENTICATION_DATA: u8 = 0x16;
    pub const REQUEST_PROBLEM_INFORMATION: u8 = 0x17;
    pub const WILL_DELAY_INTERVAL: u8 = 0x18;
    pub const REQUEST_RESPONSE_INFORMATION: u8 = 0x19;
    pub const RESPONSE_INFORMATION: u8 = 0x1A;
    pub const SERVER_REFERENCE: u8 = 0x1C;
    pub const REASON_STRING: u8 = 0x1F;
    pub const RECEIVE_MAXIMUM: u8 = 0x21;
    pub const TOPIC_ALIAS_MAXIMUM: u8 = 0x22;
    pub const TOPIC_ALIAS: u8 = 0x23;
    pub const MAXIMUM_QOS: u8 = 0x24;
    pub const RETAIN_AVAILABLE: u8 = 0x25;
    pub const USER_PROPERTY: u8 = 0x26;
    pub const MAXIMUM_PACKET_SIZE: u8 = 0x27;
    pub const WILDCARD_SUBSCRIPTION_AVAILABLE: u8 = 0x28;
    pub const SUBSCRIPTION_IDENTIFIERS_AVAILABLE: u8 = 0x29;
    pub const SHARED_SUBSCRIPTION_AVAILABLE: u8 = 0x2A;
}

use self::property as pt;

/// Typed view of a packet's property block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    pub payload_format_indicator: Option<u8>,
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Bytes>,
    /// Repeats only inside PUBLISH; a single value elsewhere.
    pub subscription_identifiers: Vec<u32>,
    pub session_expiry_interval: Option<u32>,
    pub assigned_client_identifier: Option<String>,
    pub server_keep_alive: Option<u16>,
    pub authentication_method: Option<String>,
    pub authentication_data: Option<Bytes>,
    pub request_problem_information: Option<bool>,
    pub will_delay_interval: Option<u32>,
    pub request_response_information: Option<bool>,
    pub response_information: Option<String>,
    pub server_reference: Option<String>,
    pub reason_string: Option<String>,
    pub receive_maximum: Option<u16>,
    pub topic_alias_maximum: Option<u16>,
    pub topic_alias: Option<u16>,
    pub maximum_qos: Option<u8>,
    pub retain_available: Option<bool>,
    pub user_properties: Vec<(String, String)>,
    pub maximum_packet_size: Option<u32>,
    pub wildcard_subscription_available: Option<bool>,
    pub subscription_identifiers_available: Option<bool>,
    pub shared_subscription_available: Option<bool>,
}

fn set_once<T>(slot: &mut Option<T>, id: u8, value: T) -> Result<()> {
    if slot.is_some() {
        return Err(ProtocolError::DuplicateProperty(id));
    }
    *slot = Some(value);
    Ok(())
}

fn read_bool(r: &mut Reader) -> Result<bool> {
    match r.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        v => Err(ProtocolError::MalformedPacket(format!(
            "boolean property value out of range: {v}"
        ))),
    }
}

impl Properties {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Decode a length-framed property block. `in_publish` permits the
    /// Subscription Identifier to accumulate.
    pub fn decode(outer: &mut Reader, in_publish: bool) -> Result<Self> {
        let len = outer.read_variable_byte_integer()? as usize;
        let mut r = outer.sub_reader(len)?;
        let mut p = Properties::default();

        while r.remaining() > 0 {
            let id = r.read_u8()?;
            match id {
                pt::PAYLOAD_FORMAT_INDICATOR => {
                    set_once(&mut p.payload_format_indicator, id, r.read_u8()?)?
                }
                pt::MESSAGE_EXPIRY_INTERVAL => {
                    set_once(&mut p.message_expiry_interval, id, r.read_u32()?)?
                }
                pt::CONTENT_TYPE => set_once(&mut p.content_type, id, r.read_string()?)?,
                pt::RESPONSE_TOPIC => set_once(&mut p.response_topic, id, r.read_string()?)?,
                pt::CORRELATION_DATA => set_once(&mut p.correlation_data, id, r.read_binary()?)?,
                pt::SUBSCRIPTION_IDENTIFIER => {
                    let value = r.read_variable_byte_integer()?;
                    if value == 0 {
                        return Err(ProtocolError::MalformedPacket(
                            "subscription identifier must be non-zero".into(),
                        ));
                    }
                    if !in_publish && !p.subscription_identifiers.is_empty() {
                        return Err(ProtocolError::DuplicateProperty(id));
                    }
                    p.subscription_identifiers.push(value);
                }
                pt::SESSION_EXPIRY_INTERVAL => {
                    set_once(&mut p.session_expiry_interval, id, r.read_u32()?)?
                }
                pt::ASSIGNED_CLIENT_IDENTIFIER => {
                    set_once(&mut p.assigned_client_identifier, id, r.read_string()?)?
                }
                pt::SERVER_KEEP_ALIVE => set_once(&mut p.server_keep_alive, id, r.read_u16()?)?,
                pt::AUTHENTICATION_METHOD => {
                    set_once(&mut p.authentication_method, id, r.read_string()?)?
                }
                pt::AUTHENTICATION_DATA => {
                    set_once(&mut p.authentication_data, id, r.read_binary()?)?
                }
                pt::REQUEST_PROBLEM_INFORMATION => {
                    set_once(&mut p.request_problem_information, id, read_bool(&mut r)?)?
                }
                pt::WILL_DELAY_INTERVAL => {
                    set_once(&mut p.will_delay_interval, id, r.read_u32()?)?
                }
                pt::REQUEST_RESPONSE_INFORMATION => {
                    set_once(&mut p.request_response_information, id, read_bool(&mut r)?)?
                }
                pt::RESPONSE_INFORMATION => {
                    set_once(&mut p.response_information, id, r.read_string()?)?
                }
                pt::SERVER_REFERENCE => set_once(&mut p.server_reference, id, r.read_string()?)?,
                pt::REASON_STRING => set_once(&mut p.reason_string, id, r.read_string()?)?,
                pt::RECEIVE_MAXIMUM => set_once(&mut p.receive_maximum, id, r.read_u16()?)?,
                pt::TOPIC_ALIAS_MAXIMUM => {
                    set_once(&mut p.topic_alias_maximum, id, r.read_u16()?)?
                }
                pt::TOPIC_ALIAS => set_once(&mut p.topic_alias, id, r.read_u16()?)?,
                pt::MAXIMUM_QOS => set_once(&mut p.maximum_qos, id, r.read_u8()?)?,
                pt::RETAIN_AVAILABLE => set_once(&mut p.retain_available, id, read_bool(&mut r)?)?,
                pt::USER_PROPERTY => {
                    let key = r.read_string()?;
                    let value = r.read_string()?;
                    p.user_properties.push((key, value));
                }
                pt::MAXIMUM_PACKET_SIZE => {
                    set_once(&mut p.maximum_packet_size, id, r.read_u32()?)?
                }
                pt::WILDCARD_SUBSCRIPTION_AVAILABLE => set_once(
                    &mut p.wildcard_subscription_available,
                    id,
                    read_bool(&mut r)?,
                )?,
                pt::SUBSCRIPTION_IDENTIFIERS_AVAILABLE => set_once(
                    &mut p.subscription_identifiers_available,
                    id,
                    read_bool(&mut r)?,
                )?,
                pt::SHARED_SUBSCRIPTION_AVAILABLE => set_once(
                    &mut p.shared_subscription_available,
                    id,
                    read_bool(&mut r)?,
                )?,
                _ => {
                    return Err(ProtocolError::MalformedPacket(format!(
                        "unknown property identifier 0x{id:02x}"
                    )))
                }
            }
        }

        Ok(p)
    }

    /// Encode the length-framed property block into `w`.
    pub fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        let mut buf = BytesMut::new();
        self.encode_entries(&mut buf)?;
        w.write_variable_byte_integer(buf.len() as u64)?;
        w.write_bytes(&buf);
        Ok(())
    }

    fn encode_entries(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        if let Some(v) = self.payload_format_indicator {
            buf.put_u8(pt::PAYLOAD_FORMAT_INDICATOR);
            buf.put_u8(v);
        }
        if let Some(v) = self.message_expiry_interval {
            buf.put_u8(pt::MESSAGE_EXPIRY_INTERVAL);
            buf.put_u32(v);
        }
        if let Some(v) = &self.content_type {
            buf.put_u8(pt::CONTENT_TYPE);
            put_str(buf, v)?;
        }
        if let Some(v) = &self.response_topic {
            buf.put_u8(pt::RESPONSE_TOPIC);
            put_str(buf, v)?;
        }
        if let Some(v) = &self.correlation_data {
            buf.put_u8(pt::CORRELATION_DATA);
            put_bin(buf, v)?;
        }
        for &v in &self.subscription_identifiers {
            buf.put_u8(pt::SUBSCRIPTION_IDENTIFIER);
            put_varint(buf, v)?;
        }
        if let Some(v) = self.session_expiry_interval {
            buf.put_u8(pt::SESSION_EXPIRY_INTERVAL);
            buf.put_u32(v);
        }
        if let Some(v) = &self.assigned_client_identifier {
            buf.put_u8(pt::ASSIGNED_CLIENT_IDENTIFIER);
            put_str(buf, v)?;
        }
        if let Some(v) = self.server_keep_alive {
            buf.put_u8(pt::SERVER_KEEP_ALIVE);
            buf.put_u16(v);
        }
        if let Some(v) = &self.authentication_method {
            buf.put_u8(pt::AUTHENTICATION_METHOD);
            put_str(buf, v)?;
        }
        if let Some(v) = &self.authentication_data {
            buf.put_u8(pt::AUTHENTICATION_DATA);
            put_bin(buf, v)?;
        }
        if let Some(v) = self.request_problem_information {
            buf.put_u8(pt::REQUEST_PROBLEM_INFORMATION);
            buf.put_u8(v as u8);
        }
        if let Some(v) = self.will_delay_interval {
            buf.put_u8(pt::WILL_DELAY_INTERVAL);
            buf.put_u32(v);
        }
        if let Some(v) = self.request_response_information {
            buf.put_u8(pt::REQUEST_RESPONSE_INFORMATION);
            buf.put_u8(v as u8);
        }
        if let Some(v) = &self.response_information {
            buf.put_u8(pt::RESPONSE_INFORMATION);
            put_str(buf, v)?;
        }
        if let Some(v) = &self.server_reference {
            buf.put_u8(pt::SERVER_REFERENCE);
            put_str(buf, v)?;
        }
        if let Some(v) = &self.reason_string {
            buf.put_u8(pt::REASON_STRING);
            put_str(buf, v)?;
        }
        if let Some(v) = self.receive_maximum {
            buf.put_u8(pt::RECEIVE_MAXIMUM);
            buf.put_u16(v);
        }
        if let Some(v) = self.topic_alias_maximum {
            buf.put_u8(pt::TOPIC_ALIAS_MAXIMUM);
            buf.put_u16(v);
        }
        if let Some(v) = self.topic_alias {
            buf.put_u8(pt::TOPIC_ALIAS);
            buf.put_u16(v);
        }
        if let Some(v) = self.maximum_qos {
            buf.put_u8(pt::MAXIMUM_QOS);
            buf.put_u8(v);
        }
        if let Some(v) = self.retain_available {
            buf.put_u8(pt::RETAIN_AVAILABLE);
            buf.put_u8(v as u8);
        }
        for (key, value) in &self.user_properties {
            buf.put_u8(pt::USER_PROPERTY);
            put_str(buf, key)?;
            put_str(buf, value)?;
        }
        if let Some(v) = self.maximum_packet_size {
            buf.put_u8(pt::MAXIMUM_PACKET_SIZE);
            buf.put_u32(v);
        }
        if let Some(v) = self.wildcard_subscription_available {
            buf.put_u8(pt::WILDCARD_SUBSCRIPTION_AVAILABLE);
            buf.put_u8(v as u8);
        }
        if let Some(v) = self.subscription_identifiers_available {
            buf.put_u8(pt::SUBSCRIPTION_IDENTIFIERS_AVAILABLE);
            buf.put_u8(v as u8);
        }
        if let Some(v) = self.shared_subscription_available {
            buf.put_u8(pt::SHARED_SUBSCRIPTION_AVAILABLE);
            buf.put_u8(v as u8);
        }
        Ok(())
    }
}

fn put_str(buf: &mut BytesMut, s: &str) -> Result<(), EncodeError> {
    put_bin(buf, s.as_bytes())
}

fn put_bin(buf: &mut BytesMut, bytes: &[u8]) -> Result<(), EncodeError> {
    if bytes.len() > u16::MAX as usize {
        return Err(EncodeError::ValueTooLarge(bytes.len() as u64));
    }
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
    Ok(())
}

fn put_varint(buf: &mut BytesMut, value: u32) -> Result<(), EncodeError> {
    let value = varint::check(value as u64)?;
    let mut tmp = [0u8; 4];
    let n = varint::encode_to_slice(value, &mut tmp);
    buf.put_slice(&tmp[..n]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;

    fn roundtrip(props: &Properties, in_publish: bool) -> Properties {
        let mut w = Writer::new();
        props.encode(&mut w).unwrap();
        let bytes = w.finalize(PacketType::Auth, 0).unwrap();
        let mut r = Reader::new(bytes.slice(2..));
        let decoded = Properties::decode(&mut r, in_publish).unwrap();
        assert_eq!(r.remaining(), 0);
        decoded
    }

    #[test]
    fn empty_block_is_one_byte() {
        let mut w = Writer::new();
        Properties::default().encode(&mut w).unwrap();
        let bytes = w.finalize(PacketType::Auth, 0).unwrap();
        assert_eq!(bytes.as_ref(), &[0xF0, 0x01, 0x00]);
    }

    #[test]
    fn typed_values_roundtrip() {
        let props = Properties {
            payload_format_indicator: Some(1),
            message_expiry_interval: Some(300),
            content_type: Some("application/json".into()),
            response_topic: Some("replies/1".into()),
            correlation_data: Some(Bytes::from_static(&[1, 2, 3])),
            session_expiry_interval: Some(0xFFFF_FFFF),
            server_keep_alive: Some(30),
            receive_maximum: Some(10),
            topic_alias_maximum: Some(5),
            maximum_packet_size: Some(1 << 20),
            retain_available: Some(false),
            user_properties: vec![("a".into(), "1".into()), ("a".into(), "2".into())],
            ..Properties::default()
        };
        assert_eq!(roundtrip(&props, false), props);
    }

    #[test]
    fn duplicate_non_repeating_property_rejected() {
        // two payload format indicators
        let block = [0x04, 0x01, 0x01, 0x01, 0x00];
        let mut r = Reader::new(Bytes::copy_from_slice(&block));
        assert_eq!(
            Properties::decode(&mut r, false),
            Err(ProtocolError::DuplicateProperty(0x01))
        );
    }

    #[test]
    fn user_property_repeats() {
        let props = Properties {
            user_properties: vec![("k".into(), "v1".into()), ("k".into(), "v2".into())],
            ..Properties::default()
        };
        assert_eq!(roundtrip(&props, false).user_properties.len(), 2);
    }

    #[test]
    fn subscription_identifier_repeats_only_in_publish() {
        let props = Properties {
            subscription_identifiers: vec![1, 2],
            ..Properties::default()
        };
        assert_eq!(roundtrip(&props, true), props);

        let mut w = Writer::new();
        props.encode(&mut w).unwrap();
        let bytes = w.finalize(PacketType::Auth, 0).unwrap();
        let mut r = Reader::new(bytes.slice(2..));
        assert_eq!(
            Properties::decode(&mut r, false),
            Err(ProtocolError::DuplicateProperty(0x0B))
        );
    }

    #[test]
    fn zero_subscription_identifier_rejected() {
        let block = [0x02, 0x0B, 0x00];
        let mut r = Reader::new(Bytes::copy_from_slice(&block));
        assert!(matches!(
            Properties::decode(&mut r, true),
            Err(ProtocolError::MalformedPacket(_))
        ));
    }

    #[test]
    fn unknown_identifier_rejected() {
        let block = [0x02, 0x7F, 0x00];
        let mut r = Reader::new(Bytes::copy_from_slice(&block));
        assert!(matches!(
            Properties::decode(&mut r, false),
            Err(ProtocolError::MalformedPacket(_))
        ));
    }

    #[test]
    fn boolean_property_range() {
        let block = [0x02, 0x25, 0x02];
        let mut r = Reader::new(Bytes::copy_from_slice(&block));
        assert!(matches!(
            Properties::decode(&mut r, false),
            Err(ProtocolError::MalformedPacket(_))
        ));
    }

    #[test]
    fn truncated_block_is_underflow() {
        // declared length 4, only 2 bytes present
        let block = [0x04, 0x13, 0x00];
        let mut r = Reader::new(Bytes::copy_from_slice(&block));
        assert!(matches!(
            Properties::decode(&mut r, false),
            Err(ProtocolError::BufferUnderflow { .. })
        ));
    }
}
