//! Packet decoders.
//!
//! [`decode_fixed_header`] peeks the 2-5 leading bytes without consuming
//! input; [`decode_body`] parses exactly one packet body. The streaming
//! path ([`crate::frame::Reassembler`]) combines the two; [`decode_packet`]
//! is the whole-buffer convenience used by tests and callers that already
//! hold a complete packet.

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::packet::{
    reason_code, Auth, ConnAck, Connect, Disconnect, Packet, PacketId, PacketType, Payload,
    Publish, PublishAck, QoS, SubAck, Subscribe, Subscription, UnsubAck, Unsubscribe, Will,
};
use crate::properties::Properties;
use crate::reader::Reader;
use crate::topic::{ClientId, Topic, TopicFilter};
use crate::varint;

/// How a PUBLISH payload is surfaced to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadDecodeMode {
    /// UTF-8 string when the payload format indicator says so, bytes
    /// otherwise.
    #[default]
    FormatIndicator,
    /// Attempt UTF-8 regardless, falling back to bytes on invalid data.
    Utf8,
    /// Always a zero-copy byte slice.
    Bytes,
}

/// The 2-5 leading bytes of every control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: u32,
}

/// Peek a fixed header. `Ok(None)` means the buffer does not yet hold the
/// full header, including the case of a partial variable byte integer.
pub fn decode_fixed_header(buf: &[u8]) -> Result<Option<(FixedHeader, usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    let Some((remaining_length, len_bytes)) = varint::decode(&buf[1..])? else {
        return Ok(None);
    };
    let packet_type = PacketType::try_from(first >> 4)?;
    Ok(Some((
        FixedHeader {
            packet_type,
            flags: first & 0x0F,
            remaining_length,
        },
        1 + len_bytes,
    )))
}

/// Decode one packet body of exactly `header.remaining_length` bytes.
pub fn decode_body(header: &FixedHeader, body: Bytes, mode: PayloadDecodeMode) -> Result<Packet> {
    validate_flags(header)?;
    let mut r = Reader::new(body);

    let packet = match header.packet_type {
        PacketType::Connect => decode_connect(&mut r)?,
        PacketType::ConnAck => decode_connack(&mut r)?,
        PacketType::Publish => decode_publish(header.flags, &mut r, mode)?,
        PacketType::PubAck => Packet::PubAck(decode_publish_ack(&mut r)?),
        PacketType::PubRec => Packet::PubRec(decode_publish_ack(&mut r)?),
        PacketType::PubRel => Packet::PubRel(decode_publish_ack(&mut r)?),
        PacketType::PubComp => Packet::PubComp(decode_publish_ack(&mut r)?),
        PacketType::Subscribe => decode_subscribe(&mut r)?,
        PacketType::SubAck => decode_sub_ack(&mut r, false)?,
        PacketType::Unsubscribe => decode_unsubscribe(&mut r)?,
        PacketType::UnsubAck => decode_sub_ack(&mut r, true)?,
        PacketType::PingReq => Packet::PingReq,
        PacketType::PingResp => Packet::PingResp,
        PacketType::Disconnect => decode_disconnect(&mut r)?,
        PacketType::Auth => decode_auth(&mut r)?,
    };

    if r.remaining() > 0 {
        return Err(ProtocolError::MalformedPacket(format!(
            "{} trailing bytes after {:?}",
            r.remaining(),
            header.packet_type
        )));
    }
    Ok(packet)
}

/// Try to decode one complete packet from the front of `buf`.
/// Returns `Ok(None)` when more bytes are needed.
pub fn decode_packet(buf: &[u8], mode: PayloadDecodeMode) -> Result<Option<(Packet, usize)>> {
    let Some((header, header_len)) = decode_fixed_header(buf)? else {
        return Ok(None);
    };
    let total = header_len + header.remaining_length as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let body = Bytes::copy_from_slice(&buf[header_len..total]);
    Ok(Some((decode_body(&header, body, mode)?, total)))
}

/// SUBSCRIBE, UNSUBSCRIBE, and PUBREL carry flags 0b0010; PUBLISH flags
/// are semantic; everything else must be zero.
fn validate_flags(header: &FixedHeader) -> Result<()> {
    let expected = match header.packet_type {
        PacketType::Publish => return Ok(()),
        PacketType::Subscribe | PacketType::Unsubscribe | PacketType::PubRel => 0b0010,
        _ => 0,
    };
    if header.flags != expected {
        return Err(ProtocolError::MalformedPacket(format!(
            "{:?} fixed header flags must be 0x{expected:02x}, got 0x{:02x}",
            header.packet_type, header.flags
        )));
    }
    Ok(())
}

fn read_packet_id(r: &mut Reader) -> Result<PacketId> {
    PacketId::new(r.read_u16()?)
        .ok_or_else(|| ProtocolError::MalformedPacket("packet identifier is zero".into()))
}

/// Payload representation shared by PUBLISH and the will message: UTF-8
/// when requested and valid, raw bytes otherwise.
fn typed_payload(bytes: Bytes, want_utf8: bool) -> Payload {
    if want_utf8 {
        match String::from_utf8(bytes.to_vec()) {
            Ok(s) => return Payload::Utf8(s),
            Err(_) => return Payload::Bytes(bytes),
        }
    }
    Payload::Bytes(bytes)
}

fn decode_connect(r: &mut Reader) -> Result<Packet> {
    let protocol_name = r.read_string()?;
    if protocol_name != "MQTT" {
        return Err(ProtocolError::MalformedPacket(format!(
            "unknown protocol name '{protocol_name}'"
        )));
    }
    let protocol_level = r.read_u8()?;
    if protocol_level != 5 {
        return Err(ProtocolError::MalformedPacket(format!(
            "unsupported protocol level {protocol_level}"
        )));
    }

    let flags = r.read_u8()?;
    if flags & 0x01 != 0 {
        return Err(ProtocolError::MalformedPacket(
            "reserved connect flag set".into(),
        ));
    }
    let clean_start = flags & 0x02 != 0;
    let will_flag = flags & 0x04 != 0;
    let will_qos = QoS::try_from((flags >> 3) & 0x03)?;
    let will_retain = flags & 0x20 != 0;
    let password_flag = flags & 0x40 != 0;
    let username_flag = flags & 0x80 != 0;

    // MQTT-3.1.2-11/13/15: will QoS and retain must be zero without a will
    if !will_flag && (will_qos != QoS::AtMostOnce || will_retain) {
        return Err(ProtocolError::MalformedPacket(
            "will QoS/retain set without will flag".into(),
        ));
    }

    let keep_alive = r.read_u16()?;
    let properties = Properties::decode(r, false)?;

    let client_id = ClientId::new(r.read_string()?)?;

    let will = if will_flag {
        let will_properties = Properties::decode(r, false)?;
        let topic = Topic::new(r.read_string()?)?;
        let payload = r.read_binary()?;
        let utf8 = will_properties.payload_format_indicator == Some(1);
        Some(Will {
            topic,
            payload: typed_payload(payload, utf8),
            qos: will_qos,
            retain: will_retain,
            properties: will_properties,
        })
    } else {
        None
    };

    let username = if username_flag {
        Some(r.read_string()?)
    } else {
        None
    };
    let password = if password_flag {
        Some(r.read_binary()?)
    } else {
        None
    };

    Ok(Packet::Connect(Connect {
        client_id,
        clean_start,
        keep_alive,
        username,
        password,
        will,
        properties,
    }))
}

fn decode_connack(r: &mut Reader) -> Result<Packet> {
    let ack_flags = r.read_u8()?;
    if ack_flags & !0x01 != 0 {
        return Err(ProtocolError::MalformedPacket(
            "reserved connect acknowledge flags set".into(),
        ));
    }
    let reason_code = r.read_u8()?;
    let properties = if r.remaining() > 0 {
        Properties::decode(r, false)?
    } else {
        Properties::default()
    };
    Ok(Packet::ConnAck(ConnAck {
        session_present: ack_flags & 0x01 != 0,
        reason_code,
        properties,
    }))
}

fn decode_publish(flags: u8, r: &mut Reader, mode: PayloadDecodeMode) -> Result<Packet> {
    let dup = flags & 0x08 != 0;
    let qos = QoS::try_from((flags >> 1) & 0x03)?;
    let retain = flags & 0x01 != 0;

    let topic = Topic::new(r.read_string()?)?;
    let packet_id = if qos != QoS::AtMostOnce {
        Some(read_packet_id(r)?)
    } else {
        None
    };
    let properties = Properties::decode(r, true)?;

    let raw = r.take_bytes(r.remaining())?;
    let want_utf8 = match mode {
        PayloadDecodeMode::FormatIndicator => properties.payload_format_indicator == Some(1),
        PayloadDecodeMode::Utf8 => true,
        PayloadDecodeMode::Bytes => false,
    };

    Ok(Packet::Publish(Publish {
        dup,
        qos,
        retain,
        topic,
        packet_id,
        payload: typed_payload(raw, want_utf8),
        properties,
    }))
}

fn decode_publish_ack(r: &mut Reader) -> Result<PublishAck> {
    let packet_id = read_packet_id(r)?;
    // Two bytes mean success with no properties. Past the short form the
    // reason code and the length-framed property block are both
    // mandatory; a bare reason code is malformed.
    let (code, properties) = if r.remaining() > 0 {
        (r.read_u8()?, Properties::decode(r, false)?)
    } else {
        (reason_code::SUCCESS, Properties::default())
    };
    Ok(PublishAck {
        packet_id,
        reason_code: code,
        properties,
    })
}

fn decode_subscribe(r: &mut Reader) -> Result<Packet> {
    let packet_id = read_packet_id(r)?;
    let properties = Properties::decode(r, false)?;

    let mut subscriptions = Vec::new();
    while r.remaining() > 0 {
        let filter = TopicFilter::new(r.read_string()?)?;
        let options = r.read_u8()?;
        subscriptions.push(Subscription::from_options_byte(filter, options)?);
    }
    if subscriptions.is_empty() {
        return Err(ProtocolError::MalformedPacket(
            "SUBSCRIBE with no topic filters".into(),
        ));
    }

    Ok(Packet::Subscribe(Subscribe {
        packet_id,
        subscriptions,
        properties,
    }))
}

fn decode_unsubscribe(r: &mut Reader) -> Result<Packet> {
    let packet_id = read_packet_id(r)?;
    let properties = Properties::decode(r, false)?;

    let mut filters = Vec::new();
    while r.remaining() > 0 {
        filters.push(TopicFilter::new(r.read_string()?)?);
    }
    if filters.is_empty() {
        return Err(ProtocolError::MalformedPacket(
            "UNSUBSCRIBE with no topic filters".into(),
        ));
    }

    Ok(Packet::Unsubscribe(Unsubscribe {
        packet_id,
        filters,
        properties,
    }))
}

fn decode_sub_ack(r: &mut Reader, unsub: bool) -> Result<Packet> {
    let packet_id = read_packet_id(r)?;
    let properties = Properties::decode(r, false)?;

    let reason_codes = r.take_bytes(r.remaining())?.to_vec();
    if reason_codes.is_empty() {
        return Err(ProtocolError::MalformedPacket(
            "acknowledgement with no reason codes".into(),
        ));
    }

    Ok(if unsub {
        Packet::UnsubAck(UnsubAck {
            packet_id,
            reason_codes,
            properties,
        })
    } else {
        Packet::SubAck(SubAck {
            packet_id,
            reason_codes,
            properties,
        })
    })
}

fn decode_disconnect(r: &mut Reader) -> Result<Packet> {
    if r.remaining() == 0 {
        return Ok(Packet::Disconnect(Disconnect::default()));
    }
    // same rule as the publish acks: a reason code is always followed by
    // a length-framed property block
    let reason_code = r.read_u8()?;
    let properties = Properties::decode(r, false)?;
    Ok(Packet::Disconnect(Disconnect {
        reason_code,
        properties,
    }))
}

fn decode_auth(r: &mut Reader) -> Result<Packet> {
    if r.remaining() == 0 {
        return Ok(Packet::Auth(Auth::default()));
    }
    let reason_code = r.read_u8()?;
    let properties = Properties::decode(r, false)?;
    Ok(Packet::Auth(Auth {
        reason_code,
        properties,
    }))
}
