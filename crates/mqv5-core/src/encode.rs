//! Packet encoders.
//!
//! Every encoder follows the same shape: reserve the maximum fixed-header
//! width, serialize the variable header, then properties, then payload,
//! and finalize with the real control byte and remaining length.
//!
//! The payload format indicator is derived from the payload's logical
//! type here; any caller-supplied value is ignored.

use bytes::Bytes;

use crate::error::EncodeError;
use crate::packet::{
    reason_code, Auth, ConnAck, Connect, Disconnect, Packet, PacketType, Publish, PublishAck, QoS,
    Subscribe, Unsubscribe,
};
use crate::properties::Properties;
use crate::writer::Writer;

/// PINGREQ is always exactly these two bytes.
pub const PINGREQ_BYTES: &[u8] = &[0xC0, 0x00];
/// PINGRESP is always exactly these two bytes.
pub const PINGRESP_BYTES: &[u8] = &[0xD0, 0x00];

/// SUBSCRIBE, UNSUBSCRIBE, and PUBREL carry this reserved flags nibble.
const RESERVED_FLAGS: u8 = 0b0010;

/// Encode a packet. `max_packet_size` of zero means unlimited; a finished
/// packet above the limit is rejected with [`EncodeError::PacketTooLarge`].
pub fn encode_packet(packet: &Packet, max_packet_size: u32) -> Result<Bytes, EncodeError> {
    let bytes = match packet {
        Packet::Connect(p) => encode_connect(p)?,
        Packet::ConnAck(p) => encode_connack(p)?,
        Packet::Publish(p) => encode_publish(p)?,
        Packet::PubAck(p) => encode_publish_ack(PacketType::PubAck, 0, p)?,
        Packet::PubRec(p) => encode_publish_ack(PacketType::PubRec, 0, p)?,
        Packet::PubRel(p) => encode_publish_ack(PacketType::PubRel, RESERVED_FLAGS, p)?,
        Packet::PubComp(p) => encode_publish_ack(PacketType::PubComp, 0, p)?,
        Packet::Subscribe(p) => encode_subscribe(p)?,
        Packet::SubAck(p) => encode_sub_ack(PacketType::SubAck, p.packet_id.get(), &p.reason_codes, &p.properties)?,
        Packet::Unsubscribe(p) => encode_unsubscribe(p)?,
        Packet::UnsubAck(p) => encode_sub_ack(PacketType::UnsubAck, p.packet_id.get(), &p.reason_codes, &p.properties)?,
        Packet::PingReq => Bytes::from_static(PINGREQ_BYTES),
        Packet::PingResp => Bytes::from_static(PINGRESP_BYTES),
        Packet::Disconnect(p) => encode_disconnect(p)?,
        Packet::Auth(p) => encode_auth(p)?,
    };

    if max_packet_size > 0 && bytes.len() > max_packet_size as usize {
        return Err(EncodeError::PacketTooLarge {
            size: bytes.len(),
            max: max_packet_size as usize,
        });
    }
    Ok(bytes)
}

/// Authentication data is only meaningful alongside a method.
fn check_auth_properties(props: &Properties) -> Result<(), EncodeError> {
    if props.authentication_data.is_some() && props.authentication_method.is_none() {
        return Err(EncodeError::AuthDataWithoutMethod);
    }
    Ok(())
}

/// The single place the payload format indicator is derived from the
/// payload's logical type.
fn derived_properties(properties: &Properties, utf8: bool) -> Properties {
    let mut props = properties.clone();
    props.payload_format_indicator = if utf8 { Some(1) } else { None };
    props
}

fn encode_connect(p: &Connect) -> Result<Bytes, EncodeError> {
    check_auth_properties(&p.properties)?;

    let mut w = Writer::new();
    w.write_string("MQTT")?;
    w.write_u8(5);

    let mut flags = 0u8;
    if p.clean_start {
        flags |= 0x02;
    }
    if let Some(will) = &p.will {
        flags |= 0x04;
        flags |= (will.qos as u8) << 3;
        if will.retain {
            flags |= 0x20;
        }
    }
    if p.password.is_some() {
        flags |= 0x40;
    }
    if p.username.is_some() {
        flags |= 0x80;
    }
    w.write_u8(flags);

    w.write_u16(p.keep_alive);
    p.properties.encode(&mut w)?;

    // Payload: client id, will block, username, password
    w.write_string(p.client_id.as_str())?;
    if let Some(will) = &p.will {
        derived_properties(&will.properties, will.payload.is_utf8()).encode(&mut w)?;
        w.write_string(will.topic.as_str())?;
        w.write_binary(will.payload.as_bytes())?;
    }
    if let Some(username) = &p.username {
        w.write_string(username)?;
    }
    if let Some(password) = &p.password {
        w.write_binary(password)?;
    }

    w.finalize(PacketType::Connect, 0)
}

fn encode_connack(p: &ConnAck) -> Result<Bytes, EncodeError> {
    if p.properties.server_reference.is_some()
        && p.reason_code != reason_code::USE_ANOTHER_SERVER
        && p.reason_code != reason_code::SERVER_MOVED
    {
        return Err(EncodeError::ServerReferenceReasonCode);
    }

    let mut w = Writer::new();
    w.write_u8(p.session_present as u8);
    w.write_u8(p.reason_code);
    p.properties.encode(&mut w)?;
    w.finalize(PacketType::ConnAck, 0)
}

fn encode_publish(p: &Publish) -> Result<Bytes, EncodeError> {
    match (p.qos, p.packet_id) {
        (QoS::AtMostOnce, Some(_)) => return Err(EncodeError::PacketIdentifierForbidden),
        (QoS::AtLeastOnce | QoS::ExactlyOnce, None) => {
            return Err(EncodeError::PacketIdentifierRequired)
        }
        _ => {}
    }

    let flags = (p.dup as u8) << 3 | (p.qos as u8) << 1 | p.retain as u8;

    let mut w = Writer::new();
    w.write_string(p.topic.as_str())?;
    if let Some(id) = p.packet_id {
        w.write_u16(id.get());
    }
    derived_properties(&p.properties, p.payload.is_utf8()).encode(&mut w)?;
    w.write_bytes(p.payload.as_bytes());
    w.finalize(PacketType::Publish, flags)
}

fn encode_publish_ack(
    packet_type: PacketType,
    flags: u8,
    p: &PublishAck,
) -> Result<Bytes, EncodeError> {
    let mut w = Writer::new();
    w.write_u16(p.packet_id.get());
    // Success with no properties ends the packet at two bytes
    if p.reason_code != reason_code::SUCCESS || !p.properties.is_empty() {
        w.write_u8(p.reason_code);
        p.properties.encode(&mut w)?;
    }
    w.finalize(packet_type, flags)
}

fn encode_subscribe(p: &Subscribe) -> Result<Bytes, EncodeError> {
    if p.subscriptions.is_empty() {
        return Err(EncodeError::EmptySubscriptionList);
    }

    let mut w = Writer::new();
    w.write_u16(p.packet_id.get());
    p.properties.encode(&mut w)?;
    for sub in &p.subscriptions {
        w.write_string(sub.filter.as_str())?;
        w.write_u8(sub.options_byte());
    }
    w.finalize(PacketType::Subscribe, RESERVED_FLAGS)
}

fn encode_unsubscribe(p: &Unsubscribe) -> Result<Bytes, EncodeError> {
    if p.filters.is_empty() {
        return Err(EncodeError::EmptySubscriptionList);
    }

    let mut w = Writer::new();
    w.write_u16(p.packet_id.get());
    p.properties.encode(&mut w)?;
    for filter in &p.filters {
        w.write_string(filter.as_str())?;
    }
    w.finalize(PacketType::Unsubscribe, RESERVED_FLAGS)
}

fn encode_sub_ack(
    packet_type: PacketType,
    packet_id: u16,
    reason_codes: &[u8],
    properties: &Properties,
) -> Result<Bytes, EncodeError> {
    if reason_codes.is_empty() {
        return Err(EncodeError::EmptyReasonCodeList);
    }

    let mut w = Writer::new();
    w.write_u16(packet_id);
    properties.encode(&mut w)?;
    w.write_bytes(reason_codes);
    w.finalize(packet_type, 0)
}

fn encode_disconnect(p: &Disconnect) -> Result<Bytes, EncodeError> {
    let mut w = Writer::new();
    if p.reason_code != reason_code::NORMAL_DISCONNECTION || !p.properties.is_empty() {
        w.write_u8(p.reason_code);
        p.properties.encode(&mut w)?;
    }
    w.finalize(PacketType::Disconnect, 0)
}

fn encode_auth(p: &Auth) -> Result<Bytes, EncodeError> {
    check_auth_properties(&p.properties)?;

    let mut w = Writer::new();
    if p.reason_code != reason_code::SUCCESS || !p.properties.is_empty() {
        w.write_u8(p.reason_code);
        p.properties.encode(&mut w)?;
    }
    w.finalize(PacketType::Auth, 0)
}
