//! Codec error types.

use thiserror::Error;

/// Errors produced while decoding bytes into packets.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("buffer underflow: needed {needed} bytes, {have} available")]
    BufferUnderflow { needed: usize, have: usize },

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("invalid remaining length")]
    InvalidRemainingLength,

    #[error("duplicate property 0x{0:02x}")]
    DuplicateProperty(u8),

    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    #[error("packet of {size} bytes exceeds maximum of {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("invalid topic filter: {0}")]
    InvalidFilter(String),

    #[error("invalid client identifier: {0}")]
    InvalidClientId(String),
}

/// Errors produced when the encoder refuses to emit an ill-formed packet.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodeError {
    #[error("SUBSCRIBE/UNSUBSCRIBE requires at least one topic filter")]
    EmptySubscriptionList,

    #[error("SUBACK/UNSUBACK requires at least one reason code")]
    EmptyReasonCodeList,

    #[error("authentication data requires an authentication method")]
    AuthDataWithoutMethod,

    #[error("server reference requires reason code Use another server or Server moved")]
    ServerReferenceReasonCode,

    #[error("packet identifier required for QoS 1 and 2")]
    PacketIdentifierRequired,

    #[error("packet identifier not allowed at QoS 0")]
    PacketIdentifierForbidden,

    #[error("encoded packet of {size} bytes exceeds maximum of {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("value {0} does not fit the field")]
    ValueTooLarge(u64),

    #[error("fixed header flags 0x{0:02x} out of range")]
    InvalidFlags(u8),
}

pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;
