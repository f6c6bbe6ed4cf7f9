//! mqv5-core - MQTT 5 packet codec.
//!
//! Bit-exact encoding and decoding of all 14 MQTT 5 control packets and
//! 27 property identifiers, plus streaming reassembly of fragmented byte
//! streams. No I/O lives here; the client crate binds this codec to TCP
//! and WebSocket transports.

pub mod decode;
pub mod encode;
pub mod error;
pub mod frame;
pub mod packet;
pub mod properties;
pub mod reader;
pub mod topic;
pub mod varint;
pub mod writer;

pub use decode::{decode_fixed_header, decode_packet, FixedHeader, PayloadDecodeMode};
pub use encode::encode_packet;
pub use error::{EncodeError, ProtocolError, Result};
pub use frame::Reassembler;
pub use packet::*;
pub use properties::Properties;
pub use reader::Reader;
pub use topic::{ClientId, Topic, TopicFilter};
pub use writer::Writer;
