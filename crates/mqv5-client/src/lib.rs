//! mqv5-client - Resilient MQTT 5 client.
//!
//! Binds the `mqv5-core` codec to TCP and WebSocket transports and runs
//! the session state machine on top: connect, authenticate, keep alive,
//! correlate subscribe/unsubscribe acknowledgements, reconnect on
//! failure, and surface one ordered stream of inbound events.

mod client;
mod config;
mod connection;
mod error;
mod events;
mod replies;
mod session;

pub use client::{Client, EventLoop};
pub use config::{ClientOptions, ConnectOptions};
pub use error::{ClientError, Result};
pub use events::{DisconnectReason, Event};

// Re-export the wire types user code works with
pub use mqv5_core::{
    reason_code, Auth, ClientId, ConnAck, Disconnect, Packet, PacketId, Payload,
    PayloadDecodeMode, Properties, Publish, PublishAck, QoS, RetainHandling, SubAck, Subscribe,
    Subscription, Topic, TopicFilter, UnsubAck, Unsubscribe, Will,
};
