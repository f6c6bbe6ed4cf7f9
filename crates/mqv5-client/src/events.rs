//! Events yielded by the event loop.

use mqv5_core::Packet;

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The user called `close()`.
    ClosedLocally,
    /// The transport ended or failed from the remote side.
    ClosedRemotely,
    /// No PINGRESP arrived within 1.5 times the keepalive.
    PingFailed,
}

/// One entry of the client's inbound stream: wire packets in their
/// arrival order, interleaved with engine lifecycle events.
///
/// SUBACK, UNSUBACK, and PINGRESP never appear here; the engine
/// intercepts them (reply correlation and liveness tracking).
#[derive(Debug)]
pub enum Event {
    /// An inbound MQTT packet, including the CONNACK of each
    /// (re)connection and any acknowledgement the engine does not
    /// correlate itself.
    Packet(Packet),
    /// A connection attempt failed; the engine retries after the
    /// configured reconnect delay.
    FailedConnectionAttempt { reason: String },
    /// The current connection ended.
    ConnectionClosed { reason: DisconnectReason },
    /// The keepalive liveness check failed; a `ConnectionClosed` with
    /// [`DisconnectReason::PingFailed`] follows.
    PingFailed,
    /// A non-fatal engine fault, reported just before the connection is
    /// torn down.
    Error { message: String },
}
