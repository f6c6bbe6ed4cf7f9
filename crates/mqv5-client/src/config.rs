//! Client configuration types.

use std::time::Duration;

use bytes::Bytes;

use mqv5_core::{ClientId, PayloadDecodeMode, Properties, Will};

/// Engine behaviour knobs.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Delay between reconnect attempts. Zero disables auto reconnect.
    pub reconnect_time: Duration,
    /// How long to await the CONNACK after writing CONNECT.
    pub connect_timeout: Duration,
    /// How inbound PUBLISH payloads are represented.
    pub payload_decode_mode: PayloadDecodeMode,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            reconnect_time: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(10),
            payload_decode_mode: PayloadDecodeMode::FormatIndicator,
        }
    }
}

impl ClientOptions {
    pub fn reconnect_time(mut self, delay: Duration) -> Self {
        self.reconnect_time = delay;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn payload_decode_mode(mut self, mode: PayloadDecodeMode) -> Self {
        self.payload_decode_mode = mode;
        self
    }
}

/// Template for the CONNECT packet sent on every (re)connection.
///
/// Unset fields take the protocol defaults: broker-assigned client
/// identifier, clean start, and the engine's 5-second keepalive. An
/// explicit keepalive of zero disables heartbeats.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub client_id: Option<ClientId>,
    pub clean_start: Option<bool>,
    pub keep_alive: Option<u16>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub will: Option<Will>,
    pub properties: Properties,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_id(mut self, id: ClientId) -> Self {
        self.client_id = Some(id);
        self
    }

    pub fn clean_start(mut self, clean: bool) -> Self {
        self.clean_start = Some(clean);
        self
    }

    /// Keepalive in seconds; zero disables heartbeats.
    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = Some(seconds);
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<Bytes>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }
}
