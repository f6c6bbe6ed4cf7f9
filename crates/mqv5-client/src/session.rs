//! Session state that survives reconnection.
//!
//! The supervisor reconnects by looping, never by rebuilding the engine,
//! so everything negotiated with the broker lives here: the
//! broker-assigned client identifier, the effective keepalive, and the
//! maximum packet size applied to the writer.

use std::time::Duration;

use tokio::time::Instant;

use mqv5_core::{ClientId, ConnAck, Connect};

use crate::config::ConnectOptions;

/// Keepalive requested when the connect template leaves it unset.
const DEFAULT_KEEP_ALIVE_SECS: u16 = 5;

pub(crate) struct Session {
    connect: ConnectOptions,
    /// Broker-assigned identifier, reused across reconnections when the
    /// template has none of its own.
    pub assigned_client_id: Option<ClientId>,
    /// Effective keepalive in seconds; zero disables heartbeats.
    pub keep_alive: u16,
    /// Negotiated writer ceiling (0 = unlimited).
    pub max_packet_size: u32,
    pub last_pingresp: Instant,
}

impl Session {
    pub fn new(connect: ConnectOptions) -> Self {
        let keep_alive = connect.keep_alive.unwrap_or(DEFAULT_KEEP_ALIVE_SECS);
        Self {
            connect,
            assigned_client_id: None,
            keep_alive,
            max_packet_size: 0,
            last_pingresp: Instant::now(),
        }
    }

    /// Seconds requested in the CONNECT packet.
    pub fn requested_keep_alive(&self) -> u16 {
        self.connect.keep_alive.unwrap_or(DEFAULT_KEEP_ALIVE_SECS)
    }

    /// Build the CONNECT for this attempt from the template, substituting
    /// the broker-assigned identifier from a previous session.
    pub fn connect_packet(&self) -> Connect {
        let client_id = self
            .connect
            .client_id
            .clone()
            .or_else(|| self.assigned_client_id.clone())
            .unwrap_or_default();
        Connect {
            client_id,
            clean_start: self.connect.clean_start.unwrap_or(true),
            keep_alive: self.requested_keep_alive(),
            username: self.connect.username.clone(),
            password: self.connect.password.clone(),
            will: self.connect.will.clone(),
            properties: self.connect.properties.clone(),
        }
    }

    /// Capture what the broker negotiated.
    pub fn absorb_connack(&mut self, ack: &ConnAck) {
        if self.connect.client_id.is_none() {
            if let Some(assigned) = &ack.properties.assigned_client_identifier {
                if let Ok(id) = ClientId::new(assigned.clone()) {
                    self.assigned_client_id = Some(id);
                }
            }
        }
        self.keep_alive = ack
            .properties
            .server_keep_alive
            .unwrap_or_else(|| self.requested_keep_alive());
        if let Some(max) = ack.properties.maximum_packet_size {
            self.max_packet_size = max;
        }
        self.last_pingresp = Instant::now();
    }

    /// PINGREQ cadence: keepalive less a 100 ms margin. `None` disables
    /// the timer.
    pub fn ping_interval(&self) -> Option<Duration> {
        if self.keep_alive == 0 {
            return None;
        }
        Some(Duration::from_millis(self.keep_alive as u64 * 1000 - 100))
    }

    /// Liveness check: a PINGRESP must arrive within 1.5 keepalives.
    pub fn ping_overdue(&self) -> bool {
        self.last_pingresp.elapsed() > Duration::from_millis(self.keep_alive as u64 * 1500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqv5_core::Properties;

    #[test]
    fn default_keep_alive_when_unset() {
        let session = Session::new(ConnectOptions::default());
        assert_eq!(session.requested_keep_alive(), 5);
        assert_eq!(session.connect_packet().keep_alive, 5);
        assert!(session.ping_interval().is_some());
    }

    #[test]
    fn explicit_zero_disables_pings() {
        let session = Session::new(ConnectOptions::new().keep_alive(0));
        assert_eq!(session.connect_packet().keep_alive, 0);
        assert_eq!(session.ping_interval(), None);
    }

    #[test]
    fn server_keep_alive_wins() {
        let mut session = Session::new(ConnectOptions::new().keep_alive(60));
        let ack = ConnAck {
            session_present: false,
            reason_code: 0,
            properties: Properties {
                server_keep_alive: Some(10),
                maximum_packet_size: Some(2048),
                ..Properties::default()
            },
        };
        session.absorb_connack(&ack);
        assert_eq!(session.keep_alive, 10);
        assert_eq!(session.max_packet_size, 2048);
        assert_eq!(session.ping_interval(), Some(Duration::from_millis(9900)));
    }

    #[test]
    fn assigned_client_id_survives_reconnect() {
        let mut session = Session::new(ConnectOptions::default());
        assert!(session.connect_packet().client_id.is_empty());

        let ack = ConnAck {
            session_present: false,
            reason_code: 0,
            properties: Properties {
                assigned_client_identifier: Some("auto-7".into()),
                ..Properties::default()
            },
        };
        session.absorb_connack(&ack);
        assert_eq!(session.connect_packet().client_id.as_str(), "auto-7");
    }

    #[test]
    fn explicit_client_id_is_never_replaced() {
        let mut session = Session::new(
            ConnectOptions::new().client_id(ClientId::new("mine").unwrap()),
        );
        let ack = ConnAck {
            session_present: false,
            reason_code: 0,
            properties: Properties {
                assigned_client_identifier: Some("auto-7".into()),
                ..Properties::default()
            },
        };
        session.absorb_connack(&ack);
        assert_eq!(session.connect_packet().client_id.as_str(), "mine");
    }
}
