//! Low-level connection: a packet-level duplex over TCP or WebSocket.
//!
//! Accepts `tcp://`, `mqtt://` (TCP, default port 1883, nodelay on) and
//! `ws://`, `wss://` (WebSocket with subprotocol `mqtt`, binary frames).
//! Inbound bytes run through one [`Reassembler`] per connection, so the
//! read half yields whole decoded packets regardless of how the
//! transport fragments them.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use mqv5_core::{Packet, PayloadDecodeMode, Reassembler};

use crate::error::{ClientError, Result};

/// MQTT WebSocket subprotocol identifier.
const MQTT_SUBPROTOCOL: &str = "mqtt";

const DEFAULT_TCP_PORT: u16 = 1883;

const READ_BUFFER_SIZE: usize = 4096;

enum Transport {
    Tcp(TcpStream),
    Ws(Box<WebSocketStream<MaybeTlsStream<TcpStream>>>),
}

pub(crate) struct Connection {
    transport: Transport,
    reassembler: Reassembler,
}

impl Connection {
    /// Connect to `address` per the scheme matrix.
    pub async fn open(address: &str, mode: PayloadDecodeMode) -> Result<Self> {
        let url =
            Url::parse(address).map_err(|e| ClientError::InvalidAddress(e.to_string()))?;

        let transport = match url.scheme() {
            "tcp" | "mqtt" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| ClientError::InvalidAddress(format!("no host in {address}")))?;
                let port = url.port().unwrap_or(DEFAULT_TCP_PORT);
                let stream = TcpStream::connect((host, port)).await?;
                stream.set_nodelay(true)?;
                Transport::Tcp(stream)
            }
            "ws" | "wss" => {
                let mut request = url
                    .as_str()
                    .into_client_request()
                    .map_err(|e| ClientError::InvalidAddress(e.to_string()))?;
                request.headers_mut().insert(
                    "Sec-WebSocket-Protocol",
                    HeaderValue::from_static(MQTT_SUBPROTOCOL),
                );
                let (ws, _response) = connect_async(request)
                    .await
                    .map_err(|e| ClientError::WebSocket(e.to_string()))?;
                Transport::Ws(Box::new(ws))
            }
            other => {
                return Err(ClientError::InvalidAddress(format!(
                    "unsupported scheme '{other}'"
                )))
            }
        };

        Ok(Self {
            transport,
            reassembler: Reassembler::new(mode),
        })
    }

    /// Read the next whole packet. `Ok(None)` means the remote closed the
    /// stream cleanly.
    ///
    /// Cancel-safe: bytes received before cancellation stay buffered in
    /// the reassembler.
    pub async fn read_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if let Some(packet) = self.reassembler.next_packet()? {
                return Ok(Some(packet));
            }
            match &mut self.transport {
                Transport::Tcp(stream) => {
                    let mut buf = [0u8; READ_BUFFER_SIZE];
                    let n = stream.read(&mut buf).await?;
                    if n == 0 {
                        return Ok(None);
                    }
                    self.reassembler.feed(&buf[..n]);
                }
                Transport::Ws(ws) => match ws.next().await {
                    None => return Ok(None),
                    Some(Err(e)) => return Err(ClientError::WebSocket(e.to_string())),
                    Some(Ok(Message::Binary(data))) => self.reassembler.feed(&data),
                    Some(Ok(Message::Close(_))) => return Ok(None),
                    // text and control frames carry no MQTT bytes
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    /// Write one already-encoded packet.
    pub async fn write(&mut self, bytes: Bytes) -> Result<()> {
        match &mut self.transport {
            Transport::Tcp(stream) => {
                stream.write_all(&bytes).await?;
                Ok(())
            }
            Transport::Ws(ws) => ws
                .send(Message::Binary(bytes.to_vec()))
                .await
                .map_err(|e| ClientError::WebSocket(e.to_string())),
        }
    }

    /// Best-effort close of the write half; the remote sees EOF.
    pub async fn shutdown(&mut self) {
        match &mut self.transport {
            Transport::Tcp(stream) => {
                let _ = stream.shutdown().await;
            }
            Transport::Ws(ws) => {
                let _ = ws.close(None).await;
            }
        }
    }
}
