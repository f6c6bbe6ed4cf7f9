//! Client error types.

use std::io;

use thiserror::Error;

/// Client error type.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] mqv5_core::ProtocolError),

    #[error("refused to encode packet: {0}")]
    Encode(#[from] mqv5_core::EncodeError),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("invalid broker address: {0}")]
    InvalidAddress(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection timeout")]
    ConnectionTimeout,

    #[error("not connected")]
    NotConnected,

    #[error("packet identifier space exhausted")]
    ResourceExhausted,

    #[error("client closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ClientError>;
