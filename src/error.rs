//! # Error Types
//!
//! Error handling for the device link, protocol dispatch, channel cryptography and
//! the virtual node proxy.
//!
//! ## Error Categories
//! - **Transport**: socket-level failures. The device link retries these through its
//!   backoff loop and only ever surfaces them as connection state changes.
//! - **Protocol**: oversized frames. The frame is dropped, the connection stays up.
//! - **Decode**: protobuf parse failures, most commonly after decrypting a packet with
//!   a key that does not belong to it. Logged at low severity.
//! - **UnknownChannel**: no key registered for the channel of an encrypted packet.
//! - **SendRejected**: a proxy client attempted a privileged operation.
//!
//! Callers of `send`/`connect` observe failures as return values or state changes;
//! nothing here is meant to bubble up to an end user verbatim.
//!
//! ## Example Usage
//! ```rust
//! use meshlink::error::{ProtocolError, Result};
//!
//! fn channel_slot(index: u32) -> Result<usize> {
//!     if index > 7 {
//!         return Err(ProtocolError::UnknownChannel(index));
//!     }
//!     Ok(index as usize)
//! }
//!
//! assert!(channel_slot(3).is_ok());
//! assert!(matches!(channel_slot(9), Err(ProtocolError::UnknownChannel(9))));
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Lock errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
    pub const ERR_HANDLER_WRITE_LOCK: &str = "Failed to acquire write lock on handler registry";
    pub const ERR_KEYRING_LOCK: &str = "Failed to acquire lock on channel keyring";
    pub const ERR_STORAGE_LOCK: &str = "Failed to acquire lock on storage";

    /// Frame validation errors
    pub const ERR_OVERSIZED_FRAME: &str = "Frame payload exceeds maximum size";
    pub const ERR_EMPTY_ENVELOPE: &str = "Envelope carries no payload variant";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_NOT_CONNECTED: &str = "Device link is not streaming";
    pub const ERR_CONFIG_TIMEOUT: &str = "Timed out waiting for config-complete";
    pub const ERR_LIVENESS_TIMEOUT: &str = "No frames received within liveness window";

    /// Proxy errors
    pub const ERR_DENYLISTED: &str = "Message type is not permitted from proxy clients";
    pub const ERR_QUEUE_FULL: &str = "Outbound queue is full";
}

/// ProtocolError is the primary error type for all link and protocol operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Protobuf decode error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Decode(#[from] prost::DecodeError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{msg}", msg = constants::ERR_CONNECTION_CLOSED)]
    ConnectionClosed,

    #[error("{msg}", msg = constants::ERR_NOT_CONNECTED)]
    NotConnected,

    #[error("{msg}: {0} bytes", msg = constants::ERR_OVERSIZED_FRAME)]
    OversizedFrame(usize),

    #[error("No key registered for channel {0}")]
    UnknownChannel(u32),

    #[error("Invalid channel key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("Send rejected: {0}")]
    SendRejected(String),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("{msg}", msg = constants::ERR_LIVENESS_TIMEOUT)]
    ConnectionTimeout,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether the error belongs to the socket-level class that the link retries.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::Transport(_)
                | ProtocolError::ConnectionClosed
                | ProtocolError::Timeout
                | ProtocolError::ConnectionTimeout
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
