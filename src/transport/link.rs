//! The link seam shared by every component that talks to the physical device.
//!
//! [`DeviceLink`](super::device::DeviceLink) is the production implementation;
//! tests substitute a recording fake.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

use crate::error::Result;

/// Connection lifecycle of a device link.
///
/// ```text
/// Disconnected -> Connecting -> AwaitingConfig -> Streaming
///                     |               |              |
///                     +-----> ReconnectWait <--------+
///                                 |
///                                 +-> Connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingConfig,
    Streaming,
    ReconnectWait,
}

impl ConnectionState {
    pub fn is_streaming(self) -> bool {
        self == ConnectionState::Streaming
    }

    /// Whether `self -> next` is an edge of the state machine.
    /// Any state may drop to `Disconnected` on an explicit disconnect.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Connecting)
                | (Connecting, AwaitingConfig)
                | (Connecting, ReconnectWait)
                | (AwaitingConfig, Streaming)
                | (AwaitingConfig, ReconnectWait)
                | (Streaming, ReconnectWait)
                | (ReconnectWait, Connecting)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingConfig => "awaiting-config",
            ConnectionState::Streaming => "streaming",
            ConnectionState::ReconnectWait => "reconnect-wait",
        };
        f.write_str(name)
    }
}

/// Outbound half of a device connection.
pub trait Link: Send + Sync {
    /// Queue one protobuf payload for the device. Fails with
    /// [`ProtocolError::NotConnected`](crate::error::ProtocolError::NotConnected)
    /// unless the link is streaming.
    fn send(&self, payload: Bytes) -> Result<()>;

    fn state(&self) -> ConnectionState;

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState>;
}
