//! Config handshake with the device.
//!
//! A session starts by sending `ToRadio { want_config_id: nonce }`. The device
//! answers with its full configuration (my-info, node db, channels, config
//! sections) and closes the dump with `FromRadio { config_complete_id: nonce }`.
//! Only a sentinel carrying *this session's* nonce completes the handshake, so a
//! late sentinel from a previous session cannot promote a new one to streaming.
//!
//! **Per-Session State**
//! [`HandshakeState`] is created fresh for every session and accumulates a new
//! [`DeviceSnapshot`]; the snapshot of a previous session is never merged into it.

use bytes::Bytes;
use prost::Message as _;
use rand::Rng;
use tracing::{debug, trace};

use crate::proto::{from_radio, to_radio, FromRadio, Heartbeat, ToRadio};
use crate::protocol::snapshot::DeviceSnapshot;

/// Fresh non-zero handshake nonce.
pub fn generate_nonce() -> u32 {
    rand::rng().random_range(1..=u32::MAX)
}

/// `ToRadio.want_config_id` frame payload.
pub fn config_request(nonce: u32) -> Bytes {
    crate::proto::to_bytes(&ToRadio {
        payload_variant: Some(to_radio::PayloadVariant::WantConfigId(nonce)),
    })
}

/// `ToRadio.heartbeat` frame payload.
pub fn heartbeat_frame() -> Bytes {
    crate::proto::to_bytes(&ToRadio {
        payload_variant: Some(to_radio::PayloadVariant::Heartbeat(Heartbeat {})),
    })
}

/// `ToRadio.disconnect` frame payload.
pub fn disconnect_frame() -> Bytes {
    crate::proto::to_bytes(&ToRadio {
        payload_variant: Some(to_radio::PayloadVariant::Disconnect(true)),
    })
}

/// Whether `payload` is the config-complete sentinel for `nonce`.
pub fn is_config_complete(payload: &[u8], nonce: u32) -> bool {
    matches!(
        FromRadio::decode(payload),
        Ok(FromRadio {
            payload_variant: Some(from_radio::PayloadVariant::ConfigCompleteId(id)),
            ..
        }) if id == nonce
    )
}

/// Accumulates the configuration dump of one session.
#[derive(Debug, Default)]
pub struct HandshakeState {
    in_progress: bool,
    nonce: Option<u32>,
    snapshot: DeviceSnapshot,
    complete: bool,
}

impl HandshakeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new session, discarding anything accumulated so far.
    pub fn begin(&mut self, nonce: Option<u32>) {
        debug!(?nonce, "Config handshake started");
        *self = Self {
            in_progress: true,
            nonce,
            ..Self::default()
        };
    }

    pub fn nonce(&self) -> Option<u32> {
        self.nonce
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// A dump is being collected: begun and not yet finished.
    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    /// Fold one message of the config dump into the snapshot. Returns `true` when
    /// the message was part of the dump (and must not be treated as live traffic).
    /// Outside a session nothing is a dump item.
    pub fn record(&mut self, msg: &FromRadio) -> bool {
        use from_radio::PayloadVariant as V;

        if !self.in_progress {
            return false;
        }
        let Some(variant) = &msg.payload_variant else {
            return false;
        };
        let snap = &mut self.snapshot;
        match variant {
            V::MyInfo(info) => snap.my_info = Some(info.clone()),
            V::NodeInfo(node) => {
                snap.nodes.insert(node.num, node.clone());
            }
            V::Channel(channel) => {
                snap.channels.retain(|c| c.index != channel.index);
                snap.channels.push(channel.clone());
                snap.channels.sort_by_key(|c| c.index);
            }
            V::Config(section) => snap.configs.push(section.clone()),
            V::ModuleConfig(section) => snap.module_configs.push(section.clone()),
            V::Metadata(meta) => snap.metadata = Some(meta.clone()),
            V::ConfigCompleteId(id) => {
                if self.nonce.is_none() {
                    self.nonce = Some(*id);
                }
                if self.nonce == Some(*id) {
                    self.complete = true;
                }
            }
            V::Packet(_)
            | V::LogRecord(_)
            | V::Rebooted(_)
            | V::QueueStatus(_)
            | V::ClientNotification(_) => return false,
        }
        trace!(complete = self.complete, "Recorded config item");
        true
    }

    /// Hand out the finished snapshot. `None` until the matching sentinel arrived.
    pub fn finish(&mut self) -> Option<DeviceSnapshot> {
        if !self.complete {
            return None;
        }
        self.complete = false;
        self.in_progress = false;
        self.nonce = None;
        Some(std::mem::take(&mut self.snapshot))
    }
}
