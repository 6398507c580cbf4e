//! Shared fixtures for the integration tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use meshlink::proto::{
    from_radio, mesh_packet, Channel, ChannelSettings, Data, FromRadio, MeshPacket, MyNodeInfo,
    NodeInfo, PortNum, User,
};
use meshlink::transport::{ConnectionState, Link};
use meshlink::utils::crypto::ChannelKey;
use meshlink::{ProtocolError, Result};
use prost::Message as _;
use tokio::sync::watch;
use tokio::time::Instant;

/// In-memory link that records every payload handed to it.
pub struct FakeLink {
    state_tx: watch::Sender<ConnectionState>,
    sent: Mutex<Vec<(Instant, Bytes)>>,
    failing: AtomicBool,
}

impl FakeLink {
    pub fn new(state: ConnectionState) -> Self {
        let (state_tx, _) = watch::channel(state);
        Self {
            state_tx,
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn streaming() -> Self {
        Self::new(ConnectionState::Streaming)
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Make every send fail with a transport error while staying in the current state.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
    }

    pub fn sent_at(&self) -> Vec<(Instant, Bytes)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Link for FakeLink {
    fn send(&self, payload: Bytes) -> Result<()> {
        if !self.state().is_streaming() {
            return Err(ProtocolError::NotConnected);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProtocolError::Transport("socket write failed".into()));
        }
        self.sent.lock().unwrap().push((Instant::now(), payload));
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}

pub fn envelope(variant: from_radio::PayloadVariant) -> Vec<u8> {
    FromRadio {
        id: 0,
        payload_variant: Some(variant),
    }
    .encode_to_vec()
}

pub fn my_info(num: u32) -> Vec<u8> {
    envelope(from_radio::PayloadVariant::MyInfo(MyNodeInfo {
        my_node_num: num,
        ..MyNodeInfo::default()
    }))
}

pub fn node_info(num: u32, long_name: &str, last_heard: u32) -> Vec<u8> {
    envelope(from_radio::PayloadVariant::NodeInfo(NodeInfo {
        num,
        user: Some(User {
            id: format!("!{num:08x}"),
            long_name: long_name.to_string(),
            short_name: long_name.chars().take(4).collect(),
            ..User::default()
        }),
        last_heard,
        ..NodeInfo::default()
    }))
}

pub fn channel(index: i32, name: &str, psk: &[u8], role: i32) -> Vec<u8> {
    envelope(from_radio::PayloadVariant::Channel(Channel {
        index,
        settings: Some(ChannelSettings {
            psk: psk.to_vec(),
            name: name.to_string(),
            ..ChannelSettings::default()
        }),
        role,
    }))
}

pub fn config_complete(nonce: u32) -> Vec<u8> {
    envelope(from_radio::PayloadVariant::ConfigCompleteId(nonce))
}

pub fn data(port: PortNum, payload: Vec<u8>) -> Data {
    Data {
        portnum: port as i32,
        payload,
        ..Data::default()
    }
}

pub fn decoded_packet(from: u32, to: u32, id: u32, data: Data) -> Vec<u8> {
    envelope(from_radio::PayloadVariant::Packet(MeshPacket {
        from,
        to,
        id,
        rx_time: 1_700_000_000,
        payload_variant: Some(mesh_packet::PayloadVariant::Decoded(data)),
        ..MeshPacket::default()
    }))
}

/// An off-air packet encrypted under `key`, addressed by `key`'s channel hash.
pub fn encrypted_packet(key: &ChannelKey, from: u32, id: u32, data: &Data) -> Vec<u8> {
    encrypted_packet_on(key, u32::from(key.hash()), from, id, data)
}

/// An off-air packet encrypted under `key` with an explicit channel field.
pub fn encrypted_packet_on(
    key: &ChannelKey,
    channel: u32,
    from: u32,
    id: u32,
    data: &Data,
) -> Vec<u8> {
    let mut ciphertext = data.encode_to_vec();
    meshlink::utils::crypto::apply_keystream(&key.key, id, from, &mut ciphertext).unwrap();
    envelope(from_radio::PayloadVariant::Packet(MeshPacket {
        from,
        to: meshlink::proto::BROADCAST_ADDR,
        channel,
        id,
        rx_time: 1_700_000_000,
        payload_variant: Some(mesh_packet::PayloadVariant::Encrypted(ciphertext)),
        ..MeshPacket::default()
    }))
}
