//! # Channel Cryptography
//!
//! AES-CTR transform for mesh payloads carried on shared channels.
//!
//! ## Nonce Construction
//! ```text
//! Bytes 0-7:   packet_id (u64, little-endian)
//! Bytes 8-11:  sender node number (u32, little-endian)
//! Bytes 12-15: block counter, starting at 0 (big-endian increment over the block)
//! ```
//!
//! The key length selects the cipher: 16 bytes for AES-128-CTR, 32 bytes for
//! AES-256-CTR. CTR mode never reports a wrong key; decrypting with the wrong key
//! yields garbage that fails protobuf decoding one layer up.
//!
//! ## PSK Shorthand
//! Channel settings may carry a 1-byte PSK naming one of the well-known default
//! keys: `0` disables encryption, `1` is the default key, `2..=10` the default key
//! with its last byte incremented by `index - 1`.

use std::collections::HashMap;
use std::fmt;

use aes::{Aes128, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ProtocolError, Result};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Well-known key behind the default channel (PSK shorthand `1`)
pub const DEFAULT_PSK: [u8; 16] = [
    0xd4, 0xf1, 0xbb, 0x3a, 0x20, 0x29, 0x07, 0x59, 0xf0, 0xbc, 0xff, 0xab, 0xcf, 0x4e, 0x69,
    0x01,
];

/// Role a channel plays on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelRole {
    Disabled,
    Primary,
    Secondary,
}

impl ChannelRole {
    pub fn from_proto(role: i32) -> Self {
        match role {
            1 => ChannelRole::Primary,
            2 => ChannelRole::Secondary,
            _ => ChannelRole::Disabled,
        }
    }
}

/// Key material for one channel slot.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct ChannelKey {
    #[zeroize(skip)]
    pub index: u32,
    /// Expanded key: empty (no encryption), 16 or 32 bytes
    pub key: Vec<u8>,
    #[zeroize(skip)]
    pub role: ChannelRole,
    #[zeroize(skip)]
    pub name: String,
}

impl ChannelKey {
    /// Build a key from a channel's PSK as the device reports it.
    pub fn from_psk(index: u32, psk: &[u8], role: ChannelRole, name: &str) -> Result<Self> {
        Ok(Self {
            index,
            key: expand_psk(psk)?,
            role,
            name: name.to_string(),
        })
    }

    /// Whether packets on this channel are sent in the clear.
    pub fn is_plaintext(&self) -> bool {
        self.key.is_empty()
    }

    /// 8-bit channel hash carried in off-air packet headers.
    pub fn hash(&self) -> u8 {
        xor_hash(self.name.as_bytes()) ^ xor_hash(&self.key)
    }
}

impl fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelKey")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("key_len", &self.key.len())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

fn xor_hash(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Expand a channel PSK into raw key bytes.
pub fn expand_psk(psk: &[u8]) -> Result<Vec<u8>> {
    match psk.len() {
        0 => Ok(Vec::new()),
        1 => match psk[0] {
            0 => Ok(Vec::new()),
            index @ 1..=10 => {
                let mut key = DEFAULT_PSK.to_vec();
                key[15] = key[15].wrapping_add(index - 1);
                Ok(key)
            }
            _ => Err(ProtocolError::InvalidKeyLength(1)),
        },
        16 | 32 => Ok(psk.to_vec()),
        n => Err(ProtocolError::InvalidKeyLength(n)),
    }
}

/// Build the 16-byte initial counter block.
pub fn build_nonce(packet_id: u32, sender: u32) -> [u8; 16] {
    let mut nonce = [0u8; 16];
    nonce[..8].copy_from_slice(&u64::from(packet_id).to_le_bytes());
    nonce[8..12].copy_from_slice(&sender.to_le_bytes());
    nonce
}

/// Apply the CTR keystream in place. Encryption and decryption are the same call.
pub fn apply_keystream(key: &[u8], packet_id: u32, sender: u32, data: &mut [u8]) -> Result<()> {
    let nonce = build_nonce(packet_id, sender);
    match key.len() {
        16 => Aes128Ctr::new_from_slices(key, &nonce)
            .map_err(|_| ProtocolError::InvalidKeyLength(key.len()))?
            .apply_keystream(data),
        32 => Aes256Ctr::new_from_slices(key, &nonce)
            .map_err(|_| ProtocolError::InvalidKeyLength(key.len()))?
            .apply_keystream(data),
        n => return Err(ProtocolError::InvalidKeyLength(n)),
    }
    Ok(())
}

/// The active set of channel keys, keyed by channel index.
#[derive(Debug, Default, Clone)]
pub struct ChannelKeyring {
    keys: HashMap<u32, ChannelKey>,
}

impl ChannelKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_keys(keys: impl IntoIterator<Item = ChannelKey>) -> Self {
        let mut ring = Self::new();
        for key in keys {
            ring.insert(key);
        }
        ring
    }

    pub fn insert(&mut self, key: ChannelKey) {
        self.keys.insert(key.index, key);
    }

    /// Swap in a whole new key set; nothing from the previous set survives.
    pub fn replace_all(&mut self, keys: impl IntoIterator<Item = ChannelKey>) {
        self.keys.clear();
        for key in keys {
            self.insert(key);
        }
    }

    pub fn get(&self, index: u32) -> Option<&ChannelKey> {
        self.keys.get(&index)
    }

    /// Resolve a packet's channel field: by index first, then by channel hash.
    pub fn resolve(&self, channel: u32) -> Option<&ChannelKey> {
        self.candidates(channel).next()
    }

    /// Every key a packet's channel field may refer to: the key at that index,
    /// then each other key whose hash equals the field.
    pub fn candidates(&self, channel: u32) -> impl Iterator<Item = &ChannelKey> + '_ {
        let hash = u8::try_from(channel).ok();
        self.keys.get(&channel).into_iter().chain(
            self.keys
                .values()
                .filter(move |k| k.index != channel && Some(k.hash()) == hash),
        )
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ChannelKey> {
        self.keys.values()
    }
}

/// Channel payload cipher bound to a keyring.
#[derive(Debug, Default, Clone)]
pub struct ChannelCipher {
    keyring: ChannelKeyring,
}

impl ChannelCipher {
    pub fn new(keyring: ChannelKeyring) -> Self {
        Self { keyring }
    }

    pub fn keyring(&self) -> &ChannelKeyring {
        &self.keyring
    }

    pub fn keyring_mut(&mut self) -> &mut ChannelKeyring {
        &mut self.keyring
    }

    /// Decrypt a payload received on `channel`.
    ///
    /// Fails only with [`ProtocolError::UnknownChannel`] (no key for the channel) or
    /// an invalid key length; a wrong key produces garbage, not an error.
    pub fn decrypt(
        &self,
        channel: u32,
        packet_id: u32,
        sender: u32,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        let key = self
            .keyring
            .resolve(channel)
            .ok_or(ProtocolError::UnknownChannel(channel))?;
        let mut out = ciphertext.to_vec();
        if !key.is_plaintext() {
            apply_keystream(&key.key, packet_id, sender, &mut out)?;
        }
        Ok(out)
    }

    /// Decrypt a payload under every candidate key for `channel`, in
    /// [`ChannelKeyring::candidates`] order.
    pub fn decrypt_candidates(
        &self,
        channel: u32,
        packet_id: u32,
        sender: u32,
        ciphertext: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        for key in self.keyring.candidates(channel) {
            let mut plain = ciphertext.to_vec();
            if !key.is_plaintext() {
                apply_keystream(&key.key, packet_id, sender, &mut plain)?;
            }
            out.push(plain);
        }
        if out.is_empty() {
            return Err(ProtocolError::UnknownChannel(channel));
        }
        Ok(out)
    }

    /// Encrypt a payload for `channel`, mirroring [`ChannelCipher::decrypt`].
    pub fn encrypt(
        &self,
        channel: u32,
        packet_id: u32,
        sender: u32,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let key = self
            .keyring
            .get(channel)
            .ok_or(ProtocolError::UnknownChannel(channel))?;
        let mut out = plaintext.to_vec();
        if !key.is_plaintext() {
            apply_keystream(&key.key, packet_id, sender, &mut out)?;
        }
        Ok(out)
    }
}
