//! # meshlink
//!
//! Host-side companion for a mesh radio reachable over TCP.
//!
//! ## Layers
//! - **core**: stream framing (`0x94 0xC3` + big-endian length) and its Tokio codec
//! - **proto**: protobuf envelopes exchanged with the device
//! - **transport**: [`DeviceLink`], the resilient TCP session with config handshake,
//!   heartbeat and reconnect backoff
//! - **protocol**: [`ProtocolDispatcher`], which decodes envelopes, decrypts channel
//!   traffic and emits [`DomainEvent`]s
//! - **service**: [`TracerouteScheduler`] and [`VirtualNodeProxy`]
//! - **storage**: the persistence seam and an in-memory implementation
//! - **utils**: channel cipher, logging, metrics and task helpers
//!
//! ## Wiring
//! ```no_run
//! use std::sync::Arc;
//! use meshlink::{DeviceLink, MemoryStorage, MeshLinkConfig, ProtocolDispatcher};
//!
//! # fn main() -> meshlink::Result<()> {
//! let config = MeshLinkConfig::default();
//! let device = DeviceLink::new(config.device.clone());
//! let dispatcher = ProtocolDispatcher::new(Arc::new(device.clone()), Arc::new(MemoryStorage::new()));
//! dispatcher.attach(&device)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod proto;
pub mod protocol;
pub mod service;
pub mod storage;
pub mod transport;
pub mod utils;

pub use config::MeshLinkConfig;
pub use core::FrameCodec;
pub use error::{ProtocolError, Result};
pub use protocol::{DeviceSnapshot, DomainEvent, ProtocolDispatcher, SendOptions};
pub use service::{TracerouteScheduler, VirtualNodeProxy};
pub use storage::{MemoryStorage, Storage};
pub use transport::{ConnectionState, DeviceLink, Link};
