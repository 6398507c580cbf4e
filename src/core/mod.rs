//! # Core Framing Components
//!
//! Low-level frame handling for the device stream protocol.
//!
//! ## Components
//! - **Frame**: wire layout constants and the marker scanner
//! - **Codec**: reassembly buffer and Tokio codec for framing over byte streams
//!
//! ## Wire Format
//! ```text
//! [0x94] [0xC3] [Length(2, big-endian)] [Payload(N)]
//! ```
//!
//! ## Limits
//! - Maximum payload size: 512 bytes
//! - Headers declaring more are dropped so a corrupted stream cannot grow the buffer
//!   unboundedly

pub mod codec;
pub mod frame;

pub use codec::{FrameCodec, Frames};
