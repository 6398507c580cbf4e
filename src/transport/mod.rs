//! # Transport Layer
//!
//! The TCP link to the physical radio.
//!
//! - [`link`]: the `Link` trait and `ConnectionState`, the seam every consumer of
//!   the device depends on
//! - [`device`]: `DeviceLink`, the production link with handshake, heartbeat and
//!   reconnect loop
//! - [`backoff`]: reconnect delay policy

pub mod backoff;
pub mod device;
pub mod link;

pub use device::DeviceLink;
pub use link::{ConnectionState, Link};
