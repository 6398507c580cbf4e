//! # Services
//!
//! Long-running tasks built on top of the protocol dispatcher:
//! - [`traceroute`]: periodic topology mapping
//! - [`proxy`]: the virtual node that shares the device with client applications

pub mod proxy;
pub mod traceroute;

pub use proxy::{Denylist, OutboundQueue, VirtualNodeProxy};
pub use traceroute::{TracerouteBook, TracerouteScheduler};
