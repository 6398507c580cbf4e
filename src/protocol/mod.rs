//! # Protocol Layer
//!
//! Everything between raw frame payloads and typed mesh events:
//! - [`handshake`]: per-session config handshake
//! - [`snapshot`]: cached device configuration and its replay
//! - [`event`]: the domain event sum type
//! - [`dispatcher`]: inbound decoding and outbound command building

pub mod dispatcher;
pub mod event;
pub mod handshake;
pub mod snapshot;

pub use dispatcher::{ProtocolDispatcher, SendOptions};
pub use event::DomainEvent;
pub use snapshot::DeviceSnapshot;

#[cfg(test)]
mod tests;
