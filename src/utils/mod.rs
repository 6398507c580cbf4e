//! # Utility Modules
//!
//! Supporting utilities for channel cryptography, logging, metrics, and timing.
//!
//! ## Components
//! - **Crypto**: AES-CTR channel cipher and keyring
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Task**: Cancellable background task handles
//! - **Time**: Unix-second helpers for node and traceroute bookkeeping
//! - **Timeout**: Timeout defaults and async timeout wrappers
//!
//! ## Security
//! - Channel key material is zeroed on drop (zeroize crate)
//! - Key bytes never appear in `Debug` output

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod task;
pub mod time;
pub mod timeout;

pub use crypto::{ChannelCipher, ChannelKey, ChannelKeyring, ChannelRole};
pub use task::ScheduledTask;
