#![no_main]

use std::sync::Arc;

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use meshlink::service::proxy::{classify, Denylist};
use meshlink::transport::{ConnectionState, Link};
use meshlink::{MemoryStorage, ProtocolDispatcher, Result};
use tokio::sync::watch;

/// A device that is always streaming and swallows every write.
struct NullLink(watch::Sender<ConnectionState>);

impl Link for NullLink {
    fn send(&self, _payload: Bytes) -> Result<()> {
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.0.borrow()
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.0.subscribe()
    }
}

fuzz_target!(|data: &[u8]| {
    // Device side: arbitrary FromRadio bytes, during and after a config dump
    let (tx, _) = watch::channel(ConnectionState::Streaming);
    let dispatcher = ProtocolDispatcher::new(Arc::new(NullLink(tx)), Arc::new(MemoryStorage::new()));
    dispatcher.handle_state(ConnectionState::AwaitingConfig);
    dispatcher.handle_frame(data);
    dispatcher.handle_state(ConnectionState::Streaming);
    dispatcher.handle_frame(data);

    // Client side: arbitrary ToRadio bytes through the proxy filter
    let _ = classify(data, &Denylist::new(["ADMIN_APP", "DISCONNECT"]));
});
