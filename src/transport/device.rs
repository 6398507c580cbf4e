//! # Device Link
//!
//! Owns the single TCP session to the physical radio and runs its connection state
//! machine:
//!
//! ```text
//! connect() -> Connecting --tcp ok--> AwaitingConfig --sentinel--> Streaming
//!                  |                        |                          |
//!                  +------ failure ---------+------ error/timeout -----+
//!                                           v
//!                                     ReconnectWait --backoff--> Connecting
//! ```
//!
//! Every unexpected disconnect is retried indefinitely with capped exponential
//! backoff. Failures are only observable as state changes; nothing is escalated.
//!
//! Frames are delivered to `on_frame` handlers in arrival order from the session
//! task itself, before the handshake check runs, so subscribers always see the
//! config-complete sentinel before the link reports `Streaming`.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::DeviceConfig;
use crate::core::codec::FrameCodec;
use crate::core::frame::MAX_PAYLOAD_LEN;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake;
use crate::transport::backoff::Backoff;
use crate::transport::link::{ConnectionState, Link};
use crate::utils::metrics::global_metrics;
use crate::utils::task::ScheduledTask;
use crate::utils::timeout::{with_timeout_error, SHUTDOWN_TIMEOUT};

type FrameHandler = dyn Fn(&Bytes) + Send + Sync + 'static;
type StateHandler = dyn Fn(ConnectionState) + Send + Sync + 'static;

struct Shared {
    config: DeviceConfig,
    state_tx: watch::Sender<ConnectionState>,
    frame_handlers: RwLock<Vec<Box<FrameHandler>>>,
    state_handlers: RwLock<Vec<Box<StateHandler>>>,
    /// Present only while streaming
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let prev = self.state_tx.send_replace(next);
        if prev == next {
            return;
        }
        if !prev.can_transition_to(next) {
            warn!(from = %prev, to = %next, "Unexpected link state transition");
        }
        info!(from = %prev, to = %next, "Device link state changed");

        if let Ok(handlers) = self.state_handlers.read() {
            for handler in handlers.iter() {
                handler(next);
            }
        }
    }

    fn deliver(&self, payload: &Bytes) {
        if let Ok(handlers) = self.frame_handlers.read() {
            for handler in handlers.iter() {
                handler(payload);
            }
        }
    }

    fn set_outbound(&self, tx: Option<mpsc::UnboundedSender<Bytes>>) {
        if let Ok(mut slot) = self.outbound.lock() {
            *slot = tx;
        }
    }
}

/// Handle to the physical device connection. Cheap to clone; clones share one
/// session.
#[derive(Clone)]
pub struct DeviceLink {
    shared: Arc<Shared>,
    task: Arc<Mutex<Option<ScheduledTask>>>,
}

impl DeviceLink {
    pub fn new(config: DeviceConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                state_tx,
                frame_handlers: RwLock::new(Vec::new()),
                state_handlers: RwLock::new(Vec::new()),
                outbound: Mutex::new(None),
            }),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    /// Start the connection loop. Calling it while a loop is already running is a
    /// no-op. Must be called from within a tokio runtime.
    pub fn connect(&self) -> Result<()> {
        let mut task = self
            .task
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?;

        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Device link already running");
            return Ok(());
        }

        let shared = self.shared.clone();
        *task = Some(ScheduledTask::spawn("device-link", move |cancel| {
            run(shared, cancel)
        }));
        Ok(())
    }

    /// Stop retrying, close the session and settle in `Disconnected`.
    pub async fn disconnect(&self) {
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            task.shutdown(SHUTDOWN_TIMEOUT).await;
        }
        self.shared.set_outbound(None);
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Register a handler for every decoded payload, in arrival order.
    pub fn on_frame<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        self.shared
            .frame_handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_HANDLER_WRITE_LOCK.into()))?
            .push(Box::new(handler));
        Ok(())
    }

    /// Register a handler for every state transition.
    pub fn on_state_change<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.shared
            .state_handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_HANDLER_WRITE_LOCK.into()))?
            .push(Box::new(handler));
        Ok(())
    }
}

impl Link for DeviceLink {
    fn send(&self, payload: Bytes) -> Result<()> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::OversizedFrame(payload.len()));
        }
        if !self.state().is_streaming() {
            return Err(ProtocolError::NotConnected);
        }
        let slot = self
            .shared
            .outbound
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?;
        match slot.as_ref() {
            Some(tx) => tx.send(payload).map_err(|_| ProtocolError::NotConnected),
            None => Err(ProtocolError::NotConnected),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }
}

#[instrument(skip_all, fields(device = %shared.config.address()))]
async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut backoff = Backoff::from_config(&shared.config);
    let address = shared.config.address();

    loop {
        shared.set_state(ConnectionState::Connecting);

        let connect = with_timeout_error(
            async { TcpStream::connect(&address).await.map_err(ProtocolError::from) },
            shared.config.connect_timeout,
        );
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            res = connect => res,
        };

        match connected {
            Ok(stream) => {
                global_metrics().session_established();
                match run_session(&shared, stream, &cancel, &mut backoff).await {
                    Ok(()) => break,
                    Err(e) if e.is_transport() => warn!(error = %e, "Device session ended"),
                    Err(e) => error!(error = %e, "Device session failed"),
                }
            }
            Err(e) => warn!(error = %e, "Device connect failed"),
        }

        shared.set_outbound(None);
        if cancel.is_cancelled() {
            break;
        }

        shared.set_state(ConnectionState::ReconnectWait);
        let delay = backoff.next_delay();
        global_metrics().reconnect_scheduled();
        info!(
            delay_ms = delay.as_millis() as u64,
            attempt = backoff.attempt(),
            "Reconnect scheduled"
        );

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_outbound(None);
    debug!("Device link loop stopped");
}

/// Drive one TCP session. `Ok(())` means the session was cancelled; any error
/// sends the caller into `ReconnectWait`.
async fn run_session(
    shared: &Shared,
    stream: TcpStream,
    cancel: &CancellationToken,
    backoff: &mut Backoff,
) -> Result<()> {
    let config = &shared.config;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    let mut framed = Framed::new(stream, FrameCodec::new());

    shared.set_state(ConnectionState::AwaitingConfig);
    global_metrics().handshake_attempt();

    let nonce = handshake::generate_nonce();
    let request = handshake::config_request(nonce);
    let request_len = request.len() as u64;
    framed.send(request).await?;
    global_metrics().frame_sent(request_len);
    debug!(nonce, "Config requested");

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let mut streaming = false;
    let mut deadline = Instant::now() + config.config_timeout;
    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval.max(Duration::from_millis(1)),
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),

            _ = tokio::time::sleep_until(deadline) => {
                return if streaming {
                    Err(ProtocolError::ConnectionTimeout)
                } else {
                    global_metrics().handshake_failed();
                    Err(ProtocolError::HandshakeError(constants::ERR_CONFIG_TIMEOUT.into()))
                };
            }

            frame = framed.next() => match frame {
                Some(Ok(payload)) => {
                    global_metrics().frame_received(payload.len() as u64);
                    if streaming {
                        deadline = Instant::now() + config.liveness_timeout;
                    }

                    shared.deliver(&payload);

                    if !streaming && handshake::is_config_complete(&payload, nonce) {
                        streaming = true;
                        backoff.reset();
                        global_metrics().handshake_success();
                        deadline = Instant::now() + config.liveness_timeout;
                        heartbeat.reset();
                        shared.set_outbound(Some(tx.clone()));
                        shared.set_state(ConnectionState::Streaming);
                    }
                }
                Some(Err(e)) => {
                    if !streaming {
                        global_metrics().handshake_failed();
                    }
                    return Err(e);
                }
                None => {
                    if !streaming {
                        global_metrics().handshake_failed();
                    }
                    return Err(ProtocolError::ConnectionClosed);
                }
            },

            Some(payload) = rx.recv() => {
                let len = payload.len() as u64;
                framed.send(payload).await?;
                global_metrics().frame_sent(len);
            }

            _ = heartbeat.tick(), if streaming => {
                let beat = handshake::heartbeat_frame();
                let len = beat.len() as u64;
                framed.send(beat).await?;
                global_metrics().frame_sent(len);
                debug!("Heartbeat sent");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_requires_streaming() {
        let link = DeviceLink::new(DeviceConfig::default());
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(matches!(
            link.send(Bytes::from_static(b"x")),
            Err(ProtocolError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_send_rejects_oversized() {
        let link = DeviceLink::new(DeviceConfig::default());
        let big = Bytes::from(vec![0u8; MAX_PAYLOAD_LEN + 1]);
        assert!(matches!(
            link.send(big),
            Err(ProtocolError::OversizedFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_state_handlers_fire_on_disconnect() {
        let link = DeviceLink::new(DeviceConfig {
            host: "127.0.0.1".into(),
            port: 1,
            backoff_base: Duration::from_millis(50),
            ..DeviceConfig::default()
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        link.on_state_change(move |s| sink.lock().unwrap().push(s))
            .unwrap();

        link.connect().unwrap();
        link.connect().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        link.disconnect().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&ConnectionState::Connecting));
        assert_eq!(seen.last(), Some(&ConnectionState::Disconnected));
        assert!(!seen.contains(&ConnectionState::Streaming));
    }
}
