//! # Virtual Node Proxy
//!
//! A TCP listener that impersonates the radio toward any number of client
//! applications while sharing the one physical [`Link`].
//!
//! Per client:
//! - frames are reassembled by the client's own [`FrameCodec`];
//! - `want_config_id` is answered locally by replaying the cached
//!   [`DeviceSnapshot`], ending with the client's own sentinel; if no snapshot
//!   exists yet the reply waits for the first one;
//! - heartbeats are absorbed and `disconnect` ends the client session;
//! - every other frame is checked against the [`Denylist`] and, if permitted,
//!   joins the shared [`OutboundQueue`];
//! - live device traffic is relayed once the client has received its replay.
//!
//! The outbound queue is the only writer toward the device on behalf of clients.
//! It hands frames to the link one at a time with a fixed minimum gap.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use prost::Message as _;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::ProxyConfig;
use crate::core::codec::FrameCodec;
use crate::error::{constants, ProtocolError, Result};
use crate::proto::{mesh_packet, to_radio, Data, MeshPacket, PortNum, ToRadio};
use crate::protocol::dispatcher::ProtocolDispatcher;
use crate::protocol::snapshot::DeviceSnapshot;
use crate::transport::Link;
use crate::utils::metrics::global_metrics;
use crate::utils::task::ScheduledTask;
use crate::utils::timeout::SHUTDOWN_TIMEOUT;

/// Message-type identifier of a client frame, as matched by the denylist.
///
/// Mesh packets are identified by their port name (`TEXT_MESSAGE_APP`,
/// `ADMIN_APP`, ...); packets the client encrypted itself by `ENCRYPTED_PACKET`;
/// other envelope variants by their field name in upper case.
pub fn message_type(msg: &ToRadio) -> &'static str {
    use to_radio::PayloadVariant as V;
    match &msg.payload_variant {
        Some(V::Packet(packet)) => match &packet.payload_variant {
            Some(mesh_packet::PayloadVariant::Decoded(data)) => PortNum::try_from(data.portnum)
                .map(|p| p.as_str_name())
                .unwrap_or("UNKNOWN_APP"),
            Some(mesh_packet::PayloadVariant::Encrypted(_)) => "ENCRYPTED_PACKET",
            None => "EMPTY_PACKET",
        },
        Some(V::WantConfigId(_)) => "WANT_CONFIG_ID",
        Some(V::Disconnect(_)) => "DISCONNECT",
        Some(V::XmodemPacket(_)) => "XMODEM_PACKET",
        Some(V::MqttClientProxyMessage(_)) => "MQTT_CLIENT_PROXY_MESSAGE",
        Some(V::Heartbeat(_)) => "HEARTBEAT",
        None => "EMPTY",
    }
}

/// Message types clients may not send to the shared device.
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    entries: HashSet<String>,
}

impl Denylist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|e| e.as_ref().trim().to_uppercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(&config.denylist)
    }

    pub fn is_denied(&self, message_type: &str) -> bool {
        self.entries.contains(message_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What the proxy does with one client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Answer from the snapshot with this nonce
    Replay(u32),
    /// Absorbed locally
    Ignore,
    /// Client asked to end the session
    Close,
    /// Permitted; queue toward the device
    Forward,
    /// Denylisted; dropped silently
    Reject(&'static str),
    /// Not a valid envelope
    Malformed,
}

/// Decide what to do with a client frame. Pure; no I/O.
///
/// Client-encrypted packets are never opened here; see [`classify_with`].
pub fn classify(payload: &[u8], denylist: &Denylist) -> ClientAction {
    classify_with(payload, denylist, |_, _| None)
}

/// [`classify`], with `open` deciphering packets the client encrypted itself.
///
/// An opened packet is judged by its port name. With a non-empty denylist, a
/// packet that cannot be opened is rejected as `ENCRYPTED_PACKET`.
pub fn classify_with<F>(payload: &[u8], denylist: &Denylist, open: F) -> ClientAction
where
    F: Fn(&MeshPacket, &[u8]) -> Option<Data>,
{
    let Ok(msg) = ToRadio::decode(payload) else {
        return ClientAction::Malformed;
    };
    match &msg.payload_variant {
        Some(to_radio::PayloadVariant::WantConfigId(nonce)) => ClientAction::Replay(*nonce),
        Some(to_radio::PayloadVariant::Heartbeat(_)) => ClientAction::Ignore,
        Some(to_radio::PayloadVariant::Disconnect(_)) => ClientAction::Close,
        None => ClientAction::Malformed,
        Some(to_radio::PayloadVariant::Packet(packet)) if !denylist.is_empty() => {
            let kind = match &packet.payload_variant {
                Some(mesh_packet::PayloadVariant::Encrypted(ciphertext)) => {
                    match open(packet, ciphertext) {
                        Some(data) => PortNum::try_from(data.portnum)
                            .map(|p| p.as_str_name())
                            .unwrap_or("UNKNOWN_APP"),
                        None => return ClientAction::Reject("ENCRYPTED_PACKET"),
                    }
                }
                _ => message_type(&msg),
            };
            if denylist.is_denied(kind) {
                ClientAction::Reject(kind)
            } else {
                ClientAction::Forward
            }
        }
        Some(_) => {
            let kind = message_type(&msg);
            if denylist.is_denied(kind) {
                ClientAction::Reject(kind)
            } else {
                ClientAction::Forward
            }
        }
    }
}

#[derive(Debug)]
struct QueuedFrame {
    client: u64,
    payload: Bytes,
}

/// The single paced FIFO of client frames toward the device.
#[derive(Debug)]
pub struct OutboundQueue {
    frames: Mutex<VecDeque<QueuedFrame>>,
    notify: Notify,
    limit: usize,
    gap: Duration,
}

impl OutboundQueue {
    pub fn new(limit: usize, gap: Duration) -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            limit,
            gap,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedFrame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a frame from `client`. Over the limit the new frame is dropped.
    pub fn push(&self, client: u64, payload: Bytes) -> Result<()> {
        {
            let mut frames = self.lock();
            if frames.len() >= self.limit {
                return Err(ProtocolError::SendRejected(constants::ERR_QUEUE_FULL.into()));
            }
            frames.push_back(QueuedFrame { client, payload });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Forget everything still queued for `client`. Returns how many frames went.
    pub fn drop_client(&self, client: u64) -> usize {
        let mut frames = self.lock();
        let before = frames.len();
        frames.retain(|f| f.client != client);
        before - frames.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn pop(&self) -> Option<QueuedFrame> {
        self.lock().pop_front()
    }

    /// Drain the queue into `link`, at most one frame per `gap`, until cancelled.
    pub async fn run_pacer(self: Arc<Self>, link: Arc<dyn Link>, cancel: CancellationToken) {
        let mut last_send: Option<Instant> = None;
        loop {
            while self.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = self.notify.notified() => {}
                }
            }

            if let Some(last) = last_send {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep_until(last + self.gap) => {}
                }
            }

            // The owning client may have gone while we waited
            let Some(frame) = self.pop() else { continue };

            match link.send(frame.payload) {
                Ok(()) => {
                    global_metrics().proxy_frame_relayed();
                    trace!(client = frame.client, "Client frame relayed to device");
                }
                Err(e) => debug!(client = frame.client, error = %e, "Client frame not delivered"),
            }
            last_send = Some(Instant::now());
        }
    }
}

struct ProxyShared {
    dispatcher: ProtocolDispatcher,
    denylist: Denylist,
    queue: Arc<OutboundQueue>,
    max_clients: usize,
    clients: AtomicUsize,
    next_client_id: AtomicU64,
}

/// Decrements the client count and purges the client's queued frames on drop.
struct ClientGuard {
    shared: Arc<ProxyShared>,
    id: u64,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.shared.clients.fetch_sub(1, Ordering::SeqCst);
        let dropped = self.shared.queue.drop_client(self.id);
        global_metrics().proxy_client_disconnected();
        info!(client = self.id, dropped_frames = dropped, "Proxy client disconnected");
    }
}

pub struct VirtualNodeProxy {
    listener: TcpListener,
    shared: Arc<ProxyShared>,
}

impl VirtualNodeProxy {
    /// Bind the listener. Fails if the address is unavailable.
    pub async fn bind(config: &ProxyConfig, dispatcher: ProtocolDispatcher) -> Result<Self> {
        let address = config.listen_address();
        let listener = TcpListener::bind(&address).await?;
        info!(address = %address, denylist = ?config.denylist, "Virtual node listening");

        Ok(Self {
            listener,
            shared: Arc::new(ProxyShared {
                dispatcher,
                denylist: Denylist::from_config(config),
                queue: Arc::new(OutboundQueue::new(
                    config.outbound_queue_limit,
                    config.send_gap,
                )),
                max_clients: config.max_clients,
                clients: AtomicUsize::new(0),
                next_client_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn queue(&self) -> Arc<OutboundQueue> {
        self.shared.queue.clone()
    }

    /// Run the accept loop and the outbound pacer as one scheduled task.
    pub fn spawn(self) -> ScheduledTask {
        ScheduledTask::spawn("virtual-node-proxy", move |cancel| self.run(cancel))
    }

    pub async fn run(self, cancel: CancellationToken) {
        let pacer = {
            let queue = self.shared.queue.clone();
            let link = self.shared.dispatcher.link();
            ScheduledTask::spawn_with_token("proxy-pacer", cancel.child_token(), move |c| {
                queue.run_pacer(link, c)
            })
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer, &cancel),
                    Err(e) => error!(error = %e, "Error accepting proxy client"),
                },
            }
        }

        info!("Virtual node shutting down");
        pacer.shutdown(SHUTDOWN_TIMEOUT).await;
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr, cancel: &CancellationToken) {
        let active = self.shared.clients.fetch_add(1, Ordering::SeqCst);
        if active >= self.shared.max_clients {
            self.shared.clients.fetch_sub(1, Ordering::SeqCst);
            warn!(peer = %peer, max = self.shared.max_clients, "Proxy client limit reached, refusing");
            return;
        }

        let id = self.shared.next_client_id.fetch_add(1, Ordering::Relaxed);
        global_metrics().proxy_client_connected();
        info!(client = id, peer = %peer, "Proxy client connected");

        let guard = ClientGuard {
            shared: self.shared.clone(),
            id,
        };
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            if let Err(e) = serve_client(guard, stream, peer, cancel).await {
                debug!(client = id, error = %e, "Proxy client session ended with error");
            }
        });
    }
}

async fn replay(
    framed: &mut Framed<TcpStream, FrameCodec>,
    snapshot: &DeviceSnapshot,
    nonce: u32,
) -> Result<()> {
    let frames = snapshot.replay_frames(nonce);
    let count = frames.len();
    for frame in frames {
        framed.feed(frame).await?;
    }
    framed.flush().await?;
    debug!(frames = count, nonce, "Snapshot replayed to client");
    Ok(())
}

#[instrument(skip_all, fields(client = guard.id, peer = %peer))]
async fn serve_client(
    guard: ClientGuard,
    stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
) -> Result<()> {
    let shared = guard.shared.clone();
    let id = guard.id;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    let mut framed = Framed::new(stream, FrameCodec::new());
    let mut snapshots = shared.dispatcher.subscribe_snapshot();
    let mut radio = BroadcastStream::new(shared.dispatcher.subscribe_radio());
    let mut pending_nonce: Option<u32> = None;
    let mut configured = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = framed.next() => match frame {
                Some(Ok(payload)) => match classify_with(&payload, &shared.denylist, |p, ct| {
                    shared.dispatcher.open_packet(p, ct)
                }) {
                    ClientAction::Replay(nonce) => {
                        let current = snapshots.borrow_and_update().clone();
                        match current {
                            Some(snapshot) => {
                                replay(&mut framed, &snapshot, nonce).await?;
                                configured = true;
                                pending_nonce = None;
                            }
                            None => {
                                debug!(nonce, "No snapshot yet, replay deferred");
                                pending_nonce = Some(nonce);
                            }
                        }
                    }
                    ClientAction::Ignore => trace!("Client heartbeat"),
                    ClientAction::Close => {
                        debug!("Client requested disconnect");
                        break;
                    }
                    ClientAction::Forward => {
                        if let Err(e) = shared.queue.push(id, payload) {
                            warn!(error = %e, "Dropping client frame");
                        }
                    }
                    ClientAction::Reject(kind) => {
                        global_metrics().proxy_frame_denied();
                        debug!(message_type = kind, "{}", constants::ERR_DENYLISTED);
                    }
                    ClientAction::Malformed => {
                        global_metrics().decode_failure();
                        debug!(len = payload.len(), "Malformed client frame dropped");
                    }
                },
                Some(Err(e)) => return Err(e),
                None => break,
            },

            changed = snapshots.changed(), if pending_nonce.is_some() => {
                if changed.is_err() {
                    break;
                }
                let current = snapshots.borrow_and_update().clone();
                if let (Some(snapshot), Some(nonce)) = (current, pending_nonce) {
                    replay(&mut framed, &snapshot, nonce).await?;
                    configured = true;
                    pending_nonce = None;
                }
            }

            live = radio.next() => match live {
                Some(Ok(frame)) if configured => {
                    framed.send(frame).await?;
                }
                Some(Ok(_)) => {}
                Some(Err(BroadcastStreamRecvError::Lagged(missed))) => {
                    warn!(missed, "Proxy client fell behind live traffic");
                }
                None => break,
            },
        }
    }

    drop(guard);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn packet_frame(port: PortNum) -> Bytes {
        crate::proto::to_bytes(&ToRadio {
            payload_variant: Some(to_radio::PayloadVariant::Packet(MeshPacket {
                payload_variant: Some(mesh_packet::PayloadVariant::Decoded(Data {
                    portnum: port as i32,
                    ..Data::default()
                })),
                ..MeshPacket::default()
            })),
        })
    }

    fn default_denylist() -> Denylist {
        Denylist::from_config(&ProxyConfig::default())
    }

    #[test]
    fn test_denylist_is_case_insensitive_on_config() {
        let list = Denylist::new(["admin_app", " ", "Disconnect"]);
        assert_eq!(list.len(), 2);
        assert!(list.is_denied("ADMIN_APP"));
        assert!(list.is_denied("DISCONNECT"));
        assert!(!list.is_denied("TEXT_MESSAGE_APP"));
    }

    #[test]
    fn test_classify_local_frames() {
        let list = default_denylist();
        assert_eq!(
            classify(&crate::protocol::handshake::config_request(42), &list),
            ClientAction::Replay(42)
        );
        assert_eq!(
            classify(&crate::protocol::handshake::heartbeat_frame(), &list),
            ClientAction::Ignore
        );
        assert_eq!(
            classify(&crate::protocol::handshake::disconnect_frame(), &list),
            ClientAction::Close
        );
        assert_eq!(classify(&[0xFF, 0xFF], &list), ClientAction::Malformed);
    }

    #[test]
    fn test_classify_packets() {
        let list = default_denylist();
        assert_eq!(
            classify(&packet_frame(PortNum::AdminApp), &list),
            ClientAction::Reject("ADMIN_APP")
        );
        assert_eq!(
            classify(&packet_frame(PortNum::RemoteHardwareApp), &list),
            ClientAction::Reject("REMOTE_HARDWARE_APP")
        );
        assert_eq!(
            classify(&packet_frame(PortNum::TextMessageApp), &list),
            ClientAction::Forward
        );
    }

    fn encrypted_frame() -> Bytes {
        crate::proto::to_bytes(&ToRadio {
            payload_variant: Some(to_radio::PayloadVariant::Packet(MeshPacket {
                payload_variant: Some(mesh_packet::PayloadVariant::Encrypted(vec![0x5A; 8])),
                ..MeshPacket::default()
            })),
        })
    }

    fn opens_as(port: PortNum) -> impl Fn(&MeshPacket, &[u8]) -> Option<Data> {
        move |_: &MeshPacket, _: &[u8]| {
            Some(Data {
                portnum: port as i32,
                ..Data::default()
            })
        }
    }

    #[test]
    fn test_classify_client_encrypted_packets() {
        let list = default_denylist();
        let frame = encrypted_frame();
        assert_eq!(
            classify_with(&frame, &list, opens_as(PortNum::AdminApp)),
            ClientAction::Reject("ADMIN_APP")
        );
        assert_eq!(
            classify_with(&frame, &list, opens_as(PortNum::TextMessageApp)),
            ClientAction::Forward
        );
        assert_eq!(
            classify(&frame, &list),
            ClientAction::Reject("ENCRYPTED_PACKET")
        );
        assert_eq!(classify(&frame, &Denylist::default()), ClientAction::Forward);
    }

    #[test]
    fn test_queue_limit_and_client_purge() {
        let queue = OutboundQueue::new(3, Duration::from_millis(1));
        queue.push(1, Bytes::from_static(b"a")).unwrap();
        queue.push(2, Bytes::from_static(b"b")).unwrap();
        queue.push(1, Bytes::from_static(b"c")).unwrap();
        assert!(matches!(
            queue.push(2, Bytes::from_static(b"d")),
            Err(ProtocolError::SendRejected(_))
        ));

        assert_eq!(queue.drop_client(1), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().map(|f| f.client), Some(2));
    }
}
