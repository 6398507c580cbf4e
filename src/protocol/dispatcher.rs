//! # Protocol Dispatcher
//!
//! Turns decoded device payloads into typed [`DomainEvent`]s and outbound commands
//! into envelopes handed to the [`Link`].
//!
//! Inbound, per frame and strictly in arrival order:
//! 1. decode the `FromRadio` envelope;
//! 2. config-dump items feed the session's [`HandshakeState`]; the
//!    config-complete sentinel publishes a fresh [`DeviceSnapshot`] and swaps in
//!    the handshake's channel keys;
//! 3. live items are forwarded raw to the proxy broadcast path, mesh packets are
//!    deciphered if needed, persisted through [`Storage`] and emitted as events.
//!
//! Packets that cannot be read (no key, or garbage after decryption) are stored
//! encrypted and surface as [`DomainEvent::Unreadable`]; they are never errors.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use bytes::Bytes;
use prost::Message as _;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

use crate::error::{constants, ProtocolError, Result};
use crate::proto::{
    from_radio, mesh_packet, routing, telemetry, to_radio, Channel, Data, FromRadio, MeshPacket,
    NodeInfo, PortNum, Position, RouteDiscovery, Routing, Telemetry, ToRadio, User,
};
use crate::protocol::event::DomainEvent;
use crate::protocol::handshake::{self, HandshakeState};
use crate::protocol::snapshot::DeviceSnapshot;
use crate::service::traceroute::TracerouteBook;
use crate::storage::{MessageRecord, NodeRecord, Storage, TelemetryRecord, TracerouteRecord};
use crate::transport::{ConnectionState, DeviceLink, Link};
use crate::utils::crypto::{ChannelCipher, ChannelKey, ChannelKeyring, ChannelRole};
use crate::utils::metrics::global_metrics;
use crate::utils::time::now_secs;

/// Capacity of the event and raw-frame broadcast channels
pub const BROADCAST_CAPACITY: usize = 1024;

/// Hop limit used when the caller does not pick one
pub const DEFAULT_HOP_LIMIT: u32 = 3;

type EventHandler = dyn Fn(&DomainEvent) + Send + Sync + 'static;

/// Per-packet send options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub channel: u32,
    pub want_ack: bool,
    pub want_response: bool,
    pub hop_limit: u32,
    /// Encrypt locally instead of letting the device do it
    pub encrypt: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            channel: 0,
            want_ack: false,
            want_response: false,
            hop_limit: DEFAULT_HOP_LIMIT,
            encrypt: false,
        }
    }
}

struct Inner {
    link: Arc<dyn Link>,
    storage: Arc<dyn Storage>,
    cipher: RwLock<ChannelCipher>,
    handshake: Mutex<HandshakeState>,
    snapshot_tx: watch::Sender<Option<Arc<DeviceSnapshot>>>,
    radio_tx: broadcast::Sender<Bytes>,
    events_tx: broadcast::Sender<DomainEvent>,
    event_handlers: RwLock<Vec<Box<EventHandler>>>,
    my_node: AtomicU32,
    next_packet_id: AtomicU32,
    traceroutes: Arc<TracerouteBook>,
}

/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ProtocolDispatcher {
    inner: Arc<Inner>,
}

impl ProtocolDispatcher {
    /// Build a dispatcher over `link`, seeding the keyring from `storage`.
    pub fn new(link: Arc<dyn Link>, storage: Arc<dyn Storage>) -> Self {
        let keyring = match storage.get_channel_keys() {
            Ok(keys) => ChannelKeyring::from_keys(keys),
            Err(e) => {
                warn!(error = %e, "Failed to load stored channel keys");
                ChannelKeyring::new()
            }
        };
        debug!(keys = keyring.len(), "Channel keyring seeded");

        let (snapshot_tx, _) = watch::channel(None);
        let (radio_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (events_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                link,
                storage,
                cipher: RwLock::new(ChannelCipher::new(keyring)),
                handshake: Mutex::new(HandshakeState::new()),
                snapshot_tx,
                radio_tx,
                events_tx,
                event_handlers: RwLock::new(Vec::new()),
                my_node: AtomicU32::new(0),
                next_packet_id: AtomicU32::new(handshake::generate_nonce()),
                traceroutes: Arc::new(TracerouteBook::new()),
            }),
        }
    }

    /// Subscribe to a device link's frames and state changes.
    pub fn attach(&self, device: &DeviceLink) -> Result<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        device.on_frame(move |payload| {
            if let Some(inner) = weak.upgrade() {
                ProtocolDispatcher { inner }.handle_frame(payload);
            }
        })?;

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        device.on_state_change(move |state| {
            if let Some(inner) = weak.upgrade() {
                ProtocolDispatcher { inner }.handle_state(state);
            }
        })?;
        Ok(())
    }

    pub fn link(&self) -> Arc<dyn Link> {
        self.inner.link.clone()
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.inner.storage.clone()
    }

    pub fn traceroute_book(&self) -> Arc<TracerouteBook> {
        self.inner.traceroutes.clone()
    }

    /// Local node number, once the device reported it.
    pub fn my_node_num(&self) -> Option<u32> {
        match self.inner.my_node.load(Ordering::Relaxed) {
            0 => None,
            num => Some(num),
        }
    }

    /// Latest completed snapshot.
    pub fn snapshot(&self) -> Option<Arc<DeviceSnapshot>> {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<Arc<DeviceSnapshot>>> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Raw live `FromRadio` payloads, for relaying to proxy clients.
    pub fn subscribe_radio(&self) -> broadcast::Receiver<Bytes> {
        self.inner.radio_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DomainEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Register a synchronous domain-event handler.
    pub fn on_domain_event<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        self.inner
            .event_handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_HANDLER_WRITE_LOCK.into()))?
            .push(Box::new(handler));
        Ok(())
    }

    /// Number of channel keys currently active.
    pub fn active_channel_keys(&self) -> usize {
        self.inner.cipher.read().map(|c| c.keyring().len()).unwrap_or(0)
    }

    // ---------------------------------------------------------------------
    // Inbound
    // ---------------------------------------------------------------------

    pub fn handle_state(&self, state: ConnectionState) {
        if state == ConnectionState::AwaitingConfig {
            if let Ok(mut hs) = self.inner.handshake.lock() {
                hs.begin(None);
            }
        }
    }

    /// Process one decoded frame payload from the device.
    pub fn handle_frame(&self, payload: &[u8]) {
        let msg = match FromRadio::decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                global_metrics().decode_failure();
                debug!(error = %e, len = payload.len(), "Dropping undecodable envelope");
                return;
            }
        };

        let config_item = match self.inner.handshake.lock() {
            Ok(mut hs) => hs.record(&msg),
            Err(_) => {
                warn!("{}", constants::ERR_LOCK_POISONED);
                false
            }
        };

        let Some(variant) = msg.payload_variant else {
            trace!("{}", constants::ERR_EMPTY_ENVELOPE);
            return;
        };

        if config_item {
            self.handle_config_item(variant);
            return;
        }

        let _ = self.inner.radio_tx.send(Bytes::copy_from_slice(payload));

        use from_radio::PayloadVariant as V;
        match variant {
            V::Packet(packet) => self.handle_packet(&packet),
            V::ClientNotification(note) => {
                info!(message = %note.message, "Device notification");
                self.emit(DomainEvent::ClientNotification(note));
            }
            V::QueueStatus(status) => {
                trace!(free = status.free, maxlen = status.maxlen, "Device queue status");
            }
            V::LogRecord(record) => {
                debug!(source = %record.source, message = %record.message, "Device log");
            }
            V::Rebooted(_) => info!("Device reported a reboot"),
            // Node db updates the device pushes between dumps
            V::MyInfo(_) | V::NodeInfo(_) | V::Channel(_) => self.handle_config_item(variant),
            V::ConfigCompleteId(id) => debug!(id, "Config-complete outside a session"),
            V::Config(_) | V::ModuleConfig(_) | V::Metadata(_) => {}
        }
    }

    fn handle_config_item(&self, variant: from_radio::PayloadVariant) {
        use from_radio::PayloadVariant as V;
        match variant {
            V::MyInfo(info) => {
                self.inner.my_node.store(info.my_node_num, Ordering::Relaxed);
                info!(node = info.my_node_num, "Local node identified");
                self.emit(DomainEvent::MyInfo(info));
            }
            V::NodeInfo(node) => {
                let record = node_record(&node);
                self.persist("node", self.inner.storage.upsert_node(record.clone()));
                self.emit(DomainEvent::NodeInfo(record));
            }
            V::Channel(channel) => {
                if let Some(key) = channel_key(&channel) {
                    let (index, name, role) = (key.index, key.name.clone(), key.role);
                    self.persist("channel", self.inner.storage.upsert_channel(key));
                    self.emit(DomainEvent::ChannelInfo { index, name, role });
                }
            }
            V::ConfigCompleteId(_) => self.complete_handshake(),
            _ => {}
        }
    }

    fn complete_handshake(&self) {
        let snapshot = match self.inner.handshake.lock() {
            Ok(mut hs) => hs.finish(),
            Err(_) => None,
        };
        let Some(snapshot) = snapshot else {
            debug!("Ignoring config-complete for another session");
            return;
        };

        let keys: Vec<ChannelKey> = snapshot.channels.iter().filter_map(channel_key).collect();
        match self.inner.cipher.write() {
            Ok(mut cipher) => cipher.keyring_mut().replace_all(keys),
            Err(_) => warn!("{}", constants::ERR_KEYRING_LOCK),
        }

        if let Some(num) = snapshot.my_node_num() {
            self.inner.my_node.store(num, Ordering::Relaxed);
        }

        info!(
            nodes = snapshot.nodes.len(),
            channels = snapshot.channels.len(),
            keys = self.active_channel_keys(),
            "Device configuration received"
        );

        let snapshot = Arc::new(snapshot);
        self.inner.snapshot_tx.send_replace(Some(snapshot.clone()));
        self.emit(DomainEvent::ConfigComplete(snapshot));
    }

    fn handle_packet(&self, packet: &MeshPacket) {
        let data = match &packet.payload_variant {
            Some(mesh_packet::PayloadVariant::Decoded(data)) => data.clone(),
            Some(mesh_packet::PayloadVariant::Encrypted(ciphertext)) => {
                match self.open_packet(packet, ciphertext) {
                    Some(data) => data,
                    None => {
                        self.store_unreadable(packet, ciphertext);
                        return;
                    }
                }
            }
            None => return,
        };

        let rx_time = if packet.rx_time != 0 {
            u64::from(packet.rx_time)
        } else {
            now_secs()
        };
        self.note_heard(packet, rx_time);

        let port = PortNum::try_from(data.portnum).unwrap_or(PortNum::UnknownApp);
        trace!(from = packet.from, port = port.as_str_name(), "Mesh packet");

        match port {
            PortNum::TextMessageApp => {
                let record = message_record(packet, &data, rx_time);
                self.persist("message", self.inner.storage.append_message(record.clone()));
                self.emit(DomainEvent::TextMessage(record));
            }
            PortNum::PositionApp => {
                let Some(position) = decode_app::<Position>(&data, port) else { return };
                self.persist(
                    "node",
                    self.inner.storage.upsert_node(NodeRecord {
                        latitude_i: position.latitude_i,
                        longitude_i: position.longitude_i,
                        altitude: position.altitude,
                        ..NodeRecord::new(packet.from)
                    }),
                );
                self.emit(DomainEvent::Position {
                    from: packet.from,
                    position,
                });
            }
            PortNum::NodeinfoApp => {
                let Some(user) = decode_app::<User>(&data, port) else { return };
                self.persist("node", self.inner.storage.upsert_node(user_record(packet.from, &user)));
                self.refresh_snapshot_user(packet.from, &user, rx_time);
                self.emit(DomainEvent::User {
                    from: packet.from,
                    user,
                });
            }
            PortNum::TelemetryApp => {
                let Some(telemetry) = decode_app::<Telemetry>(&data, port) else { return };
                let record = telemetry_record(packet.from, &telemetry, rx_time);
                self.persist("telemetry", self.inner.storage.append_telemetry(record.clone()));
                self.emit(DomainEvent::Telemetry(record));
            }
            PortNum::RoutingApp => {
                let Some(routing) = decode_app::<Routing>(&data, port) else { return };
                self.handle_routing(packet, &data, routing, rx_time);
            }
            PortNum::TracerouteApp => {
                let Some(route) = decode_app::<RouteDiscovery>(&data, port) else { return };
                self.handle_traceroute(packet, &data, route, rx_time);
            }
            _ => {}
        }
    }

    /// Decipher an encrypted packet. `None` means "unreadable on this channel".
    ///
    /// When the channel field matches both a key index and another key's hash,
    /// each candidate is tried until one yields a packet with a known port.
    pub fn open_packet(&self, packet: &MeshPacket, ciphertext: &[u8]) -> Option<Data> {
        let plaintexts = {
            let cipher = self.inner.cipher.read().ok()?;
            cipher.decrypt_candidates(packet.channel, packet.id, packet.from, ciphertext)
        };

        let plaintexts = match plaintexts {
            Ok(p) => p,
            Err(e) => {
                debug!(channel = packet.channel, from = packet.from, error = %e, "No key for packet");
                return None;
            }
        };

        for plaintext in &plaintexts {
            match Data::decode(plaintext.as_slice()) {
                Ok(data) if data.portnum != 0 && PortNum::try_from(data.portnum).is_ok() => {
                    return Some(data)
                }
                Ok(_) => {
                    debug!(channel = packet.channel, from = packet.from, "Decrypted packet has no known port");
                }
                Err(e) => {
                    debug!(channel = packet.channel, from = packet.from, error = %e, "Packet unreadable under candidate key");
                }
            }
        }
        global_metrics().decode_failure();
        None
    }

    fn store_unreadable(&self, packet: &MeshPacket, ciphertext: &[u8]) {
        global_metrics().unreadable_packet();
        let record = MessageRecord {
            packet_id: packet.id,
            from: packet.from,
            to: packet.to,
            channel: packet.channel,
            portnum: 0,
            text: None,
            payload: ciphertext.to_vec(),
            encrypted: true,
            rx_time: if packet.rx_time != 0 {
                u64::from(packet.rx_time)
            } else {
                now_secs()
            },
            rx_snr: packet.rx_snr,
            rx_rssi: packet.rx_rssi,
            hop_limit: packet.hop_limit,
            hop_start: packet.hop_start,
        };
        self.persist("message", self.inner.storage.append_message(record));
        self.emit(DomainEvent::Unreadable {
            from: packet.from,
            channel: packet.channel,
            packet_id: packet.id,
        });
    }

    fn note_heard(&self, packet: &MeshPacket, rx_time: u64) {
        if packet.from == 0 {
            return;
        }
        let hops_away = (packet.hop_start != 0 && packet.hop_start >= packet.hop_limit)
            .then(|| packet.hop_start - packet.hop_limit);
        let record = NodeRecord {
            last_heard: Some(rx_time),
            channel: Some(packet.channel),
            snr: (packet.rx_snr != 0.0).then_some(packet.rx_snr),
            hops_away,
            ..NodeRecord::new(packet.from)
        };
        self.persist("node", self.inner.storage.upsert_node(record));
    }

    fn handle_routing(&self, packet: &MeshPacket, data: &Data, routing: Routing, rx_time: u64) {
        match routing.variant {
            Some(routing::Variant::ErrorReason(code)) => {
                let error = routing::Error::try_from(code).unwrap_or(routing::Error::None);
                if error != routing::Error::None {
                    if let Some(task) = self.inner.traceroutes.fail_by_request(data.request_id) {
                        info!(
                            destination = task.destination,
                            reason = ?error,
                            "Traceroute failed"
                        );
                    }
                }
                self.emit(DomainEvent::RoutingStatus {
                    from: packet.from,
                    request_id: data.request_id,
                    error,
                });
            }
            // Older firmware answers traceroutes on the routing port
            Some(routing::Variant::RouteReply(route)) => {
                self.handle_traceroute(packet, data, route, rx_time);
            }
            Some(routing::Variant::RouteRequest(_)) | None => {}
        }
    }

    fn handle_traceroute(&self, packet: &MeshPacket, data: &Data, route: RouteDiscovery, rx_time: u64) {
        if data.request_id == 0 {
            trace!(from = packet.from, "Traceroute request from mesh, device answers it");
            return;
        }

        let record = TracerouteRecord {
            from: packet.to,
            to: packet.from,
            route: route.route,
            snr_towards: route.snr_towards,
            route_back: route.route_back,
            snr_back: route.snr_back,
            timestamp: rx_time,
            request_id: data.request_id,
        };

        if self.inner.traceroutes.complete(packet.from).is_some() {
            global_metrics().traceroute_completed();
        }
        info!(
            destination = packet.from,
            hops = record.route.len(),
            hops_back = record.route_back.len(),
            "Traceroute completed"
        );
        self.persist("traceroute", self.inner.storage.upsert_traceroute(record.clone()));
        self.emit(DomainEvent::Traceroute(record));
    }

    fn refresh_snapshot_user(&self, num: u32, user: &User, heard: u64) {
        let heard = u32::try_from(heard).unwrap_or(u32::MAX);
        self.inner.snapshot_tx.send_if_modified(|current| {
            let Some(snapshot) = current.as_ref() else {
                return false;
            };
            let mut next = DeviceSnapshot::clone(snapshot);
            next.upsert_user(num, user.clone(), heard);
            *current = Some(Arc::new(next));
            true
        });
    }

    fn persist(&self, what: &'static str, result: Result<()>) {
        if let Err(e) = result {
            warn!(record = what, error = %e, "Storage rejected record");
        }
    }

    fn emit(&self, event: DomainEvent) {
        trace!(kind = event.kind(), "Domain event");
        if let Ok(handlers) = self.inner.event_handlers.read() {
            for handler in handlers.iter() {
                handler(&event);
            }
        }
        let _ = self.inner.events_tx.send(event);
    }

    // ---------------------------------------------------------------------
    // Outbound
    // ---------------------------------------------------------------------

    fn next_packet_id(&self) -> u32 {
        loop {
            let id = self.inner.next_packet_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Build and send one mesh packet. Returns its packet id.
    pub fn send_packet(
        &self,
        to: u32,
        port: PortNum,
        payload: Vec<u8>,
        options: SendOptions,
    ) -> Result<u32> {
        let id = self.next_packet_id();
        let data = Data {
            portnum: port as i32,
            payload,
            want_response: options.want_response,
            ..Data::default()
        };

        let payload_variant = if options.encrypt {
            let from = self.my_node_num().unwrap_or(0);
            let cipher = self
                .inner
                .cipher
                .read()
                .map_err(|_| ProtocolError::Custom(constants::ERR_KEYRING_LOCK.into()))?;
            let ciphertext = cipher.encrypt(options.channel, id, from, &data.encode_to_vec())?;
            mesh_packet::PayloadVariant::Encrypted(ciphertext)
        } else {
            mesh_packet::PayloadVariant::Decoded(data)
        };

        let envelope = ToRadio {
            payload_variant: Some(to_radio::PayloadVariant::Packet(MeshPacket {
                from: self.my_node_num().unwrap_or(0),
                to,
                channel: options.channel,
                id,
                hop_limit: options.hop_limit,
                want_ack: options.want_ack,
                payload_variant: Some(payload_variant),
                ..MeshPacket::default()
            })),
        };

        self.inner.link.send(crate::proto::to_bytes(&envelope))?;
        Ok(id)
    }

    /// Send a text message to `to` (use [`crate::proto::BROADCAST_ADDR`] for everyone).
    pub fn send_text(&self, to: u32, text: &str, channel: u32) -> Result<u32> {
        let id = self.send_packet(
            to,
            PortNum::TextMessageApp,
            text.as_bytes().to_vec(),
            SendOptions {
                channel,
                want_ack: to != crate::proto::BROADCAST_ADDR,
                ..SendOptions::default()
            },
        )?;
        debug!(to, id, len = text.len(), "Text message sent");
        Ok(id)
    }

    /// Request a traceroute to `destination` and mark it pending.
    pub fn send_traceroute(&self, destination: u32, hop_limit: u32, channel: u32) -> Result<u32> {
        let id = self.send_packet(
            destination,
            PortNum::TracerouteApp,
            RouteDiscovery::default().encode_to_vec(),
            SendOptions {
                channel,
                want_response: true,
                hop_limit,
                ..SendOptions::default()
            },
        )?;
        self.inner
            .traceroutes
            .start(destination, id, now_secs());
        global_metrics().traceroute_sent();
        debug!(destination, id, "Traceroute requested");
        Ok(id)
    }

    /// Ask the device for a fresh configuration dump. Returns the nonce used.
    pub fn request_config(&self) -> Result<u32> {
        let nonce = handshake::generate_nonce();
        if let Ok(mut hs) = self.inner.handshake.lock() {
            hs.begin(Some(nonce));
        }
        self.inner.link.send(handshake::config_request(nonce))?;
        Ok(nonce)
    }
}

fn decode_app<M: prost::Message + Default>(data: &Data, port: PortNum) -> Option<M> {
    match M::decode(data.payload.as_slice()) {
        Ok(msg) => Some(msg),
        Err(e) => {
            global_metrics().decode_failure();
            debug!(port = port.as_str_name(), error = %e, "Undecodable application payload");
            None
        }
    }
}

fn channel_key(channel: &Channel) -> Option<ChannelKey> {
    let role = ChannelRole::from_proto(channel.role);
    if role == ChannelRole::Disabled {
        return None;
    }
    let settings = channel.settings.clone().unwrap_or_default();
    let index = u32::try_from(channel.index).ok()?;
    match ChannelKey::from_psk(index, &settings.psk, role, &settings.name) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!(index, error = %e, "Ignoring channel with unusable key");
            None
        }
    }
}

fn user_record(num: u32, user: &User) -> NodeRecord {
    NodeRecord {
        user_id: Some(user.id.clone()),
        long_name: Some(user.long_name.clone()),
        short_name: Some(user.short_name.clone()),
        hw_model: Some(user.hw_model),
        role: Some(user.role),
        ..NodeRecord::new(num)
    }
}

fn node_record(info: &NodeInfo) -> NodeRecord {
    let mut record = match &info.user {
        Some(user) => user_record(info.num, user),
        None => NodeRecord::new(info.num),
    };
    record.channel = Some(info.channel);
    record.last_heard = (info.last_heard != 0).then(|| u64::from(info.last_heard));
    record.snr = (info.snr != 0.0).then_some(info.snr);
    record.hops_away = info.hops_away;
    if let Some(position) = &info.position {
        record.latitude_i = position.latitude_i;
        record.longitude_i = position.longitude_i;
        record.altitude = position.altitude;
    }
    record
}

fn message_record(packet: &MeshPacket, data: &Data, rx_time: u64) -> MessageRecord {
    MessageRecord {
        packet_id: packet.id,
        from: packet.from,
        to: packet.to,
        channel: packet.channel,
        portnum: data.portnum,
        text: Some(String::from_utf8_lossy(&data.payload).into_owned()),
        payload: data.payload.clone(),
        encrypted: false,
        rx_time,
        rx_snr: packet.rx_snr,
        rx_rssi: packet.rx_rssi,
        hop_limit: packet.hop_limit,
        hop_start: packet.hop_start,
    }
}

fn telemetry_record(node: u32, telemetry: &Telemetry, rx_time: u64) -> TelemetryRecord {
    let mut record = TelemetryRecord {
        node,
        time: if telemetry.time != 0 {
            u64::from(telemetry.time)
        } else {
            rx_time
        },
        ..TelemetryRecord::default()
    };
    match &telemetry.variant {
        Some(telemetry::Variant::DeviceMetrics(m)) => {
            record.battery_level = m.battery_level;
            record.voltage = m.voltage;
            record.channel_utilization = m.channel_utilization;
            record.air_util_tx = m.air_util_tx;
            record.uptime_seconds = m.uptime_seconds;
        }
        Some(telemetry::Variant::EnvironmentMetrics(m)) => {
            record.temperature = m.temperature;
            record.relative_humidity = m.relative_humidity;
            record.barometric_pressure = m.barometric_pressure;
        }
        None => {}
    }
    record
}
