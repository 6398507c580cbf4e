//! Typed domain events produced from device traffic.

use std::sync::Arc;

use crate::proto::{routing, ClientNotification, MyNodeInfo, Position, User};
use crate::protocol::snapshot::DeviceSnapshot;
use crate::storage::{MessageRecord, NodeRecord, TelemetryRecord, TracerouteRecord};

#[derive(Debug, Clone)]
pub enum DomainEvent {
    MyInfo(MyNodeInfo),
    NodeInfo(NodeRecord),
    /// Live user record announcement (NODEINFO_APP)
    User {
        from: u32,
        user: User,
    },
    Position {
        from: u32,
        position: Position,
    },
    Telemetry(TelemetryRecord),
    TextMessage(MessageRecord),
    ChannelInfo {
        index: u32,
        name: String,
        role: crate::utils::ChannelRole,
    },
    Traceroute(TracerouteRecord),
    RoutingStatus {
        from: u32,
        request_id: u32,
        error: routing::Error,
    },
    ConfigComplete(Arc<DeviceSnapshot>),
    ClientNotification(ClientNotification),
    /// Encrypted packet that could not be read with any known key
    Unreadable {
        from: u32,
        channel: u32,
        packet_id: u32,
    },
}

impl DomainEvent {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::MyInfo(_) => "my_info",
            DomainEvent::NodeInfo(_) => "node_info",
            DomainEvent::User { .. } => "user",
            DomainEvent::Position { .. } => "position",
            DomainEvent::Telemetry(_) => "telemetry",
            DomainEvent::TextMessage(_) => "text_message",
            DomainEvent::ChannelInfo { .. } => "channel_info",
            DomainEvent::Traceroute(_) => "traceroute",
            DomainEvent::RoutingStatus { .. } => "routing_status",
            DomainEvent::ConfigComplete(_) => "config_complete",
            DomainEvent::ClientNotification(_) => "client_notification",
            DomainEvent::Unreadable { .. } => "unreadable",
        }
    }
}
