//! # Storage Collaborator
//!
//! Ingestion contract between the protocol core and whatever persists mesh data.
//! The core only ever calls the [`Storage`] trait; it never issues queries of its
//! own. Records are plain data, so a SQL-backed implementation maps them onto its
//! schema without the core knowing.
//!
//! [`MemoryStorage`] is the in-process implementation used by the daemon and the
//! test suite.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::TracerouteFilters;
use crate::error::{ProtocolError, Result};
use crate::proto::DeviceRole;
use crate::utils::crypto::ChannelKey;

pub mod memory;

pub use memory::MemoryStorage;

/// Everything known about one mesh node. `None` fields are "not reported yet"
/// and never overwrite known values on upsert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub num: u32,
    pub user_id: Option<String>,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub hw_model: Option<i32>,
    pub role: Option<i32>,
    /// Channel the node was last heard on
    pub channel: Option<u32>,
    /// Unix seconds
    pub last_heard: Option<u64>,
    pub snr: Option<f32>,
    pub hops_away: Option<u32>,
    pub latitude_i: Option<i32>,
    pub longitude_i: Option<i32>,
    pub altitude: Option<i32>,
}

impl NodeRecord {
    pub fn new(num: u32) -> Self {
        Self {
            num,
            ..Self::default()
        }
    }

    /// Overlay every reported field of `other` onto `self`.
    pub fn merge(&mut self, other: NodeRecord) {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        overlay!(
            user_id, long_name, short_name, hw_model, role, channel, snr, hops_away, latitude_i,
            longitude_i, altitude
        );
        // last_heard only moves forward
        if let Some(heard) = other.last_heard {
            self.last_heard = Some(self.last_heard.map_or(heard, |cur| cur.max(heard)));
        }
    }

    pub fn role_name(&self) -> Option<&'static str> {
        self.role
            .and_then(|r| DeviceRole::try_from(r).ok())
            .map(|r| r.as_str_name())
    }
}

/// One received (or sent) mesh packet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub packet_id: u32,
    pub from: u32,
    pub to: u32,
    pub channel: u32,
    pub portnum: i32,
    /// Decoded text for text messages
    pub text: Option<String>,
    /// Application payload, or the still-encrypted bytes when `encrypted` is set
    pub payload: Vec<u8>,
    /// The packet could not be read with any known channel key
    pub encrypted: bool,
    pub rx_time: u64,
    pub rx_snr: f32,
    pub rx_rssi: i32,
    pub hop_limit: u32,
    pub hop_start: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub node: u32,
    pub time: u64,
    pub battery_level: Option<u32>,
    pub voltage: Option<f32>,
    pub channel_utilization: Option<f32>,
    pub air_util_tx: Option<f32>,
    pub uptime_seconds: Option<u32>,
    pub temperature: Option<f32>,
    pub relative_humidity: Option<f32>,
    pub barometric_pressure: Option<f32>,
}

/// A completed traceroute between the local node (`from`) and a destination (`to`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteRecord {
    pub from: u32,
    pub to: u32,
    /// Intermediate hops toward the destination
    pub route: Vec<u32>,
    pub snr_towards: Vec<i32>,
    /// Intermediate hops on the way back
    pub route_back: Vec<u32>,
    pub snr_back: Vec<i32>,
    /// Unix seconds the response arrived
    pub timestamp: u64,
    /// Id of the request packet this answers
    pub request_id: u32,
}

/// A traceroute candidate with the time of its most recent traceroute, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct TracerouteCandidate {
    pub node: NodeRecord,
    pub last_traceroute: Option<u64>,
}

/// Compiled form of [`TracerouteFilters`].
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub channels: Vec<u32>,
    pub roles: Vec<String>,
    pub hw_models: Vec<i32>,
    pub name_pattern: Option<Regex>,
    pub include: Vec<u32>,
    pub exclude: Vec<u32>,
}

impl NodeFilter {
    /// A filter that accepts every node.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn from_config(filters: &TracerouteFilters) -> Result<Self> {
        let name_pattern = filters
            .name_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ProtocolError::ConfigError(format!("Invalid name pattern: {e}")))?;

        Ok(Self {
            channels: filters.channels.clone(),
            roles: filters.roles.iter().map(|r| r.to_uppercase()).collect(),
            hw_models: filters.hw_models.clone(),
            name_pattern,
            include: filters.include.clone(),
            exclude: filters.exclude.clone(),
        })
    }

    /// Exclusion wins over inclusion; an included node skips every other check.
    pub fn matches(&self, node: &NodeRecord) -> bool {
        if self.exclude.contains(&node.num) {
            return false;
        }
        if self.include.contains(&node.num) {
            return true;
        }

        if !self.channels.is_empty()
            && !node.channel.is_some_and(|c| self.channels.contains(&c))
        {
            return false;
        }

        if !self.roles.is_empty()
            && !node
                .role_name()
                .is_some_and(|name| self.roles.iter().any(|r| r == name))
        {
            return false;
        }

        if !self.hw_models.is_empty()
            && !node.hw_model.is_some_and(|hw| self.hw_models.contains(&hw))
        {
            return false;
        }

        if let Some(pattern) = &self.name_pattern {
            let hit = [&node.long_name, &node.short_name]
                .into_iter()
                .flatten()
                .any(|name| pattern.is_match(name));
            if !hit {
                return false;
            }
        }

        true
    }
}

/// Storage contract consumed by the protocol core.
///
/// Implementations must be cheap to call from inside a frame handler; anything slow
/// belongs behind a queue on the implementation side.
pub trait Storage: Send + Sync {
    fn upsert_node(&self, record: NodeRecord) -> Result<()>;

    fn append_message(&self, record: MessageRecord) -> Result<()>;

    fn append_telemetry(&self, record: TelemetryRecord) -> Result<()>;

    fn upsert_traceroute(&self, record: TracerouteRecord) -> Result<()>;

    fn upsert_channel(&self, key: ChannelKey) -> Result<()>;

    /// Nodes heard at or after `since` (unix seconds) that pass `filter`.
    fn get_active_nodes(&self, since: u64, filter: &NodeFilter) -> Result<Vec<NodeRecord>>;

    /// Active nodes with no traceroute on record, or whose latest traceroute is
    /// strictly older than `expired_before`.
    fn get_stale_traceroute_candidates(
        &self,
        active_since: u64,
        expired_before: u64,
        filter: &NodeFilter,
    ) -> Result<Vec<TracerouteCandidate>>;

    fn get_channel_keys(&self) -> Result<Vec<ChannelKey>>;
}
