//! In-memory [`Storage`] implementation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use super::{
    MessageRecord, NodeFilter, NodeRecord, Storage, TelemetryRecord, TracerouteCandidate,
    TracerouteRecord,
};
use crate::config::DEFAULT_HISTORY_LIMIT;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::ChannelKey;

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<u32, NodeRecord>,
    messages: VecDeque<MessageRecord>,
    telemetry: VecDeque<TelemetryRecord>,
    /// (from, to) -> latest traceroute between them
    traceroutes: HashMap<(u32, u32), TracerouteRecord>,
    channels: BTreeMap<u32, ChannelKey>,
}

/// Thread-safe in-process storage. Nothing survives a restart.
///
/// Message and telemetry histories hold at most `history_limit` records each.
pub struct MemoryStorage {
    inner: RwLock<Inner>,
    history_limit: usize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

fn push_bounded<T>(history: &mut VecDeque<T>, record: T, limit: usize) {
    while history.len() >= limit.max(1) {
        history.pop_front();
    }
    history.push_back(record);
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            history_limit,
        }
    }

    /// Pre-load channel keys, as a persistent backend would have them from a prior run.
    pub fn with_channel_keys(keys: impl IntoIterator<Item = ChannelKey>) -> Self {
        let storage = Self::new();
        if let Ok(mut inner) = storage.inner.write() {
            for key in keys {
                inner.channels.insert(key.index, key);
            }
        }
        storage
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| ProtocolError::Storage(constants::ERR_STORAGE_LOCK.into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| ProtocolError::Storage(constants::ERR_STORAGE_LOCK.into()))
    }

    pub fn node(&self, num: u32) -> Result<Option<NodeRecord>> {
        Ok(self.read()?.nodes.get(&num).cloned())
    }

    pub fn messages(&self) -> Result<Vec<MessageRecord>> {
        Ok(self.read()?.messages.iter().cloned().collect())
    }

    pub fn telemetry(&self) -> Result<Vec<TelemetryRecord>> {
        Ok(self.read()?.telemetry.iter().cloned().collect())
    }

    pub fn traceroutes(&self) -> Result<Vec<TracerouteRecord>> {
        let mut all: Vec<_> = self.read()?.traceroutes.values().cloned().collect();
        all.sort_by_key(|r| (r.timestamp, r.to));
        Ok(all)
    }

    fn latest_traceroute_to(inner: &Inner, node: u32) -> Option<u64> {
        inner
            .traceroutes
            .values()
            .filter(|r| r.to == node)
            .map(|r| r.timestamp)
            .max()
    }
}

impl Storage for MemoryStorage {
    fn upsert_node(&self, record: NodeRecord) -> Result<()> {
        let mut inner = self.write()?;
        trace!(node = record.num, "upsert node");
        match inner.nodes.get_mut(&record.num) {
            Some(existing) => existing.merge(record),
            None => {
                inner.nodes.insert(record.num, record);
            }
        }
        Ok(())
    }

    fn append_message(&self, record: MessageRecord) -> Result<()> {
        push_bounded(&mut self.write()?.messages, record, self.history_limit);
        Ok(())
    }

    fn append_telemetry(&self, record: TelemetryRecord) -> Result<()> {
        push_bounded(&mut self.write()?.telemetry, record, self.history_limit);
        Ok(())
    }

    fn upsert_traceroute(&self, record: TracerouteRecord) -> Result<()> {
        self.write()?
            .traceroutes
            .insert((record.from, record.to), record);
        Ok(())
    }

    fn upsert_channel(&self, key: ChannelKey) -> Result<()> {
        self.write()?.channels.insert(key.index, key);
        Ok(())
    }

    fn get_active_nodes(&self, since: u64, filter: &NodeFilter) -> Result<Vec<NodeRecord>> {
        let inner = self.read()?;
        Ok(inner
            .nodes
            .values()
            .filter(|n| n.last_heard.is_some_and(|heard| heard >= since))
            .filter(|n| filter.matches(n))
            .cloned()
            .collect())
    }

    fn get_stale_traceroute_candidates(
        &self,
        active_since: u64,
        expired_before: u64,
        filter: &NodeFilter,
    ) -> Result<Vec<TracerouteCandidate>> {
        let inner = self.read()?;
        Ok(inner
            .nodes
            .values()
            .filter(|n| n.last_heard.is_some_and(|heard| heard >= active_since))
            .filter(|n| filter.matches(n))
            .filter_map(|n| {
                let last = Self::latest_traceroute_to(&inner, n.num);
                match last {
                    Some(ts) if ts >= expired_before => None,
                    _ => Some(TracerouteCandidate {
                        node: n.clone(),
                        last_traceroute: last,
                    }),
                }
            })
            .collect())
    }

    fn get_channel_keys(&self) -> Result<Vec<ChannelKey>> {
        Ok(self.read()?.channels.values().cloned().collect())
    }
}
