//! Cached device configuration, replayed to proxy clients as a synthetic
//! config dump.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::proto::{from_radio, to_bytes, Channel, FromRadio, MyNodeInfo, NodeInfo, User};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSnapshot {
    pub my_info: Option<MyNodeInfo>,
    /// Node database keyed by node number
    pub nodes: BTreeMap<u32, NodeInfo>,
    /// Channels ordered by index
    pub channels: Vec<Channel>,
    /// Opaque device config sections, in arrival order
    pub configs: Vec<Vec<u8>>,
    /// Opaque module config sections, in arrival order
    pub module_configs: Vec<Vec<u8>>,
    pub metadata: Option<Vec<u8>>,
}

impl DeviceSnapshot {
    pub fn my_node_num(&self) -> Option<u32> {
        self.my_info.as_ref().map(|i| i.my_node_num)
    }

    /// Frames a real device would send in answer to `want_config_id = nonce`,
    /// ending with the matching config-complete sentinel.
    ///
    /// Order follows the device: my-info, own node first then the rest of the node
    /// db, metadata, channels, config sections, module config sections, sentinel.
    pub fn replay_frames(&self, nonce: u32) -> Vec<Bytes> {
        use from_radio::PayloadVariant as V;

        let mut variants = Vec::with_capacity(
            self.nodes.len() + self.channels.len() + self.configs.len() + self.module_configs.len() + 3,
        );

        if let Some(info) = &self.my_info {
            variants.push(V::MyInfo(info.clone()));
        }

        let own = self.my_node_num();
        if let Some(node) = own.and_then(|num| self.nodes.get(&num)) {
            variants.push(V::NodeInfo(node.clone()));
        }
        variants.extend(
            self.nodes
                .values()
                .filter(|n| Some(n.num) != own)
                .cloned()
                .map(V::NodeInfo),
        );

        if let Some(meta) = &self.metadata {
            variants.push(V::Metadata(meta.clone()));
        }
        variants.extend(self.channels.iter().cloned().map(V::Channel));
        variants.extend(self.configs.iter().cloned().map(V::Config));
        variants.extend(self.module_configs.iter().cloned().map(V::ModuleConfig));
        variants.push(V::ConfigCompleteId(nonce));

        variants
            .into_iter()
            .enumerate()
            .map(|(i, variant)| {
                to_bytes(&FromRadio {
                    id: u32::try_from(i + 1).unwrap_or(u32::MAX),
                    payload_variant: Some(variant),
                })
            })
            .collect()
    }

    /// Refresh a node's user record from a live NODEINFO packet.
    pub fn upsert_user(&mut self, num: u32, user: User, last_heard: u32) {
        let node = self.nodes.entry(num).or_insert_with(|| NodeInfo {
            num,
            ..NodeInfo::default()
        });
        node.user = Some(user);
        node.last_heard = node.last_heard.max(last_heard);
    }
}
