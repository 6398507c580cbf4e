// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use prost::Message as _;

use crate::proto::{
    from_radio, to_radio, Channel, ChannelSettings, FromRadio, MyNodeInfo, NodeInfo, ToRadio,
    User,
};
use crate::protocol::handshake::*;
use crate::protocol::snapshot::DeviceSnapshot;

fn from_radio(variant: from_radio::PayloadVariant) -> FromRadio {
    FromRadio {
        id: 0,
        payload_variant: Some(variant),
    }
}

fn node(num: u32, name: &str) -> NodeInfo {
    NodeInfo {
        num,
        user: Some(User {
            long_name: name.to_string(),
            ..User::default()
        }),
        ..NodeInfo::default()
    }
}

#[test]
fn test_config_request_carries_nonce() {
    let frame = config_request(0xABCD);
    let msg = ToRadio::decode(frame.as_ref()).expect("config request should decode");
    assert_eq!(
        msg.payload_variant,
        Some(to_radio::PayloadVariant::WantConfigId(0xABCD))
    );
}

#[test]
fn test_nonce_is_never_zero() {
    for _ in 0..1000 {
        assert_ne!(generate_nonce(), 0);
    }
}

#[test]
fn test_config_complete_matches_only_own_nonce() {
    let sentinel = from_radio(from_radio::PayloadVariant::ConfigCompleteId(7)).encode_to_vec();
    assert!(is_config_complete(&sentinel, 7));
    assert!(!is_config_complete(&sentinel, 8));
    assert!(!is_config_complete(b"\xff\xff", 7));
}

#[test]
fn test_handshake_accumulates_and_finishes() {
    let mut hs = HandshakeState::new();
    hs.begin(Some(99));

    assert!(hs.record(&from_radio(from_radio::PayloadVariant::MyInfo(MyNodeInfo {
        my_node_num: 1,
        ..MyNodeInfo::default()
    }))));
    assert!(hs.record(&from_radio(from_radio::PayloadVariant::NodeInfo(node(1, "Base")))));
    assert!(hs.record(&from_radio(from_radio::PayloadVariant::Channel(Channel {
        index: 0,
        settings: Some(ChannelSettings {
            psk: vec![1],
            ..ChannelSettings::default()
        }),
        role: 1,
    }))));
    assert!(hs.finish().is_none(), "not complete before sentinel");

    // A sentinel for someone else's nonce does not complete the session
    hs.record(&from_radio(from_radio::PayloadVariant::ConfigCompleteId(5)));
    assert!(!hs.is_complete());

    hs.record(&from_radio(from_radio::PayloadVariant::ConfigCompleteId(99)));
    let snapshot = hs.finish().expect("snapshot after sentinel");
    assert_eq!(snapshot.my_node_num(), Some(1));
    assert_eq!(snapshot.nodes.len(), 1);
    assert_eq!(snapshot.channels.len(), 1);

    // After the dump, node updates are live traffic again
    assert!(!hs.in_progress());
    assert!(!hs.record(&from_radio(from_radio::PayloadVariant::NodeInfo(node(4, "Late")))));
}

#[test]
fn test_repeated_sentinel_after_finish_is_ignored() {
    let mut hs = HandshakeState::new();
    hs.begin(Some(41));
    hs.record(&from_radio(from_radio::PayloadVariant::NodeInfo(node(1, "Base"))));
    hs.record(&from_radio(from_radio::PayloadVariant::ConfigCompleteId(41)));
    assert!(hs.finish().is_some());
    assert_eq!(hs.nonce(), None);

    assert!(!hs.record(&from_radio(from_radio::PayloadVariant::ConfigCompleteId(41))));
    assert!(!hs.is_complete());
    assert!(hs.finish().is_none());
}

#[test]
fn test_begin_discards_previous_session() {
    let mut hs = HandshakeState::new();
    hs.begin(None);
    hs.record(&from_radio(from_radio::PayloadVariant::NodeInfo(node(2, "Old"))));

    hs.begin(None);
    hs.record(&from_radio(from_radio::PayloadVariant::ConfigCompleteId(3)));
    let snapshot = hs.finish().expect("adopts first sentinel when nonce unknown");
    assert!(snapshot.nodes.is_empty());
}

#[test]
fn test_live_packets_are_not_config_items() {
    let mut hs = HandshakeState::new();
    hs.begin(None);
    let packet = from_radio(from_radio::PayloadVariant::Packet(Default::default()));
    assert!(!hs.record(&packet));
}

#[test]
fn test_replay_ends_with_client_sentinel() {
    let mut snapshot = DeviceSnapshot {
        my_info: Some(MyNodeInfo {
            my_node_num: 20,
            ..MyNodeInfo::default()
        }),
        ..DeviceSnapshot::default()
    };
    snapshot.nodes.insert(10, node(10, "Peer"));
    snapshot.nodes.insert(20, node(20, "Me"));
    snapshot.configs.push(vec![0x0A, 0x00]);

    let frames = snapshot.replay_frames(1234);
    let decoded: Vec<FromRadio> = frames
        .iter()
        .map(|f| FromRadio::decode(f.as_ref()).expect("replay frame decodes"))
        .collect();

    assert_eq!(decoded.len(), 5);
    assert!(matches!(
        decoded[0].payload_variant,
        Some(from_radio::PayloadVariant::MyInfo(_))
    ));
    match &decoded[1].payload_variant {
        Some(from_radio::PayloadVariant::NodeInfo(n)) => assert_eq!(n.num, 20),
        other => panic!("own node should come first, got {other:?}"),
    }
    assert_eq!(
        decoded.last().and_then(|m| m.payload_variant.clone()),
        Some(from_radio::PayloadVariant::ConfigCompleteId(1234))
    );
}

#[test]
fn test_upsert_user_refreshes_names() {
    let mut snapshot = DeviceSnapshot::default();
    snapshot.nodes.insert(3, node(3, "Before"));
    snapshot.upsert_user(
        3,
        User {
            long_name: "After".into(),
            ..User::default()
        },
        500,
    );
    let refreshed = &snapshot.nodes[&3];
    assert_eq!(refreshed.user.as_ref().map(|u| u.long_name.as_str()), Some("After"));
    assert_eq!(refreshed.last_heard, 500);
}
