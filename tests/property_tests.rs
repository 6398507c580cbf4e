//! Property-based tests using proptest
//!
//! Framing, channel crypto, candidate selection and proxy filtering checked
//! across randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::Bytes;
use meshlink::core::frame::{encode, HEADER_LEN, MAX_PAYLOAD_LEN};
use meshlink::proto::{mesh_packet, to_radio, Data, MeshPacket, PortNum, ToRadio};
use meshlink::service::proxy::{classify, classify_with, ClientAction, Denylist};
use meshlink::service::traceroute::select_candidate;
use meshlink::storage::{NodeRecord, TracerouteCandidate};
use meshlink::utils::crypto::{
    apply_keystream, expand_psk, ChannelCipher, ChannelKey, ChannelKeyring, ChannelRole,
};
use meshlink::FrameCodec;
use proptest::prelude::*;

fn payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD_LEN)
}

fn stream_of(payloads: &[Vec<u8>]) -> Vec<u8> {
    payloads
        .iter()
        .flat_map(|p| encode(p).expect("payload within limit").to_vec())
        .collect()
}

// Property: every framed payload comes back out unchanged
proptest! {
    #[test]
    fn prop_frame_roundtrip(data in payload()) {
        let mut codec = FrameCodec::new();
        let framed = encode(&data).expect("payload within limit");
        let out: Vec<Bytes> = codec.feed(&framed).collect();

        prop_assert_eq!(out.len(), 1);
        prop_assert_eq!(out[0].as_ref(), data.as_slice());
        prop_assert_eq!(codec.buffered(), 0);
    }
}

// Property: how the stream is chunked never changes what is reassembled
proptest! {
    #[test]
    fn prop_chunking_is_invisible(
        payloads in prop::collection::vec(payload(), 1..8),
        cuts in prop::collection::vec(1usize..64, 1..64),
    ) {
        let stream = stream_of(&payloads);

        let mut whole = FrameCodec::new();
        let expected: Vec<Bytes> = whole.feed(&stream).collect();

        let mut chunked = FrameCodec::new();
        let mut got = Vec::new();
        let mut rest = stream.as_slice();
        let mut i = 0;
        while !rest.is_empty() {
            let n = cuts[i % cuts.len()].min(rest.len());
            let (chunk, tail) = rest.split_at(n);
            got.extend(chunked.feed(chunk));
            rest = tail;
            i += 1;
        }

        prop_assert_eq!(&got, &expected);
        prop_assert_eq!(got.len(), payloads.len());
    }
}

// Property: noise in front of a frame is discarded
proptest! {
    #[test]
    fn prop_leading_noise_is_skipped(
        noise in prop::collection::vec(any::<u8>().prop_filter("no marker", |b| *b != 0x94), 0..64),
        data in payload(),
    ) {
        let mut stream = noise.clone();
        stream.extend_from_slice(&encode(&data).unwrap());

        let mut codec = FrameCodec::new();
        let out: Vec<Bytes> = codec.feed(&stream).collect();
        prop_assert_eq!(out.len(), 1);
        prop_assert_eq!(out[0].as_ref(), data.as_slice());
    }
}

// Property: arbitrary input never grows the buffer past one partial frame
proptest! {
    #[test]
    fn prop_buffer_stays_bounded(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..700), 1..10)) {
        let mut codec = FrameCodec::new();
        for chunk in &chunks {
            for frame in codec.feed(chunk) {
                prop_assert!(frame.len() <= MAX_PAYLOAD_LEN);
            }
            prop_assert!(codec.buffered() < HEADER_LEN + MAX_PAYLOAD_LEN);
        }
    }
}

// Property: payloads over the limit are refused at encode time
proptest! {
    #[test]
    fn prop_oversized_payload_rejected(len in (MAX_PAYLOAD_LEN + 1)..4096usize) {
        prop_assert!(encode(&vec![0u8; len]).is_err());
    }
}

fn key_bytes() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 16),
        prop::collection::vec(any::<u8>(), 32),
    ]
}

// Property: the CTR transform is its own inverse
proptest! {
    #[test]
    fn prop_keystream_is_involution(
        key in key_bytes(),
        packet_id in any::<u32>(),
        sender in any::<u32>(),
        data in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let mut buf = data.clone();
        apply_keystream(&key, packet_id, sender, &mut buf).unwrap();
        apply_keystream(&key, packet_id, sender, &mut buf).unwrap();
        prop_assert_eq!(buf, data);
    }
}

// Property: what a channel encrypts, the same keyring decrypts by index or hash
proptest! {
    #[test]
    fn prop_cipher_roundtrip_by_hash(
        key in key_bytes(),
        name in "[A-Za-z]{0,12}",
        packet_id in any::<u32>(),
        sender in any::<u32>(),
        data in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let channel = ChannelKey::from_psk(0, &key, ChannelRole::Primary, &name).unwrap();
        let hash = u32::from(channel.hash());
        let cipher = ChannelCipher::new(ChannelKeyring::from_keys([channel]));

        let sealed = cipher.encrypt(0, packet_id, sender, &data).unwrap();
        let opened = cipher.decrypt(hash, packet_id, sender, &sealed).unwrap();
        prop_assert_eq!(opened, data);
    }
}

// Property: only the documented PSK lengths are accepted
proptest! {
    #[test]
    fn prop_psk_length_validation(psk in prop::collection::vec(any::<u8>(), 0..48)) {
        let result = expand_psk(&psk);
        match psk.len() {
            0 => prop_assert_eq!(result.unwrap().len(), 0),
            1 => match psk[0] {
                0 => prop_assert_eq!(result.unwrap().len(), 0),
                1..=10 => prop_assert_eq!(result.unwrap().len(), 16),
                _ => prop_assert!(result.is_err()),
            },
            16 | 32 => prop_assert_eq!(result.unwrap(), psk),
            _ => prop_assert!(result.is_err()),
        }
    }
}

// Property: a node with a traceroute newer than the expiration is never picked
proptest! {
    #[test]
    fn prop_selection_respects_expiration(
        lasts in prop::collection::vec(prop::option::of(0u64..2_000), 0..30),
        expired_before in 0u64..2_000,
    ) {
        let candidates: Vec<TracerouteCandidate> = lasts
            .iter()
            .zip(1u32..)
            .map(|(last, num)| TracerouteCandidate {
                node: NodeRecord::new(num),
                last_traceroute: *last,
            })
            .collect();

        if let Some(chosen) = select_candidate(&candidates, expired_before, |_| false, |_| None) {
            let entry = candidates.iter().find(|c| c.node.num == chosen).unwrap();
            prop_assert!(entry.last_traceroute.map_or(true, |ts| ts < expired_before));
            // Never-traced nodes always win over stale ones
            if entry.last_traceroute.is_some() {
                prop_assert!(candidates.iter().all(|c| c.last_traceroute.is_some()));
            }
        }
    }
}

fn port() -> impl Strategy<Value = PortNum> {
    prop::sample::select(vec![
        PortNum::TextMessageApp,
        PortNum::RemoteHardwareApp,
        PortNum::PositionApp,
        PortNum::NodeinfoApp,
        PortNum::AdminApp,
        PortNum::TelemetryApp,
        PortNum::TracerouteApp,
        PortNum::PrivateApp,
    ])
}

// Property: a denylisted message type is never forwarded
proptest! {
    #[test]
    fn prop_denylist_never_forwards(port in port(), body in prop::collection::vec(any::<u8>(), 0..64)) {
        let denylist = Denylist::new(["ADMIN_APP", "REMOTE_HARDWARE_APP", "DISCONNECT"]);
        let frame = meshlink::proto::to_bytes(&ToRadio {
            payload_variant: Some(to_radio::PayloadVariant::Packet(MeshPacket {
                payload_variant: Some(mesh_packet::PayloadVariant::Decoded(Data {
                    portnum: port as i32,
                    payload: body,
                    ..Data::default()
                })),
                ..MeshPacket::default()
            })),
        });

        let action = classify(&frame, &denylist);
        if denylist.is_denied(port.as_str_name()) {
            prop_assert_eq!(action, ClientAction::Reject(port.as_str_name()));
        } else {
            prop_assert_eq!(action, ClientAction::Forward);
        }
    }
}

// Property: an encrypted client packet is judged by the port it opens to
proptest! {
    #[test]
    fn prop_encrypted_packets_judged_by_opened_port(port in port(), sealed in prop::collection::vec(any::<u8>(), 1..64)) {
        let denylist = Denylist::new(["ADMIN_APP", "REMOTE_HARDWARE_APP", "DISCONNECT"]);
        let frame = meshlink::proto::to_bytes(&ToRadio {
            payload_variant: Some(to_radio::PayloadVariant::Packet(MeshPacket {
                payload_variant: Some(mesh_packet::PayloadVariant::Encrypted(sealed)),
                ..MeshPacket::default()
            })),
        });

        let action = classify_with(&frame, &denylist, |_: &MeshPacket, _: &[u8]| {
            Some(Data { portnum: port as i32, ..Data::default() })
        });
        if denylist.is_denied(port.as_str_name()) {
            prop_assert_eq!(action, ClientAction::Reject(port.as_str_name()));
        } else {
            prop_assert_eq!(action, ClientAction::Forward);
        }
        prop_assert_eq!(classify(&frame, &denylist), ClientAction::Reject("ENCRYPTED_PACKET"));
    }
}
