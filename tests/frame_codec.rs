//! Framing over real async byte streams.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use meshlink::core::frame::{encode, MAX_PAYLOAD_LEN};
use meshlink::{FrameCodec, ProtocolError};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{Encoder, Framed, FramedRead};

#[tokio::test]
async fn test_framed_roundtrip_over_duplex() {
    let (a, b) = tokio::io::duplex(4096);
    let mut tx = Framed::new(a, FrameCodec::new());
    let mut rx = Framed::new(b, FrameCodec::new());

    let payloads = [
        Bytes::from_static(b"first"),
        Bytes::new(),
        Bytes::from(vec![0xAB; MAX_PAYLOAD_LEN]),
    ];
    for p in &payloads {
        tx.send(p.clone()).await.unwrap();
    }

    for expected in &payloads {
        let got = rx.next().await.unwrap().unwrap();
        assert_eq!(&got, expected);
    }
}

#[tokio::test]
async fn test_fed_frames_go_out_on_flush() {
    let (a, b) = tokio::io::duplex(4096);
    let mut tx = Framed::new(a, FrameCodec::new());
    let mut rx = FramedRead::new(b, FrameCodec::new());

    tx.feed(Bytes::from_static(b"queued one")).await.unwrap();
    tx.feed(Bytes::from_static(b"queued two")).await.unwrap();
    tx.flush().await.unwrap();

    assert_eq!(rx.next().await.unwrap().unwrap(), Bytes::from_static(b"queued one"));
    assert_eq!(rx.next().await.unwrap().unwrap(), Bytes::from_static(b"queued two"));
}

#[tokio::test]
async fn test_frames_split_across_writes() {
    let (mut writer, reader) = tokio::io::duplex(64);
    let mut rx = FramedRead::new(reader, FrameCodec::new());

    let mut stream = encode(b"split across many writes").unwrap().to_vec();
    stream.extend_from_slice(&encode(b"second").unwrap());

    tokio::spawn(async move {
        for byte in stream {
            writer.write_all(&[byte]).await.unwrap();
            tokio::task::yield_now().await;
        }
    });

    assert_eq!(
        rx.next().await.unwrap().unwrap(),
        Bytes::from_static(b"split across many writes")
    );
    assert_eq!(rx.next().await.unwrap().unwrap(), Bytes::from_static(b"second"));
}

#[tokio::test]
async fn test_debug_output_between_frames_is_ignored() {
    let (mut writer, reader) = tokio::io::duplex(1024);
    let mut rx = FramedRead::new(reader, FrameCodec::new());

    writer.write_all(b"INFO  | ??:??:?? 2 [Router] boot\r\n").await.unwrap();
    writer.write_all(&encode(b"packet").unwrap()).await.unwrap();
    writer.write_all(b"\x94 stray marker\n").await.unwrap();
    writer.write_all(&encode(b"after noise").unwrap()).await.unwrap();
    drop(writer);

    let got: Vec<Bytes> = rx.map(|r| r.unwrap()).collect().await;
    assert_eq!(
        got,
        vec![Bytes::from_static(b"packet"), Bytes::from_static(b"after noise")]
    );
}

#[tokio::test]
async fn test_oversized_header_is_dropped_and_counted() {
    let (mut writer, reader) = tokio::io::duplex(1024);
    let mut rx = FramedRead::new(reader, FrameCodec::new());

    // Declares 0x0300 bytes, well past the limit
    writer.write_all(&[0x94, 0xC3, 0x03, 0x00]).await.unwrap();
    writer.write_all(&encode(b"survivor").unwrap()).await.unwrap();

    assert_eq!(rx.next().await.unwrap().unwrap(), Bytes::from_static(b"survivor"));
    assert_eq!(rx.decoder().dropped(), 1);
}

#[test]
fn test_encoder_rejects_oversized_payload() {
    let mut codec = FrameCodec::new();
    let mut dst = BytesMut::new();

    let err = codec
        .encode(Bytes::from(vec![0u8; MAX_PAYLOAD_LEN + 1]), &mut dst)
        .unwrap_err();
    assert!(matches!(err, ProtocolError::OversizedFrame(n) if n == MAX_PAYLOAD_LEN + 1));
    assert!(dst.is_empty());
}
