use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use meshlink::core::frame::{encode, MAX_PAYLOAD_LEN};
use meshlink::utils::crypto::{apply_keystream, ChannelCipher, ChannelKey, ChannelKeyring, ChannelRole};
use meshlink::FrameCodec;

#[allow(clippy::unwrap_used)]
fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");
    let payload_sizes = [16usize, 128, MAX_PAYLOAD_LEN];

    for &size in &payload_sizes {
        let payload = vec![0x5Au8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter(|| encode(&payload).unwrap())
        });

        // 32 frames pushed through in 61-byte chunks, as a slow socket would
        let stream: Vec<u8> = (0..32)
            .flat_map(|_| encode(&payload).unwrap().to_vec())
            .collect();
        group.bench_function(format!("reassemble_32x{size}b"), |b| {
            b.iter_batched(
                FrameCodec::new,
                |mut codec| {
                    let mut frames = 0usize;
                    for chunk in stream.chunks(61) {
                        frames += codec.feed(chunk).count();
                    }
                    assert_eq!(frames, 32);
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_channel_crypto(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_crypto");
    let key = [0x42u8; 32];
    let channel = ChannelKey::from_psk(0, &[1], ChannelRole::Primary, "").unwrap();
    let hash = u32::from(channel.hash());
    let cipher = ChannelCipher::new(ChannelKeyring::from_keys([channel]));

    for &size in &[32usize, 237] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("keystream_aes256_{size}b"), |b| {
            b.iter_batched(
                || vec![0u8; size],
                |mut data| apply_keystream(&key, 0xDEAD_BEEF, 0x1234_5678, &mut data).unwrap(),
                BatchSize::SmallInput,
            )
        });

        let sealed = Bytes::from(cipher.encrypt(0, 7, 0x1234_5678, &vec![0u8; size]).unwrap());
        group.bench_function(format!("decrypt_by_hash_{size}b"), |b| {
            b.iter(|| cipher.decrypt(hash, 7, 0x1234_5678, &sealed).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_framing, bench_channel_crypto);
criterion_main!(benches);
