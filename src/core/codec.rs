//! # Frame Codec
//!
//! Length-prefixed frame reassembly for the device stream protocol.
//!
//! The codec is usable two ways:
//! - push-style through [`FrameCodec::feed`], which keeps its own reassembly buffer
//!   across calls and yields complete payloads lazily;
//! - pull-style as a `tokio_util` [`Decoder`]/[`Encoder`] so a socket can be driven
//!   with `Framed`.
//!
//! Both paths share the same scanner, so noise before a marker is discarded and
//! frames declaring more than [`MAX_PAYLOAD_LEN`] bytes are dropped identically.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::core::frame::{self, Scan, MAX_PAYLOAD_LEN};
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::global_metrics;

/// Stateful frame reassembler. One instance per byte stream.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buf: BytesMut,
    dropped: u64,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and iterate over every payload it completes.
    ///
    /// The iterator is lazy: frames are carved out of the buffer as it is advanced.
    /// Dropping it early leaves the remaining bytes buffered for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buf.extend_from_slice(chunk);
        Frames { codec: self }
    }

    /// Bytes currently held waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Number of frames discarded for declaring an out-of-range length.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Discard any partial frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn next_from(buf: &mut BytesMut, dropped: &mut u64) -> Option<Bytes> {
        loop {
            match frame::scan(buf) {
                Scan::Frame(payload) => return Some(payload),
                Scan::Incomplete => return None,
                Scan::Oversized(len) => {
                    *dropped += 1;
                    global_metrics().frame_dropped();
                    warn!(
                        declared_len = len,
                        max = MAX_PAYLOAD_LEN,
                        "Dropping frame with out-of-range length"
                    );
                }
            }
        }
    }
}

/// Lazy sequence of payloads produced by one [`FrameCodec::feed`] call.
pub struct Frames<'a> {
    codec: &'a mut FrameCodec,
}

impl Iterator for Frames<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        let FrameCodec { buf, dropped } = &mut *self.codec;
        FrameCodec::next_from(buf, dropped)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        // Framed owns the read buffer, so our internal one stays unused here.
        Ok(Self::next_from(src, &mut self.dropped))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        frame::write_frame(&payload, dst)
    }
}
