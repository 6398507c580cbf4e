//! Wire frame layout shared by the device link and the virtual node proxy.
//!
//! ```text
//! [0x94] [0xC3] [LEN_MSB] [LEN_LSB] [protobuf payload (0..=512 bytes)]
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// First byte of the frame marker
pub const START1: u8 = 0x94;

/// Second byte of the frame marker
pub const START2: u8 = 0xC3;

/// Marker plus big-endian length
pub const HEADER_LEN: usize = 4;

/// Largest payload a frame may carry
pub const MAX_PAYLOAD_LEN: usize = 512;

/// Append one framed payload to `dst`.
pub fn write_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::OversizedFrame(payload.len()));
    }

    dst.reserve(HEADER_LEN + payload.len());
    dst.put_u8(START1);
    dst.put_u8(START2);
    dst.put_u16(payload.len() as u16);
    dst.put_slice(payload);
    Ok(())
}

/// Frame a payload into a fresh buffer.
pub fn encode(payload: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    write_frame(payload, &mut buf)?;
    Ok(buf.freeze())
}

/// Outcome of scanning a reassembly buffer for the next frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Scan {
    /// A complete payload was removed from the buffer
    Frame(Bytes),
    /// A header declared an impossible length; its marker was skipped
    Oversized(usize),
    /// More bytes are needed
    Incomplete,
}

/// Pull the next frame out of `buf`, discarding noise in front of the marker.
///
/// Consumed bytes are removed from the buffer. A partial frame is left in place
/// untouched so the next call can complete it.
pub(crate) fn scan(buf: &mut BytesMut) -> Scan {
    loop {
        match buf.iter().position(|&b| b == START1) {
            Some(0) => {}
            Some(pos) => {
                let _ = buf.split_to(pos);
            }
            None => {
                buf.clear();
                return Scan::Incomplete;
            }
        }

        if buf.len() < 2 {
            return Scan::Incomplete;
        }
        if buf[1] != START2 {
            // lone 0x94 inside noise
            let _ = buf.split_to(1);
            continue;
        }
        if buf.len() < HEADER_LEN {
            return Scan::Incomplete;
        }

        let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if len > MAX_PAYLOAD_LEN {
            let _ = buf.split_to(1);
            return Scan::Oversized(len);
        }
        if buf.len() < HEADER_LEN + len {
            return Scan::Incomplete;
        }

        let _ = buf.split_to(HEADER_LEN);
        return Scan::Frame(buf.split_to(len).freeze());
    }
}
