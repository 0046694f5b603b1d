//! Length-prefixed frames (panic-free).
//!
//! Layout: `u32` big-endian body length, then the JSON body.
//!
//! Parsing rules:
//! - Never index the buffer; always check `remaining()` first.
//! - Incomplete input is not an error: `decode_frame` returns `Ok(None)` and
//!   leaves the buffer untouched until more bytes arrive.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::error::{PanRpcError, Result};

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Default upper bound for a single frame body.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Serialize `msg` as JSON and prepend the length header.
pub fn encode_frame<T: Serialize>(msg: &T, max_frame_bytes: usize) -> Result<Bytes> {
    let body = serde_json::to_vec(msg)
        .map_err(|e| PanRpcError::BadRequest(format!("json encode failed: {e}")))?;
    if body.len() > max_frame_bytes {
        return Err(PanRpcError::BadRequest(format!(
            "frame of {} bytes exceeds limit of {max_frame_bytes}",
            body.len()
        )));
    }
    let len = u32::try_from(body.len())
        .map_err(|_| PanRpcError::BadRequest("frame length exceeds u32".into()))?;

    let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len());
    out.put_u32(len);
    out.put_slice(&body);
    Ok(out.freeze())
}

/// Split one complete frame body off the front of `buf`.
pub fn decode_frame(buf: &mut BytesMut, max_frame_bytes: usize) -> Result<Option<Bytes>> {
    if buf.remaining() < FRAME_HEADER_LEN {
        return Ok(None);
    }

    let header: [u8; FRAME_HEADER_LEN] = buf
        .get(..FRAME_HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| PanRpcError::BadRequest("frame header unreadable".into()))?;
    let len = u32::from_be_bytes(header) as usize;
    if len > max_frame_bytes {
        return Err(PanRpcError::BadRequest(format!(
            "frame of {len} bytes exceeds limit of {max_frame_bytes}"
        )));
    }

    if buf.remaining() < FRAME_HEADER_LEN + len {
        buf.reserve(FRAME_HEADER_LEN + len - buf.remaining());
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_LEN);
    Ok(Some(buf.split_to(len).freeze()))
}
