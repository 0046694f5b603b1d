//! Wire protocol modules.
//!
//! - `frame`: length-prefixed framing over a byte stream.
//! - `envelope`: request/response envelopes with lazily parsed payloads.
//! - `selector` / `tracer`: the generic, optional-field message shape of each
//!   bridge.
//!
//! All parsers are panic-free: malformed input is reported as `PanRpcError`
//! so one misbehaving client cannot crash the daemon.

pub mod envelope;
pub mod frame;
pub mod selector;
pub mod tracer;

/// Protocol version carried in every envelope.
pub const PROTOCOL_VERSION: u8 = 1;

use crate::error::{PanRpcError, Result};

/// Borrow a required field or report it missing.
pub fn require<'a, T>(field: &'a Option<T>, name: &str) -> Result<&'a T> {
    field
        .as_ref()
        .ok_or_else(|| PanRpcError::MissingField(name.to_string()))
}
