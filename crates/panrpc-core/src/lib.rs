//! panrpc core: path model, value codecs, wire protocol, and error types.
//!
//! This crate defines the contracts shared by the policy daemon and the client
//! library: the `Path` record and its wire/script encodings, the RPC envelope
//! and frame codec, and the generic per-bridge message shapes. It carries no
//! transport or runtime dependencies so both sides can reuse it.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Every fallible path
//! surfaces as `PanRpcError`, so a malformed frame from one client can never
//! take the daemon down.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod codec;
pub mod error;
pub mod path;
pub mod protocol;
pub mod value;

/// Shared result type.
pub use error::{ErrorCode, PanRpcError, Result};
pub use path::{GeoCoordinates, LinkType, Path, PathFingerprint, PathInterface, PathMetadata};
pub use value::{ScriptTable, ScriptValue};

/// Well-known daemon endpoint used when nothing else is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/scion-pan-rpc.sock";
