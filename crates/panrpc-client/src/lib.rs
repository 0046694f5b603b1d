//! panrpc client library.
//!
//! In-process adapters for the two daemon capabilities:
//! - `SelectorClient` (path selection, one per connection)
//! - `TracerClient` / `ConnectionTracerClient` (per-connection telemetry)
//!
//! Both share one multiplexed `RpcClient` per process.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod rpc;
pub mod selector;
pub mod tracer;

pub use rpc::RpcClient;
pub use selector::{PathSelector, SelectorClient};
pub use tracer::{ConnectionTracer, ConnectionTracerClient, TracerClient};
