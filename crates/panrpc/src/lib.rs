//! Top-level facade crate for panrpc.
//!
//! Re-exports the core types, the daemon library, and the client library so
//! users can depend on a single crate.

pub mod core {
    pub use panrpc_core::*;
}

pub mod daemon {
    pub use panrpc_daemon::*;
}

pub mod client {
    pub use panrpc_client::*;
}
