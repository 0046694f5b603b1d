//! panrpc policy daemon library entry.
//!
//! This crate wires the policy engine, the two bridge services (path
//! selection and connection tracing), the service dispatcher, and the Unix
//! socket transport into one daemon. It is consumed by the `panrpcd` binary
//! and by integration tests.

pub mod app_state;
pub mod config;
pub mod dispatch;
pub mod policy;
pub mod script;
pub mod selector;
pub mod tracer;
pub mod transport;

pub use app_state::AppState;
pub use transport::Daemon;
