//! Connection Tracer Bridge, server side.
//!
//! - `registry`: active tracer instances and closed tombstones.
//! - `handlers`: one row per event, mapping it to script arguments.
//! - `server`: `Tracer.*` request handling.

pub mod handlers;
pub mod registry;
pub mod server;

pub use registry::{CloseOutcome, TracerInstance, TracerRegistry};
pub use server::TracerService;

use panrpc_core::protocol::tracer::EVENT_METHODS;

/// Script module holding the telemetry entry points.
pub const TRACER_MODULE: &str = "stats";

/// Script entry point run when a tracer instance is created.
pub const TRACER_FOR_CONNECTION: &str = "TracerForConnection";

/// Every telemetry entry point: the factory, then one per event.
pub fn entry_points() -> Vec<&'static str> {
    std::iter::once(TRACER_FOR_CONNECTION)
        .chain(EVENT_METHODS.iter().copied())
        .collect()
}
