//! Selector Bridge, server side.
//!
//! - `session`: per address-pair state (preferences + fingerprint table).
//! - `server`: `Selector.*` request handling against the policy script.

pub mod server;
pub mod session;

pub use server::SelectorService;
pub use session::{Session, SessionTable};

/// Script module holding the selection entry points.
pub const SELECTOR_MODULE: &str = "panapi";

/// Time-driven entry point, called by the engine's periodic task.
pub const PERIODIC: &str = "Periodic";

pub const ENTRY_POINTS: &[&str] = &[
    "Initialize",
    "SetPreferences",
    "Path",
    "PathDown",
    "Refresh",
    "Close",
    PERIODIC,
];
