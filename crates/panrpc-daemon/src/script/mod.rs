//! Script Runtime Adapter.
//!
//! The policy is a script hosted by a pluggable backend. Callers only see the
//! `ScriptRuntime` capability and backend-neutral `ScriptValue`s; the backend
//! is picked by configuration (`policy.backend`).

pub mod lua;
pub mod runtime;

pub use lua::LuaRuntime;
pub use runtime::{NotImplemented, ScriptRuntime};

use panrpc_core::Result;

use crate::config::{PolicyBackend, PolicySection};

/// Fresh runtime for the configured backend (no modules, no script yet).
pub fn new_runtime(policy: &PolicySection) -> Result<Box<dyn ScriptRuntime>> {
    match policy.backend {
        PolicyBackend::Lua => Ok(Box::new(LuaRuntime::new())),
    }
}
