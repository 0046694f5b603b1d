//! Shared helpers: build a policy engine from inline Lua.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(dead_code)]

use std::fs;

use tempfile::TempDir;

use panrpc_core::ScriptValue;
use panrpc_daemon::app_state::build_engine;
use panrpc_daemon::config::DaemonConfig;
use panrpc_daemon::policy::PolicyEngine;
use panrpc_daemon::script::{LuaRuntime, NotImplemented};

/// Config whose script file holds `source`. Keep the dir alive for the test.
pub fn config_with_script(source: &str) -> (TempDir, DaemonConfig) {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("policy.lua");
    fs::write(&script, source).unwrap();
    let cfg = DaemonConfig::new(dir.path().join("panrpc.sock"), script);
    (dir, cfg)
}

pub fn engine_with_script(source: &str) -> (TempDir, PolicyEngine) {
    let (dir, engine, _) = engine_with_tracker(source);
    (dir, engine)
}

/// Engine plus the runtime's "not implemented" tracker.
pub fn engine_with_tracker(source: &str) -> (TempDir, PolicyEngine, NotImplemented) {
    let (dir, cfg) = config_with_script(source);
    let runtime = LuaRuntime::new();
    let tracker = runtime.not_implemented().clone();
    let engine = build_engine(&cfg.policy, Box::new(runtime)).unwrap();
    (dir, engine, tracker)
}

/// First result of a script helper returning an integer.
pub fn call_int(engine: &PolicyEngine, module: &str, function: &str) -> i64 {
    let out = engine.call_named(module, function, vec![]).unwrap();
    out.first().and_then(ScriptValue::as_i64).unwrap()
}
