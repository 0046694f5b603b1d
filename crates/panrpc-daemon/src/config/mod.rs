//! Daemon config loader (strict parsing).

pub mod schema;

use std::fs;
use std::path::Path;

use panrpc_core::{PanRpcError, Result};

pub use schema::{DaemonConfig, DaemonSection, PolicyBackend, PolicySection};

pub fn load_from_file(path: impl AsRef<Path>) -> Result<DaemonConfig> {
    let path = path.as_ref();
    let s = fs::read_to_string(path).map_err(|e| {
        PanRpcError::Config(format!("read config {} failed: {e}", path.display()))
    })?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<DaemonConfig> {
    let cfg: DaemonConfig = serde_yaml::from_str(s)
        .map_err(|e| PanRpcError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
