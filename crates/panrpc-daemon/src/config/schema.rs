use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use panrpc_core::protocol::frame::DEFAULT_MAX_FRAME_BYTES;
use panrpc_core::{PanRpcError, Result, DEFAULT_SOCKET_PATH};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    pub version: u32,

    #[serde(default)]
    pub daemon: DaemonSection,

    pub policy: PolicySection,
}

impl DaemonConfig {
    /// Config for an in-process daemon: defaults everywhere except the
    /// socket and the script.
    pub fn new(socket_path: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            version: 1,
            daemon: DaemonSection {
                socket_path: socket_path.into(),
                ..DaemonSection::default()
            },
            policy: PolicySection {
                backend: PolicyBackend::Lua,
                script: script.into(),
                periodic_interval_ms: default_periodic_interval_ms(),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(PanRpcError::Config(format!(
                "unsupported config version: {}",
                self.version
            )));
        }

        self.daemon.validate()?;
        self.policy.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonSection {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl DaemonSection {
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(PanRpcError::Config(
                "daemon.socket_path must not be empty".into(),
            ));
        }
        if !(1024..=64 * 1024 * 1024).contains(&self.max_frame_bytes) {
            return Err(PanRpcError::Config(
                "daemon.max_frame_bytes must be between 1024 and 67108864".into(),
            ));
        }
        Ok(())
    }
}

/// Scripting backend hosting the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyBackend {
    Lua,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySection {
    #[serde(default = "default_backend")]
    pub backend: PolicyBackend,

    pub script: PathBuf,

    #[serde(default = "default_periodic_interval_ms")]
    pub periodic_interval_ms: u64,
}

impl PolicySection {
    pub fn validate(&self) -> Result<()> {
        if self.script.as_os_str().is_empty() {
            return Err(PanRpcError::Config("policy.script must not be empty".into()));
        }
        if !(10..=60_000).contains(&self.periodic_interval_ms) {
            return Err(PanRpcError::Config(
                "policy.periodic_interval_ms must be between 10 and 60000".into(),
            ));
        }
        Ok(())
    }

    pub fn periodic_interval(&self) -> Duration {
        Duration::from_millis(self.periodic_interval_ms)
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}
fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}
fn default_backend() -> PolicyBackend {
    PolicyBackend::Lua
}
fn default_periodic_interval_ms() -> u64 {
    1000
}
