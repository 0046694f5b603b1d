use std::fs;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashSet;

use panrpc_core::{PanRpcError, Result, ScriptValue};

/// One embedded scripting VM.
///
/// Implementations are single-threaded: `&mut self` on every call, and the
/// policy engine owns the only instance behind its lock.
pub trait ScriptRuntime: Send {
    /// Install `module` as a global table of entry points. Each entry point
    /// starts as a stub that logs "not implemented" and returns nothing, so a
    /// script only has to define what it cares about.
    fn register_module(&mut self, module: &str, entry_points: &[&str]) -> Result<()>;

    /// Execute a chunk of script source.
    fn load_source(&mut self, name: &str, source: &str) -> Result<()>;

    /// Call `module.function(args...)`. A missing function behaves like a
    /// stub: logged once, no results, success.
    fn call_named(
        &mut self,
        module: &str,
        function: &str,
        args: Vec<ScriptValue>,
    ) -> Result<Vec<ScriptValue>>;

    fn load_script(&mut self, path: &Path) -> Result<()> {
        let source = fs::read_to_string(path).map_err(|e| {
            PanRpcError::Config(format!("read script {} failed: {e}", path.display()))
        })?;
        self.load_source(&path.display().to_string(), &source)
    }
}

/// Tracks which `module.function` pairs already reported "not implemented".
#[derive(Debug, Clone, Default)]
pub struct NotImplemented {
    seen: Arc<DashSet<String>>,
}

impl NotImplemented {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log the first miss per pair; later misses are silent.
    pub fn report(&self, module: &str, function: &str) {
        if self.seen.insert(format!("{module}.{function}")) {
            tracing::warn!(module, function, "function {function} not implemented in script");
        }
    }

    /// Number of distinct pairs reported so far.
    pub fn count(&self) -> usize {
        self.seen.len()
    }

    pub fn contains(&self, module: &str, function: &str) -> bool {
        self.seen.contains(&format!("{module}.{function}"))
    }
}
