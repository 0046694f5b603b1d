//! One VM, one caller at a time.
//!
//! Every entry into the script goes through `PolicyEngine::with_runtime`,
//! which holds the VM mutex for exactly the duration of the closure. The
//! guard is released on every exit path, including script-raised errors.
//! Script calls have no deadline: a hung script blocks every later call.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use panrpc_core::{PanRpcError, Result, ScriptValue};

use crate::script::ScriptRuntime;
use crate::selector::{PERIODIC, SELECTOR_MODULE};

/// Cheap-clone handle to the shared VM.
#[derive(Clone)]
pub struct PolicyEngine {
    vm: Arc<Mutex<Box<dyn ScriptRuntime>>>,
}

impl PolicyEngine {
    pub fn new(runtime: Box<dyn ScriptRuntime>) -> Self {
        Self {
            vm: Arc::new(Mutex::new(runtime)),
        }
    }

    /// Run `f` with exclusive access to the VM.
    pub fn with_runtime<R>(&self, f: impl FnOnce(&mut dyn ScriptRuntime) -> Result<R>) -> Result<R> {
        let mut vm = self
            .vm
            .lock()
            .map_err(|_| PanRpcError::Internal("policy engine lock poisoned".into()))?;
        f(&mut **vm)
    }

    pub fn register_module(&self, module: &str, entry_points: &[&str]) -> Result<()> {
        self.with_runtime(|vm| vm.register_module(module, entry_points))
    }

    pub fn load_script(&self, path: &Path) -> Result<()> {
        self.with_runtime(|vm| vm.load_script(path))
    }

    pub fn load_source(&self, name: &str, source: &str) -> Result<()> {
        self.with_runtime(|vm| vm.load_source(name, source))
    }

    /// Blocking call into the script. Waits for the VM lock.
    pub fn call_named(
        &self,
        module: &str,
        function: &str,
        args: Vec<ScriptValue>,
    ) -> Result<Vec<ScriptValue>> {
        self.with_runtime(|vm| vm.call_named(module, function, args))
    }

    /// Run `f` under the VM lock on the blocking pool, so runtime workers
    /// keep serving I/O while a caller waits for or runs the script.
    pub async fn run<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn ScriptRuntime) -> Result<R> + Send + 'static,
    {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.with_runtime(f))
            .await
            .map_err(|e| PanRpcError::Internal(format!("policy call aborted: {e}")))?
    }

    pub async fn call(
        &self,
        module: &'static str,
        function: &str,
        args: Vec<ScriptValue>,
    ) -> Result<Vec<ScriptValue>> {
        let function = function.to_string();
        self.run(move |vm| vm.call_named(module, &function, args)).await
    }

    /// Call `panapi.Periodic(elapsedSeconds)` every `interval` until the
    /// returned handle is aborted. Errors are logged, never fatal.
    pub fn spawn_periodic(&self, interval: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(Instant::now() + interval, interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = Instant::now();

            loop {
                tick.tick().await;
                let now = Instant::now();
                let elapsed = now.duration_since(last).as_secs_f64();
                last = now;

                if let Err(e) = engine
                    .call(SELECTOR_MODULE, PERIODIC, vec![ScriptValue::Number(elapsed)])
                    .await
                {
                    tracing::warn!(error = %e, "periodic policy call failed");
                }
            }
        })
    }
}
