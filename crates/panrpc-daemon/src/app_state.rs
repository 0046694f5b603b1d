//! Shared daemon state.
//!
//! Builds the policy engine (modules + script), both bridge services, and
//! the dispatcher. Every startup failure is returned, never panicked on.

use std::sync::Arc;

use panrpc_core::Result;

use crate::config::{DaemonConfig, PolicySection};
use crate::dispatch::Dispatcher;
use crate::policy::PolicyEngine;
use crate::script::{self, ScriptRuntime};
use crate::selector::{self, SelectorService};
use crate::tracer::{self, TracerService};

#[derive(Clone)]
pub struct AppState {
    cfg: Arc<DaemonConfig>,
    engine: PolicyEngine,
    dispatcher: Arc<Dispatcher>,
    selector: Arc<SelectorService>,
    tracer: Arc<TracerService>,
}

impl AppState {
    /// Build the configured backend, register both modules, load the script.
    pub fn new(cfg: DaemonConfig) -> Result<Self> {
        let engine = build_engine(&cfg.policy, script::new_runtime(&cfg.policy)?)?;
        Ok(Self::with_engine(cfg, engine))
    }

    /// Compose services around an engine that is already loaded.
    pub fn with_engine(cfg: DaemonConfig, engine: PolicyEngine) -> Self {
        let selector = Arc::new(SelectorService::new(engine.clone()));
        let tracer = Arc::new(TracerService::new(engine.clone()));

        let dispatcher = Dispatcher::new();
        dispatcher.register(selector.clone());
        dispatcher.register(tracer.clone());
        tracing::debug!(svcs = ?dispatcher.registered_svcs(), "services registered");

        Self {
            cfg: Arc::new(cfg),
            engine,
            dispatcher: Arc::new(dispatcher),
            selector,
            tracer,
        }
    }

    pub fn cfg(&self) -> &DaemonConfig {
        &self.cfg
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn selector(&self) -> Arc<SelectorService> {
        Arc::clone(&self.selector)
    }

    pub fn tracer(&self) -> Arc<TracerService> {
        Arc::clone(&self.tracer)
    }
}

/// Register the selection and telemetry modules on `runtime`, then load the
/// policy script. Modules go first so the script can override their stubs.
pub fn build_engine(
    policy: &PolicySection,
    runtime: Box<dyn ScriptRuntime>,
) -> Result<PolicyEngine> {
    let engine = PolicyEngine::new(runtime);
    engine.register_module(selector::SELECTOR_MODULE, selector::ENTRY_POINTS)?;
    engine.register_module(tracer::TRACER_MODULE, &tracer::entry_points())?;
    engine.load_script(&policy.script)?;
    tracing::info!(script = %policy.script.display(), backend = ?policy.backend, "policy loaded");
    Ok(engine)
}
