use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use panrpc_core::protocol::envelope::Request;
use panrpc_core::protocol::require;
use panrpc_core::protocol::tracer::{ConnectionTracerMsg, TracerEvent, NEW_TRACER_METHOD, TRACER_SVC};
use panrpc_core::{Result, ScriptValue};

use crate::dispatch::RpcService;
use crate::policy::PolicyEngine;

use super::handlers::script_args;
use super::registry::{CloseOutcome, TracerRegistry};
use super::{TRACER_FOR_CONNECTION, TRACER_MODULE};

pub struct TracerService {
    engine: PolicyEngine,
    registry: Arc<TracerRegistry>,
}

impl TracerService {
    pub fn new(engine: PolicyEngine) -> Self {
        Self {
            engine,
            registry: Arc::new(TracerRegistry::new()),
        }
    }

    pub fn registry(&self) -> Arc<TracerRegistry> {
        Arc::clone(&self.registry)
    }

    pub async fn new_tracer(&self, msg: ConnectionTracerMsg) -> Result<()> {
        let id = msg.tracing_id()?;
        let perspective = *require(&msg.perspective, "perspective")?;
        let odcid = require(&msg.odcid, "odcid")?.clone();
        let registry = self.registry();

        self.engine
            .run(move |vm| {
                let args = vec![
                    ScriptValue::from(id),
                    ScriptValue::from(perspective.as_str()),
                    ScriptValue::from(odcid.as_str()),
                ];
                registry.create(id, perspective, odcid);
                vm.call_named(TRACER_MODULE, TRACER_FOR_CONNECTION, args)?;
                Ok(())
            })
            .await
    }

    /// Route one event to its instance and the script.
    ///
    /// Unknown ids and events after Close are rejected; a repeated Close
    /// succeeds without reaching the script again.
    pub async fn on_event(
        &self,
        id: u64,
        local: String,
        remote: String,
        event: TracerEvent,
    ) -> Result<()> {
        let registry = self.registry();

        self.engine
            .run(move |vm| {
                if event == TracerEvent::Close {
                    if registry.close(id)? == CloseOutcome::AlreadyClosed {
                        return Ok(());
                    }
                } else {
                    registry.record_event(id)?;
                }
                let args = script_args(id, &local, &remote, &event);
                vm.call_named(TRACER_MODULE, event.method(), args)?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl RpcService for TracerService {
    fn svc(&self) -> &'static str {
        TRACER_SVC
    }

    async fn handle(&self, req: &Request) -> Result<Option<Value>> {
        let msg: ConnectionTracerMsg = req.payload()?;

        if req.method == NEW_TRACER_METHOD {
            self.new_tracer(msg).await?;
            return Ok(None);
        }

        let event = TracerEvent::from_msg(&req.method, &msg)?;
        let id = msg.tracing_id()?;
        // Present but empty is fine: addresses are unknown until the
        // connection starts.
        let local = require(&msg.local, "local")?.clone();
        let remote = require(&msg.remote, "remote")?.clone();
        self.on_event(id, local, remote, event).await?;
        Ok(None)
    }
}
