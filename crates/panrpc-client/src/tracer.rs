//! Best-effort connection telemetry.
//!
//! Nothing here returns an error to the traced connection: failures are
//! logged at `warn` and dropped.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use panrpc_core::protocol::tracer::{
    connection_id_hex, ConnectionTracerMsg, Perspective, TracerEvent, NEW_TRACER_METHOD,
    TRACER_SVC,
};

use crate::rpc::RpcClient;

/// Per-connection telemetry sink.
#[async_trait]
pub trait ConnectionTracer: Send + Sync {
    async fn trace(&self, event: TracerEvent);
}

/// Factory for per-connection tracers.
#[derive(Clone)]
pub struct TracerClient {
    rpc: RpcClient,
}

impl TracerClient {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    /// Register a tracer for one connection. Never fails: if the daemon
    /// rejects the registration, the returned tracer is disabled and skips
    /// every event.
    pub async fn tracer_for_connection(
        &self,
        tracing_id: u64,
        perspective: Perspective,
        odcid: &[u8],
    ) -> ConnectionTracerClient {
        let msg = ConnectionTracerMsg {
            tracing_id: Some(tracing_id),
            perspective: Some(perspective),
            odcid: Some(connection_id_hex(odcid)),
            ..ConnectionTracerMsg::default()
        };

        let enabled = match self.rpc.call_raw(TRACER_SVC, NEW_TRACER_METHOD, &msg).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(tracing_id, error = %e, "tracer registration failed, telemetry disabled");
                false
            }
        };

        ConnectionTracerClient {
            rpc: self.rpc.clone(),
            tracing_id,
            enabled,
            addrs: Mutex::new((String::new(), String::new())),
        }
    }
}

pub struct ConnectionTracerClient {
    rpc: RpcClient,
    tracing_id: u64,
    enabled: bool,
    /// (local, remote), learned from `StartedConnection`.
    addrs: Mutex<(String, String)>,
}

impl ConnectionTracerClient {
    pub fn tracing_id(&self) -> u64 {
        self.tracing_id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn message(&self, event: &TracerEvent) -> ConnectionTracerMsg {
        let mut addrs = self.addrs.lock().unwrap_or_else(PoisonError::into_inner);
        if let TracerEvent::StartedConnection { local, remote, .. } = event {
            *addrs = (local.clone(), remote.clone());
        }
        let mut msg = ConnectionTracerMsg::for_event(self.tracing_id, &addrs.0, &addrs.1);
        event.write_into(&mut msg);
        msg
    }
}

#[async_trait]
impl ConnectionTracer for ConnectionTracerClient {
    async fn trace(&self, event: TracerEvent) {
        if !self.enabled {
            return;
        }
        let msg = self.message(&event);
        if let Err(e) = self.rpc.call_raw(TRACER_SVC, event.method(), &msg).await {
            tracing::warn!(
                tracing_id = self.tracing_id,
                event = event.method(),
                error = %e,
                "telemetry dropped"
            );
        }
    }
}
