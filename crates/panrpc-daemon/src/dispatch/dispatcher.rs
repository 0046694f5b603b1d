use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use panrpc_core::protocol::envelope::Request;
use panrpc_core::{PanRpcError, Result};

/// One bridge's server side. Owns parsing of its own payload shape.
#[async_trait]
pub trait RpcService: Send + Sync {
    fn svc(&self) -> &'static str;

    /// Handle `req.method`. `Ok(None)` is an empty successful response.
    async fn handle(&self, req: &Request) -> Result<Option<Value>>;
}

/// Registry and dispatcher keyed by service name.
#[derive(Default)]
pub struct Dispatcher {
    services: DashMap<&'static str, Arc<dyn RpcService>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    pub fn register(&self, svc: Arc<dyn RpcService>) {
        self.services.insert(svc.svc(), svc);
    }

    pub fn registered_svcs(&self) -> Vec<&'static str> {
        self.services.iter().map(|e| *e.key()).collect()
    }

    pub async fn dispatch(&self, req: &Request) -> Result<Option<Value>> {
        let handler = self
            .services
            .get(req.svc.as_str())
            .ok_or_else(|| PanRpcError::UnknownMethod(format!("{}.{}", req.svc, req.method)))?
            .value()
            .clone();
        handler.handle(req).await
    }
}
