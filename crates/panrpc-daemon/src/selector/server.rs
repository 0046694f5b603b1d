//! `Selector.*` handling.
//!
//! Required fields are checked before the engine is touched, so a malformed
//! request is a protocol error and never reaches the script. Each operation
//! updates the session table and calls the script inside one engine lock
//! scope.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use panrpc_core::codec::{decode_wire, encode_script_interface, encode_script_paths, WirePath};
use panrpc_core::protocol::envelope::Request;
use panrpc_core::protocol::require;
use panrpc_core::protocol::selector::{session_key, SelectorMethod, SelectorMsg, SELECTOR_SVC};
use panrpc_core::{PanRpcError, Path, PathFingerprint, Result, ScriptValue};

use crate::dispatch::RpcService;
use crate::policy::PolicyEngine;

use super::session::SessionTable;
use super::SELECTOR_MODULE;

pub struct SelectorService {
    engine: PolicyEngine,
    sessions: Arc<SessionTable>,
}

impl SelectorService {
    pub fn new(engine: PolicyEngine) -> Self {
        Self {
            engine,
            sessions: Arc::new(SessionTable::new()),
        }
    }

    pub fn sessions(&self) -> Arc<SessionTable> {
        Arc::clone(&self.sessions)
    }

    pub async fn initialize(&self, msg: SelectorMsg) -> Result<()> {
        let (local, remote) = owned_pair(&msg)?;
        let prefs = msg.preferences.unwrap_or_default();
        let paths = decode_paths(msg.paths)?;
        let sessions = self.sessions();

        self.engine
            .run(move |vm| {
                let args = vec![
                    ScriptValue::from(&prefs),
                    ScriptValue::from(local.as_str()),
                    ScriptValue::from(remote.as_str()),
                    encode_script_paths(&paths),
                ];
                sessions.install(session_key(&local, &remote), prefs, paths);
                vm.call_named(SELECTOR_MODULE, "Initialize", args)?;
                Ok(())
            })
            .await
    }

    pub async fn set_preferences(&self, msg: SelectorMsg) -> Result<()> {
        let (local, remote) = owned_pair(&msg)?;
        let prefs = msg.preferences.unwrap_or_default();
        let sessions = self.sessions();

        self.engine
            .run(move |vm| {
                let args = vec![
                    ScriptValue::from(&prefs),
                    ScriptValue::from(local.as_str()),
                    ScriptValue::from(remote.as_str()),
                ];
                sessions.set_preferences(session_key(&local, &remote), prefs);
                vm.call_named(SELECTOR_MODULE, "SetPreferences", args)?;
                Ok(())
            })
            .await
    }

    /// Current selection. `None` when the pair has no session, the script
    /// selects nothing, or the selected fingerprint is not a live candidate.
    pub async fn path(&self, msg: SelectorMsg) -> Result<Option<PathFingerprint>> {
        let (local, remote) = owned_pair(&msg)?;
        let sessions = self.sessions();

        self.engine
            .run(move |vm| {
                let key = session_key(&local, &remote);
                if !sessions.contains(&key) {
                    tracing::debug!(%local, %remote, "Path for unknown session");
                    return Ok(None);
                }

                let results = vm.call_named(
                    SELECTOR_MODULE,
                    "Path",
                    vec![ScriptValue::from(local.as_str()), ScriptValue::from(remote.as_str())],
                )?;
                let Some(fp) = selected_fingerprint(results.first())? else {
                    return Ok(None);
                };

                if sessions.resolve(&key, &fp).is_none() {
                    tracing::warn!(%local, %remote, fingerprint = %fp, "policy selected an unknown path");
                    return Ok(None);
                }
                Ok(Some(fp))
            })
            .await
    }

    pub async fn path_down(&self, msg: SelectorMsg) -> Result<()> {
        let (local, remote) = owned_pair(&msg)?;
        let fp = require(&msg.fingerprint, "fingerprint")?.clone();
        let intf = require(&msg.path_interface, "path_interface")?.clone();
        let sessions = self.sessions();

        self.engine
            .run(move |vm| {
                sessions.evict(&session_key(&local, &remote), &fp);
                let args = vec![
                    ScriptValue::from(local.as_str()),
                    ScriptValue::from(remote.as_str()),
                    ScriptValue::from(fp.as_str()),
                    encode_script_interface(&intf),
                ];
                vm.call_named(SELECTOR_MODULE, "PathDown", args)?;
                Ok(())
            })
            .await
    }

    pub async fn refresh(&self, msg: SelectorMsg) -> Result<()> {
        let (local, remote) = owned_pair(&msg)?;
        let paths = decode_paths(msg.paths)?;
        let sessions = self.sessions();

        self.engine
            .run(move |vm| {
                let args = vec![
                    ScriptValue::from(local.as_str()),
                    ScriptValue::from(remote.as_str()),
                    encode_script_paths(&paths),
                ];
                sessions.refresh(session_key(&local, &remote), paths);
                vm.call_named(SELECTOR_MODULE, "Refresh", args)?;
                Ok(())
            })
            .await
    }

    /// Idempotent: closing an unknown pair succeeds without calling the
    /// script.
    pub async fn close(&self, msg: SelectorMsg) -> Result<()> {
        let (local, remote) = owned_pair(&msg)?;
        let sessions = self.sessions();

        self.engine
            .run(move |vm| {
                if sessions.remove(&session_key(&local, &remote)).is_none() {
                    tracing::debug!(%local, %remote, "Close for unknown session");
                    return Ok(());
                }
                vm.call_named(
                    SELECTOR_MODULE,
                    "Close",
                    vec![ScriptValue::from(local.as_str()), ScriptValue::from(remote.as_str())],
                )?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl RpcService for SelectorService {
    fn svc(&self) -> &'static str {
        SELECTOR_SVC
    }

    async fn handle(&self, req: &Request) -> Result<Option<Value>> {
        let method: SelectorMethod = req.method.parse()?;
        let msg: SelectorMsg = req.payload()?;

        match method {
            SelectorMethod::Initialize => self.initialize(msg).await?,
            SelectorMethod::SetPreferences => self.set_preferences(msg).await?,
            SelectorMethod::Path => {
                let reply = SelectorMsg {
                    fingerprint: self.path(msg).await?,
                    ..SelectorMsg::default()
                };
                let data = serde_json::to_value(reply)
                    .map_err(|e| PanRpcError::Internal(format!("encode Path reply: {e}")))?;
                return Ok(Some(data));
            }
            SelectorMethod::PathDown => self.path_down(msg).await?,
            SelectorMethod::Refresh => self.refresh(msg).await?,
            SelectorMethod::Close => self.close(msg).await?,
        }
        Ok(None)
    }
}

fn owned_pair(msg: &SelectorMsg) -> Result<(String, String)> {
    let (local, remote) = msg.pair()?;
    Ok((local.to_string(), remote.to_string()))
}

fn decode_paths(paths: Option<Vec<WirePath>>) -> Result<Vec<Path>> {
    paths.unwrap_or_default().iter().map(decode_wire).collect()
}

/// Interpret the script's `Path` result: `nil`, a fingerprint string, or a
/// path table carrying `Fingerprint`.
fn selected_fingerprint(result: Option<&ScriptValue>) -> Result<Option<PathFingerprint>> {
    match result {
        None | Some(ScriptValue::Nil) => Ok(None),
        Some(ScriptValue::String(s)) => Ok(Some(PathFingerprint::new(s.as_str()))),
        Some(ScriptValue::Table(t)) => match t.get("Fingerprint") {
            Some(ScriptValue::String(s)) => Ok(Some(PathFingerprint::new(s.as_str()))),
            None | Some(ScriptValue::Nil) => Ok(None),
            Some(other) => Err(PanRpcError::Policy(format!(
                "Path result Fingerprint must be a string, got {}",
                other.type_name()
            ))),
        },
        Some(other) => Err(PanRpcError::Policy(format!(
            "Path must return nil, a fingerprint, or a path table, got {}",
            other.type_name()
        ))),
    }
}
