//! Path selection backed by the daemon.
//!
//! A `SelectorClient` serves one connection. It keeps its own
//! fingerprint→Path table so the daemon only ever answers with a
//! fingerprint, plus the last known-good selection to fall back on when the
//! daemon fails.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use panrpc_core::codec::encode_wire;
use panrpc_core::protocol::selector::{SelectorMethod, SelectorMsg, SELECTOR_SVC};
use panrpc_core::{Path, PathFingerprint, PathInterface, Result};

use crate::rpc::RpcClient;

/// Path-selection capability, as consumed by a path-aware connection.
#[async_trait]
pub trait PathSelector: Send + Sync {
    /// Start (or restart) selection for a resolved address pair. Preferences
    /// set earlier are sent along.
    async fn initialize(&self, local: &str, remote: &str, paths: Vec<Path>) -> Result<()>;

    /// Update preferences. Before `initialize` they are only cached.
    async fn set_preferences(&self, preferences: BTreeMap<String, String>) -> Result<()>;

    /// Current selection; `None` when nothing is selected or the daemon is
    /// unreachable and no earlier selection is still valid.
    async fn path(&self) -> Option<Path>;

    async fn path_down(&self, fingerprint: &PathFingerprint, intf: &PathInterface) -> Result<()>;

    async fn refresh(&self, paths: Vec<Path>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[derive(Default)]
struct State {
    pair: Option<(String, String)>,
    preferences: BTreeMap<String, String>,
    paths: HashMap<PathFingerprint, Path>,
    last_good: Option<PathFingerprint>,
}

impl State {
    fn rebuild(&mut self, paths: &[Path]) {
        self.paths = paths
            .iter()
            .map(|p| (p.fingerprint.clone(), p.clone()))
            .collect();
        if let Some(fp) = &self.last_good {
            if !self.paths.contains_key(fp) {
                self.last_good = None;
            }
        }
    }

    fn pair_msg(&self) -> Option<SelectorMsg> {
        let (local, remote) = self.pair.as_ref()?;
        Some(SelectorMsg::for_pair(local, remote))
    }

    fn fallback(&self) -> Option<Path> {
        self.paths.get(self.last_good.as_ref()?).cloned()
    }
}

pub struct SelectorClient {
    rpc: RpcClient,
    state: Mutex<State>,
}

impl SelectorClient {
    pub fn new(rpc: RpcClient) -> Self {
        Self {
            rpc,
            state: Mutex::new(State::default()),
        }
    }

    /// The state lock is never held across an await; a poisoned lock only
    /// means a panic elsewhere, and the data is still usable.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Preferences that will be (or were) sent to the daemon.
    pub fn preferences(&self) -> BTreeMap<String, String> {
        self.state().preferences.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.state().pair.is_some()
    }

    /// The last path the daemon selected that is still a candidate; what
    /// `path()` falls back to when the daemon cannot answer.
    pub fn last_path(&self) -> Option<Path> {
        self.state().fallback()
    }

    async fn send(&self, method: SelectorMethod, msg: &SelectorMsg) -> Result<SelectorMsg> {
        self.rpc.call(SELECTOR_SVC, method.as_str(), msg).await
    }

    /// Raw selection result without fallback.
    pub async fn try_path(&self) -> Result<Option<Path>> {
        let Some(msg) = self.state().pair_msg() else {
            return Ok(None);
        };
        let reply = self.send(SelectorMethod::Path, &msg).await?;

        let mut st = self.state();
        let Some(fp) = reply.fingerprint else {
            return Ok(None);
        };
        match st.paths.get(&fp).cloned() {
            Some(p) => {
                st.last_good = Some(fp);
                Ok(Some(p))
            }
            None => {
                tracing::warn!(fingerprint = %fp, "daemon selected a path this client does not know");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl PathSelector for SelectorClient {
    async fn initialize(&self, local: &str, remote: &str, paths: Vec<Path>) -> Result<()> {
        let msg = {
            let mut st = self.state();
            st.pair = Some((local.to_string(), remote.to_string()));
            st.last_good = None;
            st.rebuild(&paths);
            SelectorMsg {
                preferences: Some(st.preferences.clone()),
                paths: Some(paths.iter().map(encode_wire).collect()),
                ..SelectorMsg::for_pair(local, remote)
            }
        };
        self.send(SelectorMethod::Initialize, &msg).await?;
        Ok(())
    }

    async fn set_preferences(&self, preferences: BTreeMap<String, String>) -> Result<()> {
        let msg = {
            let mut st = self.state();
            st.preferences = preferences.clone();
            match st.pair_msg() {
                Some(m) => SelectorMsg {
                    preferences: Some(preferences),
                    ..m
                },
                None => return Ok(()),
            }
        };
        self.send(SelectorMethod::SetPreferences, &msg).await?;
        Ok(())
    }

    async fn path(&self) -> Option<Path> {
        match self.try_path().await {
            Ok(p) => p,
            Err(e) => {
                let fallback = self.last_path();
                tracing::warn!(error = %e, fallback = fallback.is_some(), "path selection failed");
                fallback
            }
        }
    }

    async fn path_down(&self, fingerprint: &PathFingerprint, intf: &PathInterface) -> Result<()> {
        let msg = {
            let mut st = self.state();
            st.paths.remove(fingerprint);
            if st.last_good.as_ref() == Some(fingerprint) {
                st.last_good = None;
            }
            match st.pair_msg() {
                Some(m) => SelectorMsg {
                    fingerprint: Some(fingerprint.clone()),
                    path_interface: Some(intf.clone()),
                    ..m
                },
                None => return Ok(()),
            }
        };
        self.send(SelectorMethod::PathDown, &msg).await?;
        Ok(())
    }

    async fn refresh(&self, paths: Vec<Path>) -> Result<()> {
        let msg = {
            let mut st = self.state();
            st.rebuild(&paths);
            match st.pair_msg() {
                Some(m) => SelectorMsg {
                    paths: Some(paths.iter().map(encode_wire).collect()),
                    ..m
                },
                None => return Ok(()),
            }
        };
        self.send(SelectorMethod::Refresh, &msg).await?;
        Ok(())
    }

    /// Closing twice, or before `initialize`, is a no-op.
    async fn close(&self) -> Result<()> {
        let msg = {
            let mut st = self.state();
            let msg = st.pair_msg();
            st.pair = None;
            st.paths.clear();
            st.last_good = None;
            msg
        };
        if let Some(msg) = msg {
            self.send(SelectorMethod::Close, &msg).await?;
        }
        Ok(())
    }
}
