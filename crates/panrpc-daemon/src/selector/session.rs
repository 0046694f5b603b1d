use std::collections::{BTreeMap, HashMap};

use dashmap::DashMap;

use panrpc_core::{Path, PathFingerprint};

/// State of one (local, remote) pair.
#[derive(Debug, Default)]
pub struct Session {
    pub preferences: BTreeMap<String, String>,
    paths: HashMap<PathFingerprint, Path>,
}

impl Session {
    pub fn new(preferences: BTreeMap<String, String>, paths: Vec<Path>) -> Self {
        let mut s = Self {
            preferences,
            paths: HashMap::new(),
        };
        s.rebuild(paths);
        s
    }

    /// Replace the fingerprint table wholesale.
    pub fn rebuild(&mut self, paths: Vec<Path>) {
        self.paths = paths
            .into_iter()
            .map(|p| (p.fingerprint.clone(), p))
            .collect();
    }

    pub fn resolve(&self, fp: &PathFingerprint) -> Option<&Path> {
        self.paths.get(fp)
    }

    pub fn evict(&mut self, fp: &PathFingerprint) -> Option<Path> {
        self.paths.remove(fp)
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }
}

/// All sessions of the daemon, keyed by `session_key(local, remote)`.
///
/// Membership changes happen while the caller holds the policy engine lock,
/// so the table and the script never disagree about which sessions exist.
#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<String, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Create or reset a session.
    pub fn install(&self, key: String, preferences: BTreeMap<String, String>, paths: Vec<Path>) {
        self.sessions.insert(key, Session::new(preferences, paths));
    }

    /// Rebuild the candidate table, creating the session if needed.
    pub fn refresh(&self, key: String, paths: Vec<Path>) {
        self.sessions.entry(key).or_default().rebuild(paths);
    }

    /// Last writer wins. Creates the session if needed.
    pub fn set_preferences(&self, key: String, preferences: BTreeMap<String, String>) {
        self.sessions.entry(key).or_default().preferences = preferences;
    }

    /// Drop one fingerprint. Returns whether it was present.
    pub fn evict(&self, key: &str, fp: &PathFingerprint) -> bool {
        self.sessions
            .get_mut(key)
            .and_then(|mut s| s.evict(fp))
            .is_some()
    }

    pub fn resolve(&self, key: &str, fp: &PathFingerprint) -> Option<Path> {
        self.sessions.get(key)?.resolve(fp).cloned()
    }

    pub fn preferences(&self, key: &str) -> Option<BTreeMap<String, String>> {
        self.sessions.get(key).map(|s| s.preferences.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Session> {
        self.sessions.remove(key).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
