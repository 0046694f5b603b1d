//! Selector Bridge message shape.
//!
//! One generic message serves every `Selector.*` method in both directions;
//! each method reads only the fields it needs. Addresses travel as their
//! canonical string form.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::WirePath;
use crate::error::{PanRpcError, Result};
use crate::path::{PathFingerprint, PathInterface};
use crate::protocol::require;

/// Service name on the wire.
pub const SELECTOR_SVC: &str = "Selector";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectorMsg {
    pub local: Option<String>,
    pub remote: Option<String>,
    /// In a `Path` response, absence is the "no path selected" sentinel.
    pub fingerprint: Option<PathFingerprint>,
    pub path_interface: Option<PathInterface>,
    pub preferences: Option<BTreeMap<String, String>>,
    pub paths: Option<Vec<WirePath>>,
}

impl SelectorMsg {
    pub fn for_pair(local: &str, remote: &str) -> Self {
        Self {
            local: Some(local.to_string()),
            remote: Some(remote.to_string()),
            ..Self::default()
        }
    }

    /// Both addresses, or a `MissingField` error naming the first absent one.
    pub fn pair(&self) -> Result<(&str, &str)> {
        Ok((
            require(&self.local, "local")?.as_str(),
            require(&self.remote, "remote")?.as_str(),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorMethod {
    Initialize,
    SetPreferences,
    Path,
    PathDown,
    Refresh,
    Close,
}

impl SelectorMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectorMethod::Initialize => "Initialize",
            SelectorMethod::SetPreferences => "SetPreferences",
            SelectorMethod::Path => "Path",
            SelectorMethod::PathDown => "PathDown",
            SelectorMethod::Refresh => "Refresh",
            SelectorMethod::Close => "Close",
        }
    }
}

impl fmt::Display for SelectorMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectorMethod {
    type Err = PanRpcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Initialize" => Ok(SelectorMethod::Initialize),
            "SetPreferences" => Ok(SelectorMethod::SetPreferences),
            "Path" => Ok(SelectorMethod::Path),
            "PathDown" => Ok(SelectorMethod::PathDown),
            "Refresh" => Ok(SelectorMethod::Refresh),
            "Close" => Ok(SelectorMethod::Close),
            other => Err(PanRpcError::UnknownMethod(format!("{SELECTOR_SVC}.{other}"))),
        }
    }
}

/// Session lookup key for an address pair.
///
/// Keys are built from the canonical string forms only, so two pairs whose
/// strings coincide share one session. Canonical addresses never contain
/// whitespace, which keeps the separator unambiguous for them.
pub fn session_key(local: &str, remote: &str) -> String {
    format!("{local} {remote}")
}
