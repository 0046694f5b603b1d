//! Path records handed to the policy engine.
//!
//! A `Path` is immutable once built. It only ever crosses the process boundary
//! by value (see `codec`) and is referred to afterwards by its fingerprint.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Opaque, stable identifier of a path within one session's candidate set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathFingerprint(String);

impl PathFingerprint {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PathFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PathFingerprint {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One hop interface: area (ISD-AS) plus interface id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathInterface {
    pub ia: String,
    pub if_id: u64,
}

impl PathInterface {
    pub fn new(ia: impl Into<String>, if_id: u64) -> Self {
        Self { ia: ia.into(), if_id }
    }
}

/// Inter-domain link classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkType {
    #[default]
    Unset,
    Direct,
    MultiHop,
    OpenNet,
}

impl LinkType {
    pub fn code(self) -> u8 {
        match self {
            LinkType::Unset => 0,
            LinkType::Direct => 1,
            LinkType::MultiHop => 2,
            LinkType::OpenNet => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(LinkType::Unset),
            1 => Some(LinkType::Direct),
            2 => Some(LinkType::MultiHop),
            3 => Some(LinkType::OpenNet),
            _ => None,
        }
    }
}

/// Geographic location of a hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoCoordinates {
    pub latitude: f32,
    pub longitude: f32,
    pub address: String,
}

/// Optional per-path metadata. Every sequence is ordered along the path.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PathMetadata {
    pub mtu: u16,
    pub interfaces: Vec<PathInterface>,
    pub latency: Vec<Duration>,
    /// Per-hop bandwidth in Kbit/s.
    pub bandwidth: Vec<u64>,
    pub link_type: Vec<LinkType>,
    pub internal_hops: Vec<u32>,
    pub notes: Vec<String>,
    pub geo: Vec<GeoCoordinates>,
}

/// A candidate network path between two areas.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub source: String,
    pub destination: String,
    pub metadata: Option<PathMetadata>,
    pub fingerprint: PathFingerprint,
    pub expiry: SystemTime,
}

impl Path {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        fingerprint: impl Into<PathFingerprint>,
        expiry: SystemTime,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            metadata: None,
            fingerprint: fingerprint.into(),
            expiry,
        }
    }

    pub fn with_metadata(mut self, metadata: PathMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
