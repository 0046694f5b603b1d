//! Path Value Codec.
//!
//! Two lossless encodings of `Path`:
//! - wire form (`WirePath`, JSON on the RPC channel);
//! - script form (`ScriptValue::Table`, handed to the policy engine).
//!
//! Absent metadata is explicit in both: `null` on the wire, a missing key in a
//! script table. Empty sequences are always written out, never omitted.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{PanRpcError, Result};
use crate::path::{GeoCoordinates, LinkType, Path, PathFingerprint, PathInterface, PathMetadata};
use crate::value::{ScriptTable, ScriptValue};

/// Path as carried inside `SelectorMsg.paths`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WirePath {
    pub source: String,
    pub destination: String,
    pub metadata: Option<WireMetadata>,
    pub fingerprint: PathFingerprint,
    pub expiry_unix_nanos: u64,
}

/// Metadata wire form. No field has a serde default: an empty sequence must
/// be sent as `[]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireMetadata {
    pub mtu: u16,
    pub interfaces: Vec<PathInterface>,
    pub latency_nanos: Vec<u64>,
    pub bandwidth_kbps: Vec<u64>,
    pub link_type: Vec<u8>,
    pub internal_hops: Vec<u32>,
    pub notes: Vec<String>,
    pub geo: Vec<GeoCoordinates>,
}

// --------------------
// Wire form
// --------------------

pub fn encode_wire(path: &Path) -> WirePath {
    WirePath {
        source: path.source.clone(),
        destination: path.destination.clone(),
        metadata: path.metadata.as_ref().map(encode_wire_metadata),
        fingerprint: path.fingerprint.clone(),
        expiry_unix_nanos: unix_nanos(path.expiry),
    }
}

/// `None` encodes to an explicit absent marker (`null`).
pub fn encode_wire_optional(path: Option<&Path>) -> Option<WirePath> {
    path.map(encode_wire)
}

pub fn decode_wire(wire: &WirePath) -> Result<Path> {
    let metadata = match &wire.metadata {
        Some(m) => Some(decode_wire_metadata(m)?),
        None => None,
    };
    Ok(Path {
        source: wire.source.clone(),
        destination: wire.destination.clone(),
        metadata,
        fingerprint: wire.fingerprint.clone(),
        expiry: from_unix_nanos(wire.expiry_unix_nanos),
    })
}

fn encode_wire_metadata(m: &PathMetadata) -> WireMetadata {
    WireMetadata {
        mtu: m.mtu,
        interfaces: m.interfaces.clone(),
        latency_nanos: m.latency.iter().map(|d| duration_nanos(*d)).collect(),
        bandwidth_kbps: m.bandwidth.clone(),
        link_type: m.link_type.iter().map(|l| l.code()).collect(),
        internal_hops: m.internal_hops.clone(),
        notes: m.notes.clone(),
        geo: m.geo.clone(),
    }
}

fn decode_wire_metadata(m: &WireMetadata) -> Result<PathMetadata> {
    let link_type = m
        .link_type
        .iter()
        .map(|c| {
            LinkType::from_code(*c)
                .ok_or_else(|| PanRpcError::BadRequest(format!("unknown link type code: {c}")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PathMetadata {
        mtu: m.mtu,
        interfaces: m.interfaces.clone(),
        latency: m.latency_nanos.iter().map(|n| Duration::from_nanos(*n)).collect(),
        bandwidth: m.bandwidth_kbps.clone(),
        link_type,
        internal_hops: m.internal_hops.clone(),
        notes: m.notes.clone(),
        geo: m.geo.clone(),
    })
}

// --------------------
// Script form
// --------------------

pub fn encode_script(path: &Path) -> ScriptValue {
    let mut t = ScriptTable::new()
        .with("Source", path.source.as_str())
        .with("Destination", path.destination.as_str())
        .with("Fingerprint", path.fingerprint.as_str())
        .with("Expiry", unix_nanos(path.expiry));
    if let Some(m) = &path.metadata {
        t.set("Metadata", encode_script_metadata(m));
    }
    ScriptValue::Table(t)
}

/// `None` encodes to script `nil`.
pub fn encode_script_optional(path: Option<&Path>) -> ScriptValue {
    path.map(encode_script).unwrap_or(ScriptValue::Nil)
}

/// Sequence table of paths, in candidate order.
pub fn encode_script_paths(paths: &[Path]) -> ScriptValue {
    ScriptValue::Table(ScriptTable::from_sequence(
        paths.iter().map(encode_script).collect(),
    ))
}

pub fn encode_script_interface(intf: &PathInterface) -> ScriptValue {
    ScriptValue::Table(
        ScriptTable::new()
            .with("IA", intf.ia.as_str())
            .with("IfID", intf.if_id),
    )
}

pub fn decode_script(value: &ScriptValue) -> Result<Option<Path>> {
    let t = match value {
        ScriptValue::Nil => return Ok(None),
        ScriptValue::Table(t) => t,
        other => {
            return Err(PanRpcError::Policy(format!(
                "path must be a table, got {}",
                other.type_name()
            )))
        }
    };

    let metadata = match t.get("Metadata") {
        None | Some(ScriptValue::Nil) => None,
        Some(v) => Some(decode_script_metadata(table_of(v, "Metadata")?)?),
    };

    Ok(Some(Path {
        source: field_str(t, "Source")?,
        destination: field_str(t, "Destination")?,
        metadata,
        fingerprint: PathFingerprint::new(field_str(t, "Fingerprint")?),
        expiry: from_unix_nanos(field_uint(t, "Expiry")?),
    }))
}

pub fn decode_script_interface(value: &ScriptValue) -> Result<PathInterface> {
    let t = table_of(value, "interface")?;
    Ok(PathInterface {
        ia: field_str(t, "IA")?,
        if_id: field_uint(t, "IfID")?,
    })
}

fn encode_script_metadata(m: &PathMetadata) -> ScriptTable {
    let geo: Vec<ScriptValue> = m
        .geo
        .iter()
        .map(|g| {
            ScriptValue::Table(
                ScriptTable::new()
                    .with("Latitude", f64::from(g.latitude))
                    .with("Longitude", f64::from(g.longitude))
                    .with("Address", g.address.as_str()),
            )
        })
        .collect();

    ScriptTable::new()
        .with("MTU", u32::from(m.mtu))
        .with(
            "Interfaces",
            ScriptValue::Table(ScriptTable::from_sequence(
                m.interfaces.iter().map(encode_script_interface).collect(),
            )),
        )
        .with(
            "Latency",
            m.latency.iter().map(|d| duration_nanos(*d)).collect::<Vec<_>>(),
        )
        .with("Bandwidth", m.bandwidth.clone())
        .with(
            "LinkType",
            m.link_type.iter().map(|l| u32::from(l.code())).collect::<Vec<_>>(),
        )
        .with("InternalHops", m.internal_hops.clone())
        .with(
            "Notes",
            m.notes.iter().map(String::as_str).collect::<Vec<_>>(),
        )
        .with("Geo", ScriptValue::Table(ScriptTable::from_sequence(geo)))
}

fn decode_script_metadata(t: &ScriptTable) -> Result<PathMetadata> {
    let mtu = u16::try_from(field_int(t, "MTU")?)
        .map_err(|_| PanRpcError::Policy("MTU out of range".into()))?;

    let interfaces = seq_of(t, "Interfaces")?
        .iter()
        .map(decode_script_interface)
        .collect::<Result<Vec<_>>>()?;

    let latency = seq_of(t, "Latency")?
        .iter()
        .map(|v| uint_of(v, "Latency").map(Duration::from_nanos))
        .collect::<Result<Vec<_>>>()?;

    let bandwidth = seq_of(t, "Bandwidth")?
        .iter()
        .map(|v| uint_of(v, "Bandwidth"))
        .collect::<Result<Vec<_>>>()?;

    let link_type = seq_of(t, "LinkType")?
        .iter()
        .map(|v| {
            let code = int_of(v, "LinkType")?;
            u8::try_from(code)
                .ok()
                .and_then(LinkType::from_code)
                .ok_or_else(|| PanRpcError::Policy(format!("unknown link type code: {code}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let internal_hops = seq_of(t, "InternalHops")?
        .iter()
        .map(|v| {
            let n = int_of(v, "InternalHops")?;
            u32::try_from(n).map_err(|_| PanRpcError::Policy("InternalHops out of range".into()))
        })
        .collect::<Result<Vec<_>>>()?;

    let notes = seq_of(t, "Notes")?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| PanRpcError::Policy("Notes entries must be strings".into()))
        })
        .collect::<Result<Vec<_>>>()?;

    let geo = seq_of(t, "Geo")?
        .iter()
        .map(|v| {
            let g = table_of(v, "Geo")?;
            Ok(GeoCoordinates {
                latitude: field_f64(g, "Latitude")? as f32,
                longitude: field_f64(g, "Longitude")? as f32,
                address: field_str(g, "Address")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PathMetadata {
        mtu,
        interfaces,
        latency,
        bandwidth,
        link_type,
        internal_hops,
        notes,
        geo,
    })
}

// --------------------
// helpers
// --------------------

/// Nanoseconds since the Unix epoch. Pre-epoch instants clamp to 0 and
/// instants past `u64::MAX` nanoseconds saturate.
pub fn unix_nanos(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(duration_nanos)
        .unwrap_or(0)
}

pub fn from_unix_nanos(n: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(n)
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn table_of<'a>(v: &'a ScriptValue, name: &str) -> Result<&'a ScriptTable> {
    v.as_table().ok_or_else(|| {
        PanRpcError::Policy(format!("{name} must be a table, got {}", v.type_name()))
    })
}

/// Sequence field; a missing key reads as an empty sequence.
fn seq_of<'a>(t: &'a ScriptTable, name: &str) -> Result<&'a [ScriptValue]> {
    match t.get(name) {
        None | Some(ScriptValue::Nil) => Ok(&[]),
        Some(v) => Ok(&table_of(v, name)?.sequence),
    }
}

fn int_of(v: &ScriptValue, name: &str) -> Result<i64> {
    v.as_i64().ok_or_else(|| {
        PanRpcError::Policy(format!("{name} must be an integer, got {}", v.type_name()))
    })
}

fn field<'a>(t: &'a ScriptTable, name: &str) -> Result<&'a ScriptValue> {
    t.get(name)
        .ok_or_else(|| PanRpcError::Policy(format!("path table missing field {name}")))
}

fn field_str(t: &ScriptTable, name: &str) -> Result<String> {
    let v = field(t, name)?;
    v.as_str().map(str::to_string).ok_or_else(|| {
        PanRpcError::Policy(format!("{name} must be a string, got {}", v.type_name()))
    })
}

fn field_int(t: &ScriptTable, name: &str) -> Result<i64> {
    int_of(field(t, name)?, name)
}

fn uint_of(v: &ScriptValue, name: &str) -> Result<u64> {
    v.as_u64().ok_or_else(|| {
        PanRpcError::Policy(format!(
            "{name} must be a non-negative integer, got {}",
            v.type_name()
        ))
    })
}

fn field_uint(t: &ScriptTable, name: &str) -> Result<u64> {
    uint_of(field(t, name)?, name)
}

fn field_f64(t: &ScriptTable, name: &str) -> Result<f64> {
    let v = field(t, name)?;
    v.as_f64().ok_or_else(|| {
        PanRpcError::Policy(format!("{name} must be a number, got {}", v.type_name()))
    })
}
