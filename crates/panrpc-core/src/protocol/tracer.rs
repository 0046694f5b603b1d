//! Connection Tracer Bridge message shape and event model.
//!
//! Transport-internal values are reduced to scalars/strings before they reach
//! this layer: connection ids are hex strings, packet headers collapse to
//! `(packet_type, packet_number)`, frame lists collapse to frame kind names.
//!
//! Every event maps to exactly one `Tracer.<Event>` method. `TracerEvent` is
//! the single tagged variant used by both the client stub (`write_into`) and
//! the server dispatcher (`from_msg`), so adding an event touches one enum.

use std::fmt::Write as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{PanRpcError, Result};
use crate::protocol::require;

/// Service name on the wire.
pub const TRACER_SVC: &str = "Tracer";

/// Factory method creating a tracer instance.
pub const NEW_TRACER_METHOD: &str = "NewTracerForConnection";

/// Every event method name, in lifecycle order.
pub const EVENT_METHODS: &[&str] = &[
    "StartedConnection",
    "NegotiatedVersion",
    "ClosedConnection",
    "SentTransportParameters",
    "ReceivedTransportParameters",
    "RestoredTransportParameters",
    "SentPacket",
    "ReceivedVersionNegotiationPacket",
    "ReceivedRetry",
    "ReceivedPacket",
    "BufferedPacket",
    "DroppedPacket",
    "UpdatedMetrics",
    "AcknowledgedPacket",
    "LostPacket",
    "UpdatedCongestionState",
    "UpdatedPTOCount",
    "UpdatedKeyFromTLS",
    "UpdatedKey",
    "DroppedEncryptionLevel",
    "DroppedKey",
    "SetLossTimer",
    "LossTimerExpired",
    "LossTimerCanceled",
    "Debug",
    "Close",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Perspective {
    Client,
    Server,
}

impl Perspective {
    pub fn as_str(self) -> &'static str {
        match self {
            Perspective::Client => "client",
            Perspective::Server => "server",
        }
    }
}

/// RTT summary in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RttStats {
    pub latest_rtt_us: u64,
    pub smoothed_rtt_us: u64,
    pub mean_deviation_us: u64,
    pub min_rtt_us: u64,
    pub max_ack_delay_us: u64,
    pub pto_us: u64,
}

impl RttStats {
    pub fn from_durations(
        latest: Duration,
        smoothed: Duration,
        mean_deviation: Duration,
        min: Duration,
        max_ack_delay: Duration,
        pto: Duration,
    ) -> Self {
        Self {
            latest_rtt_us: micros(latest),
            smoothed_rtt_us: micros(smoothed),
            mean_deviation_us: micros(mean_deviation),
            min_rtt_us: micros(min),
            max_ack_delay_us: micros(max_ack_delay),
            pto_us: micros(pto),
        }
    }
}

/// Scalar summary of a transport parameter set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportParameters {
    pub initial_max_data: u64,
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub max_idle_timeout_ms: u64,
    pub max_ack_delay_ms: u64,
    pub ack_delay_exponent: u8,
    pub max_bidi_streams: u64,
    pub max_uni_streams: u64,
    pub max_udp_payload_size: u64,
    pub disable_active_migration: bool,
    pub active_connection_id_limit: u64,
    /// Zero when the peer does not support datagrams.
    pub max_datagram_frame_size: u64,
    /// Hex, servers only.
    pub stateless_reset_token: Option<String>,
    pub original_dest_conn_id: Option<String>,
    pub initial_src_conn_id: Option<String>,
    pub retry_src_conn_id: Option<String>,
}

/// Header reduced to what policy scripts consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketSummary {
    pub packet_type: String,
    pub packet_number: i64,
}

impl PacketSummary {
    pub fn new(packet_type: impl Into<String>, packet_number: i64) -> Self {
        Self {
            packet_type: packet_type.into(),
            packet_number,
        }
    }
}

/// Generic message for every `Tracer.*` method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionTracerMsg {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracing_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perspective: Option<Perspective>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub odcid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_conn_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_conn_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_versions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_versions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<TransportParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_ack: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt_stats: Option<RttStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwnd: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_in_flight: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packets_in_flight: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub congestion_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pto_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_key: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_unix_micros: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_msg: Option<String>,
}

impl ConnectionTracerMsg {
    /// Routing header carried by every event.
    pub fn for_event(tracing_id: u64, local: &str, remote: &str) -> Self {
        Self {
            tracing_id: Some(tracing_id),
            local: Some(local.to_string()),
            remote: Some(remote.to_string()),
            ..Self::default()
        }
    }

    pub fn tracing_id(&self) -> Result<u64> {
        require(&self.tracing_id, "tracing_id").copied()
    }
}

/// One connection-lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum TracerEvent {
    StartedConnection {
        local: String,
        remote: String,
        src_conn_id: String,
        dest_conn_id: String,
    },
    NegotiatedVersion {
        chosen: String,
        client_versions: Vec<String>,
        server_versions: Vec<String>,
    },
    ClosedConnection {
        error: Option<String>,
    },
    SentTransportParameters(TransportParameters),
    ReceivedTransportParameters(TransportParameters),
    RestoredTransportParameters(TransportParameters),
    SentPacket {
        packet: PacketSummary,
        size: u64,
        has_ack: bool,
        frames: Vec<String>,
    },
    ReceivedVersionNegotiationPacket {
        versions: Vec<String>,
    },
    ReceivedRetry {
        src_conn_id: String,
    },
    ReceivedPacket {
        packet: PacketSummary,
        size: u64,
        frames: Vec<String>,
    },
    BufferedPacket {
        packet_type: String,
    },
    DroppedPacket {
        packet_type: String,
        size: u64,
        reason: String,
    },
    UpdatedMetrics {
        rtt: RttStats,
        cwnd: u64,
        bytes_in_flight: u64,
        packets_in_flight: u64,
    },
    AcknowledgedPacket {
        encryption_level: String,
        packet_number: i64,
    },
    LostPacket {
        encryption_level: String,
        packet_number: i64,
        reason: String,
    },
    UpdatedCongestionState {
        state: String,
    },
    UpdatedPtoCount {
        value: u32,
    },
    UpdatedKeyFromTls {
        encryption_level: String,
        perspective: Perspective,
    },
    UpdatedKey {
        generation: u64,
        remote: bool,
    },
    DroppedEncryptionLevel {
        encryption_level: String,
    },
    DroppedKey {
        generation: u64,
    },
    SetLossTimer {
        timer_type: String,
        encryption_level: String,
        deadline: SystemTime,
    },
    LossTimerExpired {
        timer_type: String,
        encryption_level: String,
    },
    LossTimerCanceled,
    Debug {
        name: String,
        msg: String,
    },
    Close,
}

impl TracerEvent {
    /// Wire method and script entry point name.
    pub fn method(&self) -> &'static str {
        match self {
            TracerEvent::StartedConnection { .. } => "StartedConnection",
            TracerEvent::NegotiatedVersion { .. } => "NegotiatedVersion",
            TracerEvent::ClosedConnection { .. } => "ClosedConnection",
            TracerEvent::SentTransportParameters(_) => "SentTransportParameters",
            TracerEvent::ReceivedTransportParameters(_) => "ReceivedTransportParameters",
            TracerEvent::RestoredTransportParameters(_) => "RestoredTransportParameters",
            TracerEvent::SentPacket { .. } => "SentPacket",
            TracerEvent::ReceivedVersionNegotiationPacket { .. } => {
                "ReceivedVersionNegotiationPacket"
            }
            TracerEvent::ReceivedRetry { .. } => "ReceivedRetry",
            TracerEvent::ReceivedPacket { .. } => "ReceivedPacket",
            TracerEvent::BufferedPacket { .. } => "BufferedPacket",
            TracerEvent::DroppedPacket { .. } => "DroppedPacket",
            TracerEvent::UpdatedMetrics { .. } => "UpdatedMetrics",
            TracerEvent::AcknowledgedPacket { .. } => "AcknowledgedPacket",
            TracerEvent::LostPacket { .. } => "LostPacket",
            TracerEvent::UpdatedCongestionState { .. } => "UpdatedCongestionState",
            TracerEvent::UpdatedPtoCount { .. } => "UpdatedPTOCount",
            TracerEvent::UpdatedKeyFromTls { .. } => "UpdatedKeyFromTLS",
            TracerEvent::UpdatedKey { .. } => "UpdatedKey",
            TracerEvent::DroppedEncryptionLevel { .. } => "DroppedEncryptionLevel",
            TracerEvent::DroppedKey { .. } => "DroppedKey",
            TracerEvent::SetLossTimer { .. } => "SetLossTimer",
            TracerEvent::LossTimerExpired { .. } => "LossTimerExpired",
            TracerEvent::LossTimerCanceled => "LossTimerCanceled",
            TracerEvent::Debug { .. } => "Debug",
            TracerEvent::Close => "Close",
        }
    }

    /// Copy the event scalars into a message that already carries the
    /// routing header.
    pub fn write_into(&self, msg: &mut ConnectionTracerMsg) {
        match self {
            TracerEvent::StartedConnection {
                local,
                remote,
                src_conn_id,
                dest_conn_id,
            } => {
                msg.local = Some(local.clone());
                msg.remote = Some(remote.clone());
                msg.src_conn_id = Some(src_conn_id.clone());
                msg.dest_conn_id = Some(dest_conn_id.clone());
            }
            TracerEvent::NegotiatedVersion {
                chosen,
                client_versions,
                server_versions,
            } => {
                msg.chosen = Some(chosen.clone());
                msg.client_versions = Some(client_versions.clone());
                msg.server_versions = Some(server_versions.clone());
            }
            TracerEvent::ClosedConnection { error } => {
                msg.error_msg = error.clone();
            }
            TracerEvent::SentTransportParameters(p)
            | TracerEvent::ReceivedTransportParameters(p)
            | TracerEvent::RestoredTransportParameters(p) => {
                msg.parameters = Some(p.clone());
            }
            TracerEvent::SentPacket {
                packet,
                size,
                has_ack,
                frames,
            } => {
                write_packet(msg, packet);
                msg.byte_count = Some(*size);
                msg.has_ack = Some(*has_ack);
                msg.frames = Some(frames.clone());
            }
            TracerEvent::ReceivedVersionNegotiationPacket { versions } => {
                msg.versions = Some(versions.clone());
            }
            TracerEvent::ReceivedRetry { src_conn_id } => {
                msg.src_conn_id = Some(src_conn_id.clone());
            }
            TracerEvent::ReceivedPacket {
                packet,
                size,
                frames,
            } => {
                write_packet(msg, packet);
                msg.byte_count = Some(*size);
                msg.frames = Some(frames.clone());
            }
            TracerEvent::BufferedPacket { packet_type } => {
                msg.packet_type = Some(packet_type.clone());
            }
            TracerEvent::DroppedPacket {
                packet_type,
                size,
                reason,
            } => {
                msg.packet_type = Some(packet_type.clone());
                msg.byte_count = Some(*size);
                msg.reason = Some(reason.clone());
            }
            TracerEvent::UpdatedMetrics {
                rtt,
                cwnd,
                bytes_in_flight,
                packets_in_flight,
            } => {
                msg.rtt_stats = Some(*rtt);
                msg.cwnd = Some(*cwnd);
                msg.bytes_in_flight = Some(*bytes_in_flight);
                msg.packets_in_flight = Some(*packets_in_flight);
            }
            TracerEvent::AcknowledgedPacket {
                encryption_level,
                packet_number,
            } => {
                msg.encryption_level = Some(encryption_level.clone());
                msg.packet_number = Some(*packet_number);
            }
            TracerEvent::LostPacket {
                encryption_level,
                packet_number,
                reason,
            } => {
                msg.encryption_level = Some(encryption_level.clone());
                msg.packet_number = Some(*packet_number);
                msg.reason = Some(reason.clone());
            }
            TracerEvent::UpdatedCongestionState { state } => {
                msg.congestion_state = Some(state.clone());
            }
            TracerEvent::UpdatedPtoCount { value } => {
                msg.pto_count = Some(*value);
            }
            TracerEvent::UpdatedKeyFromTls {
                encryption_level,
                perspective,
            } => {
                msg.encryption_level = Some(encryption_level.clone());
                msg.perspective = Some(*perspective);
            }
            TracerEvent::UpdatedKey { generation, remote } => {
                msg.generation = Some(*generation);
                msg.remote_key = Some(*remote);
            }
            TracerEvent::DroppedEncryptionLevel { encryption_level } => {
                msg.encryption_level = Some(encryption_level.clone());
            }
            TracerEvent::DroppedKey { generation } => {
                msg.generation = Some(*generation);
            }
            TracerEvent::SetLossTimer {
                timer_type,
                encryption_level,
                deadline,
            } => {
                msg.timer_type = Some(timer_type.clone());
                msg.encryption_level = Some(encryption_level.clone());
                msg.time_unix_micros = Some(unix_micros(*deadline));
            }
            TracerEvent::LossTimerExpired {
                timer_type,
                encryption_level,
            } => {
                msg.timer_type = Some(timer_type.clone());
                msg.encryption_level = Some(encryption_level.clone());
            }
            TracerEvent::LossTimerCanceled | TracerEvent::Close => {}
            TracerEvent::Debug { name, msg: text } => {
                msg.debug_name = Some(name.clone());
                msg.debug_msg = Some(text.clone());
            }
        }
    }

    /// Rebuild the event named by `method` from a received message.
    ///
    /// Every scalar the event needs must be present; absence is a
    /// `MissingField` error raised before policy is consulted.
    pub fn from_msg(method: &str, msg: &ConnectionTracerMsg) -> Result<Self> {
        let ev = match method {
            "StartedConnection" => TracerEvent::StartedConnection {
                local: string(&msg.local, "local")?,
                remote: string(&msg.remote, "remote")?,
                src_conn_id: string(&msg.src_conn_id, "src_conn_id")?,
                dest_conn_id: string(&msg.dest_conn_id, "dest_conn_id")?,
            },
            "NegotiatedVersion" => TracerEvent::NegotiatedVersion {
                chosen: string(&msg.chosen, "chosen")?,
                client_versions: msg.client_versions.clone().unwrap_or_default(),
                server_versions: msg.server_versions.clone().unwrap_or_default(),
            },
            "ClosedConnection" => TracerEvent::ClosedConnection {
                error: msg.error_msg.clone(),
            },
            "SentTransportParameters" => {
                TracerEvent::SentTransportParameters(params(msg)?)
            }
            "ReceivedTransportParameters" => {
                TracerEvent::ReceivedTransportParameters(params(msg)?)
            }
            "RestoredTransportParameters" => {
                TracerEvent::RestoredTransportParameters(params(msg)?)
            }
            "SentPacket" => TracerEvent::SentPacket {
                packet: packet(msg)?,
                size: *require(&msg.byte_count, "byte_count")?,
                has_ack: msg.has_ack.unwrap_or(false),
                frames: msg.frames.clone().unwrap_or_default(),
            },
            "ReceivedVersionNegotiationPacket" => TracerEvent::ReceivedVersionNegotiationPacket {
                versions: msg.versions.clone().unwrap_or_default(),
            },
            "ReceivedRetry" => TracerEvent::ReceivedRetry {
                src_conn_id: string(&msg.src_conn_id, "src_conn_id")?,
            },
            "ReceivedPacket" => TracerEvent::ReceivedPacket {
                packet: packet(msg)?,
                size: *require(&msg.byte_count, "byte_count")?,
                frames: msg.frames.clone().unwrap_or_default(),
            },
            "BufferedPacket" => TracerEvent::BufferedPacket {
                packet_type: string(&msg.packet_type, "packet_type")?,
            },
            "DroppedPacket" => TracerEvent::DroppedPacket {
                packet_type: string(&msg.packet_type, "packet_type")?,
                size: *require(&msg.byte_count, "byte_count")?,
                reason: string(&msg.reason, "reason")?,
            },
            "UpdatedMetrics" => TracerEvent::UpdatedMetrics {
                rtt: *require(&msg.rtt_stats, "rtt_stats")?,
                cwnd: *require(&msg.cwnd, "cwnd")?,
                bytes_in_flight: *require(&msg.bytes_in_flight, "bytes_in_flight")?,
                packets_in_flight: *require(&msg.packets_in_flight, "packets_in_flight")?,
            },
            "AcknowledgedPacket" => TracerEvent::AcknowledgedPacket {
                encryption_level: string(&msg.encryption_level, "encryption_level")?,
                packet_number: *require(&msg.packet_number, "packet_number")?,
            },
            "LostPacket" => TracerEvent::LostPacket {
                encryption_level: string(&msg.encryption_level, "encryption_level")?,
                packet_number: *require(&msg.packet_number, "packet_number")?,
                reason: string(&msg.reason, "reason")?,
            },
            "UpdatedCongestionState" => TracerEvent::UpdatedCongestionState {
                state: string(&msg.congestion_state, "congestion_state")?,
            },
            "UpdatedPTOCount" => TracerEvent::UpdatedPtoCount {
                value: *require(&msg.pto_count, "pto_count")?,
            },
            "UpdatedKeyFromTLS" => TracerEvent::UpdatedKeyFromTls {
                encryption_level: string(&msg.encryption_level, "encryption_level")?,
                perspective: *require(&msg.perspective, "perspective")?,
            },
            "UpdatedKey" => TracerEvent::UpdatedKey {
                generation: *require(&msg.generation, "generation")?,
                remote: msg.remote_key.unwrap_or(false),
            },
            "DroppedEncryptionLevel" => TracerEvent::DroppedEncryptionLevel {
                encryption_level: string(&msg.encryption_level, "encryption_level")?,
            },
            "DroppedKey" => TracerEvent::DroppedKey {
                generation: *require(&msg.generation, "generation")?,
            },
            "SetLossTimer" => TracerEvent::SetLossTimer {
                timer_type: string(&msg.timer_type, "timer_type")?,
                encryption_level: string(&msg.encryption_level, "encryption_level")?,
                deadline: from_unix_micros(*require(&msg.time_unix_micros, "time_unix_micros")?),
            },
            "LossTimerExpired" => TracerEvent::LossTimerExpired {
                timer_type: string(&msg.timer_type, "timer_type")?,
                encryption_level: string(&msg.encryption_level, "encryption_level")?,
            },
            "LossTimerCanceled" => TracerEvent::LossTimerCanceled,
            "Debug" => TracerEvent::Debug {
                name: string(&msg.debug_name, "debug_name")?,
                msg: msg.debug_msg.clone().unwrap_or_default(),
            },
            "Close" => TracerEvent::Close,
            other => {
                return Err(PanRpcError::UnknownMethod(format!("{TRACER_SVC}.{other}")));
            }
        };
        Ok(ev)
    }
}

/// Lowercase hex form of a raw connection id.
pub fn connection_id_hex(id: &[u8]) -> String {
    let mut out = String::with_capacity(id.len() * 2);
    for b in id {
        // Writing into a String cannot fail.
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Microseconds since the Unix epoch; negative before it.
pub fn unix_micros(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_micros()).unwrap_or(i64::MAX),
        Err(e) => i64::try_from(e.duration().as_micros())
            .map(|m| -m)
            .unwrap_or(i64::MIN),
    }
}

pub fn from_unix_micros(us: i64) -> SystemTime {
    let magnitude = Duration::from_micros(us.unsigned_abs());
    let t = if us >= 0 {
        UNIX_EPOCH.checked_add(magnitude)
    } else {
        UNIX_EPOCH.checked_sub(magnitude)
    };
    t.unwrap_or(UNIX_EPOCH)
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

fn string(field: &Option<String>, name: &str) -> Result<String> {
    require(field, name).cloned()
}

fn params(msg: &ConnectionTracerMsg) -> Result<TransportParameters> {
    require(&msg.parameters, "parameters").cloned()
}

fn packet(msg: &ConnectionTracerMsg) -> Result<PacketSummary> {
    Ok(PacketSummary {
        packet_type: string(&msg.packet_type, "packet_type")?,
        packet_number: *require(&msg.packet_number, "packet_number")?,
    })
}

fn write_packet(msg: &mut ConnectionTracerMsg, packet: &PacketSummary) {
    msg.packet_type = Some(packet.packet_type.clone());
    msg.packet_number = Some(packet.packet_number);
}
