//! Event → script call table.
//!
//! Every event becomes `stats.<Event>(tracingId, local, remote, ...)`; this
//! module only decides the trailing arguments.

use std::time::Duration;

use panrpc_core::protocol::tracer::{unix_micros, RttStats, TracerEvent, TransportParameters};
use panrpc_core::{ScriptTable, ScriptValue};

/// Full argument list for an event call.
pub fn script_args(id: u64, local: &str, remote: &str, event: &TracerEvent) -> Vec<ScriptValue> {
    let mut args = vec![
        ScriptValue::from(id),
        ScriptValue::from(local),
        ScriptValue::from(remote),
    ];
    args.extend(event_args(event));
    args
}

fn event_args(event: &TracerEvent) -> Vec<ScriptValue> {
    match event {
        TracerEvent::StartedConnection {
            src_conn_id,
            dest_conn_id,
            ..
        } => vec![src_conn_id.as_str().into(), dest_conn_id.as_str().into()],
        TracerEvent::NegotiatedVersion {
            chosen,
            client_versions,
            server_versions,
        } => vec![
            chosen.as_str().into(),
            client_versions.clone().into(),
            server_versions.clone().into(),
        ],
        TracerEvent::ClosedConnection { error } => vec![error.clone().into()],
        TracerEvent::SentTransportParameters(p)
        | TracerEvent::ReceivedTransportParameters(p)
        | TracerEvent::RestoredTransportParameters(p) => vec![parameters(p)],
        TracerEvent::SentPacket {
            packet,
            size,
            has_ack,
            frames,
        } => vec![
            packet.packet_type.as_str().into(),
            packet.packet_number.into(),
            (*size).into(),
            (*has_ack).into(),
            frames.clone().into(),
        ],
        TracerEvent::ReceivedVersionNegotiationPacket { versions } => vec![versions.clone().into()],
        TracerEvent::ReceivedRetry { src_conn_id } => vec![src_conn_id.as_str().into()],
        TracerEvent::ReceivedPacket {
            packet,
            size,
            frames,
        } => vec![
            packet.packet_type.as_str().into(),
            packet.packet_number.into(),
            (*size).into(),
            frames.clone().into(),
        ],
        TracerEvent::BufferedPacket { packet_type } => vec![packet_type.as_str().into()],
        TracerEvent::DroppedPacket {
            packet_type,
            size,
            reason,
        } => vec![
            packet_type.as_str().into(),
            (*size).into(),
            reason.as_str().into(),
        ],
        TracerEvent::UpdatedMetrics {
            rtt,
            cwnd,
            bytes_in_flight,
            packets_in_flight,
        } => vec![
            rtt_stats(rtt),
            (*cwnd).into(),
            (*bytes_in_flight).into(),
            (*packets_in_flight).into(),
        ],
        TracerEvent::AcknowledgedPacket {
            encryption_level,
            packet_number,
        } => vec![encryption_level.as_str().into(), (*packet_number).into()],
        TracerEvent::LostPacket {
            encryption_level,
            packet_number,
            reason,
        } => vec![
            encryption_level.as_str().into(),
            (*packet_number).into(),
            reason.as_str().into(),
        ],
        TracerEvent::UpdatedCongestionState { state } => vec![state.as_str().into()],
        TracerEvent::UpdatedPtoCount { value } => vec![(*value).into()],
        TracerEvent::UpdatedKeyFromTls {
            encryption_level,
            perspective,
        } => vec![
            encryption_level.as_str().into(),
            perspective.as_str().into(),
        ],
        TracerEvent::UpdatedKey { generation, remote } => {
            vec![(*generation).into(), (*remote).into()]
        }
        TracerEvent::DroppedEncryptionLevel { encryption_level } => {
            vec![encryption_level.as_str().into()]
        }
        TracerEvent::DroppedKey { generation } => vec![(*generation).into()],
        TracerEvent::SetLossTimer {
            timer_type,
            encryption_level,
            deadline,
        } => vec![
            timer_type.as_str().into(),
            encryption_level.as_str().into(),
            unix_micros(*deadline).into(),
        ],
        TracerEvent::LossTimerExpired {
            timer_type,
            encryption_level,
        } => vec![timer_type.as_str().into(), encryption_level.as_str().into()],
        TracerEvent::Debug { name, msg } => vec![name.as_str().into(), msg.as_str().into()],
        TracerEvent::LossTimerCanceled | TracerEvent::Close => Vec::new(),
    }
}

/// RTT summary in seconds, the unit scripts do arithmetic in.
fn rtt_stats(rtt: &RttStats) -> ScriptValue {
    let secs = |us: u64| Duration::from_micros(us).as_secs_f64();
    ScriptTable::new()
        .with("LatestRTT", secs(rtt.latest_rtt_us))
        .with("SmoothedRTT", secs(rtt.smoothed_rtt_us))
        .with("MeanDeviation", secs(rtt.mean_deviation_us))
        .with("MinRTT", secs(rtt.min_rtt_us))
        .with("MaxAckDelay", secs(rtt.max_ack_delay_us))
        .with("PTO", secs(rtt.pto_us))
        .into()
}

fn parameters(p: &TransportParameters) -> ScriptValue {
    ScriptTable::new()
        .with("InitialMaxData", p.initial_max_data)
        .with(
            "InitialMaxStreamDataBidiLocal",
            p.initial_max_stream_data_bidi_local,
        )
        .with(
            "InitialMaxStreamDataBidiRemote",
            p.initial_max_stream_data_bidi_remote,
        )
        .with("InitialMaxStreamDataUni", p.initial_max_stream_data_uni)
        .with("MaxIdleTimeout", p.max_idle_timeout_ms)
        .with("MaxAckDelay", p.max_ack_delay_ms)
        .with("AckDelayExponent", u32::from(p.ack_delay_exponent))
        .with("MaxBidiStreamNum", p.max_bidi_streams)
        .with("MaxUniStreamNum", p.max_uni_streams)
        .with("MaxUDPPayloadSize", p.max_udp_payload_size)
        .with("DisableActiveMigration", p.disable_active_migration)
        .with("ActiveConnectionIDLimit", p.active_connection_id_limit)
        .with("MaxDatagramFrameSize", p.max_datagram_frame_size)
        .with("StatelessResetToken", p.stateless_reset_token.clone())
        .with("OriginalDestinationConnectionID", p.original_dest_conn_id.clone())
        .with("InitialSourceConnectionID", p.initial_src_conn_id.clone())
        .with("RetrySourceConnectionID", p.retry_src_conn_id.clone())
        .into()
}
