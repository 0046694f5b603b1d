//! Tracer event model: every event survives the generic message shape.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::{Duration, UNIX_EPOCH};

use panrpc_core::protocol::tracer::{
    connection_id_hex, ConnectionTracerMsg, PacketSummary, Perspective, RttStats,
    TracerEvent, TransportParameters, EVENT_METHODS,
};
use panrpc_core::ErrorCode;

fn all_events() -> Vec<TracerEvent> {
    let params = TransportParameters {
        initial_max_data: 1 << 20,
        max_idle_timeout_ms: 30_000,
        ack_delay_exponent: 3,
        max_datagram_frame_size: 1200,
        stateless_reset_token: Some("00112233445566778899aabbccddeeff".into()),
        original_dest_conn_id: Some("0a0b".into()),
        ..TransportParameters::default()
    };
    vec![
        TracerEvent::StartedConnection {
            local: "1-ff00:0:110,[10.0.0.1]:4000".into(),
            remote: "1-ff00:0:112,[10.0.0.2]:443".into(),
            src_conn_id: "01".into(),
            dest_conn_id: "02".into(),
        },
        TracerEvent::NegotiatedVersion {
            chosen: "v1".into(),
            client_versions: vec!["v1".into(), "draft-29".into()],
            server_versions: vec![],
        },
        TracerEvent::ClosedConnection {
            error: Some("idle timeout".into()),
        },
        TracerEvent::SentTransportParameters(params.clone()),
        TracerEvent::ReceivedTransportParameters(params.clone()),
        TracerEvent::RestoredTransportParameters(params),
        TracerEvent::SentPacket {
            packet: PacketSummary::new("1-RTT", 12),
            size: 1200,
            has_ack: true,
            frames: vec!["STREAM".into(), "ACK".into()],
        },
        TracerEvent::ReceivedVersionNegotiationPacket {
            versions: vec!["v1".into()],
        },
        TracerEvent::ReceivedRetry {
            src_conn_id: "beef".into(),
        },
        TracerEvent::ReceivedPacket {
            packet: PacketSummary::new("Handshake", 3),
            size: 600,
            frames: vec!["CRYPTO".into()],
        },
        TracerEvent::BufferedPacket {
            packet_type: "0-RTT".into(),
        },
        TracerEvent::DroppedPacket {
            packet_type: "Initial".into(),
            size: 90,
            reason: "decryption failure".into(),
        },
        TracerEvent::UpdatedMetrics {
            rtt: RttStats::from_durations(
                Duration::from_millis(20),
                Duration::from_millis(22),
                Duration::from_millis(3),
                Duration::from_millis(18),
                Duration::from_millis(25),
                Duration::from_millis(60),
            ),
            cwnd: 14_720,
            bytes_in_flight: 2400,
            packets_in_flight: 2,
        },
        TracerEvent::AcknowledgedPacket {
            encryption_level: "1-RTT".into(),
            packet_number: 12,
        },
        TracerEvent::LostPacket {
            encryption_level: "1-RTT".into(),
            packet_number: 11,
            reason: "reordering threshold".into(),
        },
        TracerEvent::UpdatedCongestionState {
            state: "slow start".into(),
        },
        TracerEvent::UpdatedPtoCount { value: 2 },
        TracerEvent::UpdatedKeyFromTls {
            encryption_level: "Handshake".into(),
            perspective: Perspective::Server,
        },
        TracerEvent::UpdatedKey {
            generation: 4,
            remote: true,
        },
        TracerEvent::DroppedEncryptionLevel {
            encryption_level: "Initial".into(),
        },
        TracerEvent::DroppedKey { generation: 3 },
        TracerEvent::SetLossTimer {
            timer_type: "pto".into(),
            encryption_level: "1-RTT".into(),
            deadline: UNIX_EPOCH + Duration::from_micros(1_700_000_000_000_123),
        },
        TracerEvent::LossTimerExpired {
            timer_type: "ack".into(),
            encryption_level: "1-RTT".into(),
        },
        TracerEvent::LossTimerCanceled,
        TracerEvent::Debug {
            name: "cc".into(),
            msg: "entering recovery".into(),
        },
        TracerEvent::Close,
    ]
}

#[test]
fn every_event_rebuilds_from_its_message() {
    for ev in all_events() {
        let mut msg = ConnectionTracerMsg::for_event(7, "L", "R");
        ev.write_into(&mut msg);

        let json = serde_json::to_string(&msg).unwrap();
        let back: ConnectionTracerMsg = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tracing_id().unwrap(), 7);

        let rebuilt = TracerEvent::from_msg(ev.method(), &back).unwrap();
        assert_eq!(rebuilt, ev, "method={}", ev.method());
    }
}

#[test]
fn method_list_covers_every_event() {
    let events = all_events();
    assert_eq!(events.len(), EVENT_METHODS.len());
    for (ev, name) in events.iter().zip(EVENT_METHODS) {
        assert_eq!(ev.method(), *name);
    }
}

#[test]
fn missing_event_scalar_is_a_protocol_error() {
    let msg = ConnectionTracerMsg::for_event(1, "L", "R");
    let err = TracerEvent::from_msg("SentPacket", &msg).unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingField);
    assert!(err.is_protocol());

    let err = ConnectionTracerMsg::default().tracing_id().unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingField);
}

#[test]
fn unknown_event_method_is_rejected() {
    let msg = ConnectionTracerMsg::for_event(1, "L", "R");
    let err = TracerEvent::from_msg("ReceivedPigeon", &msg).unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownMethod);
}

#[test]
fn absent_scalars_are_not_serialized() {
    let msg = ConnectionTracerMsg::for_event(1, "L", "R");
    let v = serde_json::to_value(&msg).unwrap();
    assert_eq!(v.as_object().unwrap().len(), 3);
}

#[test]
fn connection_ids_reduce_to_hex() {
    assert_eq!(connection_id_hex(&[0x00, 0xab, 0x10]), "00ab10");
    assert_eq!(connection_id_hex(&[]), "");
}
