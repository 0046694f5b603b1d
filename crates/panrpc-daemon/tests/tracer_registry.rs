//! Tracer registry: closed-id tombstones stay bounded.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use panrpc_core::protocol::tracer::Perspective;
use panrpc_core::ErrorCode;
use panrpc_daemon::tracer::registry::DEFAULT_TOMBSTONE_LIMIT;
use panrpc_daemon::tracer::{CloseOutcome, TracerRegistry};

fn open_and_close(reg: &TracerRegistry, id: u64) {
    reg.create(id, Perspective::Client, format!("odcid-{id}"));
    reg.record_event(id).unwrap();
    assert_eq!(reg.close(id).unwrap(), CloseOutcome::Closed);
}

#[test]
fn many_short_lived_tracers_keep_the_registry_bounded() {
    let reg = TracerRegistry::new();
    for id in 0..100_000u64 {
        open_and_close(&reg, id);
    }
    assert_eq!(reg.active_count(), 0);
    assert_eq!(reg.tombstone_count(), DEFAULT_TOMBSTONE_LIMIT);
    assert_eq!(reg.len(), DEFAULT_TOMBSTONE_LIMIT);

    // Recently closed ids still report the close.
    let err = reg.record_event(99_999).unwrap_err();
    assert_eq!(err.code(), ErrorCode::TracerClosed);
    assert_eq!(reg.close(99_999).unwrap(), CloseOutcome::AlreadyClosed);

    // Long-gone ids look like they never existed.
    let err = reg.record_event(0).unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownTracer);
}

#[test]
fn eviction_is_oldest_closed_first() {
    let reg = TracerRegistry::with_tombstone_limit(2);
    for id in 1..=3 {
        open_and_close(&reg, id);
    }
    assert!(!reg.is_closed(1));
    assert!(reg.is_closed(2));
    assert!(reg.is_closed(3));
    assert_eq!(reg.close(1).unwrap_err().code(), ErrorCode::UnknownTracer);
}

#[test]
fn active_tracers_are_never_evicted() {
    let reg = TracerRegistry::with_tombstone_limit(1);
    reg.create(500, Perspective::Server, "long-lived".into());
    for id in 0..10 {
        open_and_close(&reg, id);
    }
    assert_eq!(reg.get(500).unwrap().odcid, "long-lived");
    assert_eq!(reg.active_count(), 1);
    assert_eq!(reg.len(), 2);
}

#[test]
fn stale_queue_entry_does_not_evict_a_reused_id() {
    let reg = TracerRegistry::with_tombstone_limit(2);
    open_and_close(&reg, 1);
    // Re-created and still running when its old tombstone ages out.
    reg.create(1, Perspective::Client, "again".into());
    open_and_close(&reg, 2);
    open_and_close(&reg, 3);
    assert_eq!(reg.get(1).unwrap().odcid, "again");

    // Closed a second time, it owns a fresh place in the queue.
    assert_eq!(reg.close(1).unwrap(), CloseOutcome::Closed);
    open_and_close(&reg, 4);
    assert!(reg.is_closed(1));
    assert!(reg.is_closed(4));
    assert!(!reg.is_closed(2));
}
