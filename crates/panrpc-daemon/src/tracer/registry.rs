use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use dashmap::DashMap;

use panrpc_core::protocol::tracer::Perspective;
use panrpc_core::{PanRpcError, Result};

/// Server-side view of one traced connection.
#[derive(Debug, Clone)]
pub struct TracerInstance {
    pub perspective: Perspective,
    pub odcid: String,
    pub created: Instant,
    pub events: u64,
}

#[derive(Debug)]
enum Slot {
    Active(TracerInstance),
    /// Kept after Close so late events are reported, not silently dropped.
    /// Carries the close sequence number that owns it in the eviction queue.
    Closed(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    AlreadyClosed,
}

/// Tombstones kept by default: the most recently closed ids that still
/// answer `TRACER_CLOSED`.
pub const DEFAULT_TOMBSTONE_LIMIT: usize = 4096;

#[derive(Debug, Default)]
struct Tombstones {
    next_seq: u64,
    /// `(id, close sequence)`, oldest first.
    order: VecDeque<(u64, u64)>,
}

/// All tracer instances, keyed by the caller-chosen tracing id.
///
/// Closed ids leave a tombstone. Only the newest `tombstone_limit` of them
/// are kept; an evicted id answers `UNKNOWN_TRACER` like one never created.
#[derive(Debug)]
pub struct TracerRegistry {
    slots: DashMap<u64, Slot>,
    tombstones: Mutex<Tombstones>,
    tombstone_limit: usize,
}

impl Default for TracerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TracerRegistry {
    pub fn new() -> Self {
        Self::with_tombstone_limit(DEFAULT_TOMBSTONE_LIMIT)
    }

    pub fn with_tombstone_limit(tombstone_limit: usize) -> Self {
        Self {
            slots: DashMap::new(),
            tombstones: Mutex::new(Tombstones::default()),
            tombstone_limit,
        }
    }

    /// Start a fresh instance. Reusing an id (active or closed) replaces it.
    pub fn create(&self, id: u64, perspective: Perspective, odcid: String) {
        let fresh = Slot::Active(TracerInstance {
            perspective,
            odcid,
            created: Instant::now(),
            events: 0,
        });
        if let Some(Slot::Active(_)) = self.slots.insert(id, fresh) {
            tracing::warn!(tracing_id = id, "tracer re-created while still active");
        }
    }

    /// Count one event against an active instance.
    pub fn record_event(&self, id: u64) -> Result<u64> {
        let mut slot = self
            .slots
            .get_mut(&id)
            .ok_or(PanRpcError::UnknownTracer(id))?;
        match slot.value_mut() {
            Slot::Active(t) => {
                t.events += 1;
                Ok(t.events)
            }
            Slot::Closed(_) => Err(PanRpcError::TracerClosed(id)),
        }
    }

    /// Close an instance. Closing twice is fine; closing an id that never
    /// existed is not.
    pub fn close(&self, id: u64) -> Result<CloseOutcome> {
        let mut tombstones = self
            .tombstones
            .lock()
            .map_err(|_| PanRpcError::Internal("tracer registry lock poisoned".into()))?;
        let seq = tombstones.next_seq;
        {
            let mut slot = self
                .slots
                .get_mut(&id)
                .ok_or(PanRpcError::UnknownTracer(id))?;
            match slot.value() {
                Slot::Closed(_) => return Ok(CloseOutcome::AlreadyClosed),
                Slot::Active(t) => {
                    tracing::debug!(tracing_id = id, events = t.events, "tracer closed");
                }
            }
            *slot.value_mut() = Slot::Closed(seq);
        }
        tombstones.next_seq += 1;
        tombstones.order.push_back((id, seq));

        while tombstones.order.len() > self.tombstone_limit {
            let Some((old, old_seq)) = tombstones.order.pop_front() else {
                break;
            };
            // The id may have been re-created (and maybe closed again) since.
            self.slots
                .remove_if(&old, |_, slot| matches!(slot, Slot::Closed(s) if *s == old_seq));
        }
        Ok(CloseOutcome::Closed)
    }

    pub fn get(&self, id: u64) -> Option<TracerInstance> {
        match self.slots.get(&id)?.value() {
            Slot::Active(t) => Some(t.clone()),
            Slot::Closed(_) => None,
        }
    }

    pub fn is_closed(&self, id: u64) -> bool {
        matches!(self.slots.get(&id).as_deref(), Some(Slot::Closed(_)))
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|e| matches!(e.value(), Slot::Active(_)))
            .count()
    }

    /// Closed ids still remembered.
    pub fn tombstone_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|e| matches!(e.value(), Slot::Closed(_)))
            .count()
    }

    /// Every tracked id, active or closed.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
