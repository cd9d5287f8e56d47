//! Holding area for payloads that arrive before their connection is known.
//!
//! A payload racing ahead of its connection-registration event is the
//! uncommon case, so the store is allowed to be coarse: once more than 32
//! distinct ports are held, any whole list whose oldest member is older
//! than 5 seconds is dropped on the next enqueue.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::protocol::PayloadKind;

/// Distinct-port count above which the purge sweep runs.
pub const PURGE_PORT_THRESHOLD: usize = 32;

/// Maximum age of a pending list before it is dropped under pressure.
pub const PURGE_MAX_AGE: Duration = Duration::from_millis(5000);

/// A payload waiting for its connection to register.
#[derive(Debug, Clone)]
pub struct PendingPayload {
    /// Classified payload kind.
    pub kind: PayloadKind,
    /// Raw payload bytes.
    pub payload: Bytes,
    /// Local port the payload was addressed to.
    pub port: u16,
    /// Producer-supplied event timestamp.
    pub first_seen_at: i64,
    /// Local monotonic enqueue time, used for the staleness purge.
    pub enqueued_at: Instant,
}

impl PendingPayload {
    /// Create a pending payload enqueued at `now`.
    pub fn new(kind: PayloadKind, payload: Bytes, port: u16, first_seen_at: i64, now: Instant) -> Self {
        Self {
            kind,
            payload,
            port,
            first_seen_at,
            enqueued_at: now,
        }
    }
}

/// Per-port FIFO lists of payloads awaiting connection resolution.
pub struct PendingStore {
    by_port: BTreeMap<u16, Vec<PendingPayload>>,
}

impl PendingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            by_port: BTreeMap::new(),
        }
    }

    /// Append a payload to its port's list, creating the list if absent.
    ///
    /// Runs the opportunistic purge sweep first when the store is under
    /// pressure.
    pub fn enqueue(&mut self, pending: PendingPayload, now: Instant) {
        self.purge_if_needed(now);

        self.by_port.entry(pending.port).or_default().push(pending);
    }

    /// Remove and return the pending list for `port` in arrival order.
    pub fn drain(&mut self, port: u16) -> Vec<PendingPayload> {
        self.by_port.remove(&port).unwrap_or_default()
    }

    /// Number of distinct ports currently held.
    pub fn port_count(&self) -> usize {
        self.by_port.len()
    }

    /// Drop whole lists whose oldest member exceeds [`PURGE_MAX_AGE`], but
    /// only once more than [`PURGE_PORT_THRESHOLD`] distinct ports are held.
    ///
    /// The oldest element stands in for the whole list: a list with a stale
    /// head and a fresh tail is dropped in full.
    fn purge_if_needed(&mut self, now: Instant) {
        if self.by_port.len() <= PURGE_PORT_THRESHOLD {
            return;
        }

        self.by_port.retain(|port, list| {
            let oldest = match list.first() {
                Some(p) => p.enqueued_at,
                None => return false,
            };

            if now.duration_since(oldest) > PURGE_MAX_AGE {
                tracing::warn!(port, dropped = list.len(), "dropping stale pending payloads");
                false
            } else {
                true
            }
        });
    }
}

impl Default for PendingStore {
    fn default() -> Self {
        Self::new()
    }
}
