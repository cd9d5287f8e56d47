//! Bounded LRU index from local port to connection id.
//!
//! Local ephemeral ports are reused over time, so the index is a recency
//! cache, not a source of truth: a lookup may return the id of an older
//! connection that held the same port. Callers revalidate against the live
//! connection's own recorded port.

use std::collections::{HashMap, VecDeque};

use crate::conn::ConnectionId;

/// Capacity of the port index.
pub const PORT_INDEX_CAPACITY: usize = 64;

/// Fixed-capacity map `port -> connection id` with least-recently-accessed
/// eviction. Both `put` and `get` refresh recency.
pub struct PortIndex {
    entries: HashMap<u16, ConnectionId>,
    // Access order, oldest at the front. One entry per resident port.
    recency: VecDeque<u16>,
    capacity: usize,
}

impl PortIndex {
    /// Create an index with the default capacity of 64 ports.
    pub fn new() -> Self {
        Self::with_capacity(PORT_INDEX_CAPACITY)
    }

    /// Create an index with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            entries: HashMap::with_capacity(capacity),
            recency: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert or overwrite the mapping for `port`, evicting the least
    /// recently accessed entry when at capacity.
    pub fn put(&mut self, port: u16, conn_id: ConnectionId) {
        if self.entries.insert(port, conn_id).is_some() {
            self.touch(port);
            return;
        }

        if self.entries.len() > self.capacity {
            if let Some(oldest) = self.recency.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.recency.push_back(port);
    }

    /// Look up the connection id for `port`, refreshing its recency.
    pub fn get(&mut self, port: u16) -> Option<ConnectionId> {
        let conn_id = *self.entries.get(&port)?;
        self.touch(port);
        Some(conn_id)
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, port: u16) {
        if let Some(pos) = self.recency.iter().position(|&p| p == port) {
            self.recency.remove(pos);
        }
        self.recency.push_back(port);
    }
}

impl Default for PortIndex {
    fn default() -> Self {
        Self::new()
    }
}
