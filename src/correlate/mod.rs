//! Frame correlation.
//!
//! The correlator classifies each decoded frame and resolves it against the
//! port index, falling back to the pending store when the frame raced ahead
//! of its connection's registration event. Registration batches from the
//! registry flow back in through [`Correlator::on_connections_added`], which
//! is the single place pending payloads are resolved.
//!
//! PortIndex and PendingStore form one exclusion domain: a single mutex
//! covers both, and the resolve-or-enqueue step is atomic with respect to
//! the put-then-drain step. Otherwise a frame could be enqueued for a
//! connection whose pending list was already drained and sit there until
//! the purge sweep discards it.

mod pending;
mod port_index;

pub use pending::{PendingPayload, PendingStore, PURGE_MAX_AGE, PURGE_PORT_THRESHOLD};
pub use port_index::{PortIndex, PORT_INDEX_CAPACITY};

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::watch;

use crate::conn::{ConnStatus, Connection, ConnectionEvents, ConnectionRegistry};
use crate::error::Result;
use crate::keylog::Keylog;
use crate::protocol::{Frame, FrameClass, PayloadChunk, PayloadKind};

/// Shared lookup state; guarded as one unit.
struct State {
    port_index: PortIndex,
    pending: PendingStore,
}

/// Classifies frames and applies them to connections, the keylog sink or
/// the process status flag.
pub struct Correlator<R: ConnectionRegistry> {
    registry: Arc<R>,
    state: Mutex<State>,
    keylog: Mutex<Keylog>,
    running_tx: watch::Sender<bool>,
}

impl<R: ConnectionRegistry> Correlator<R> {
    /// Create a correlator over the given registry and keylog sink.
    pub fn new(registry: Arc<R>, keylog: Keylog) -> Self {
        let (running_tx, _) = watch::channel(false);
        Self {
            registry,
            state: Mutex::new(State {
                port_index: PortIndex::new(),
                pending: PendingStore::new(),
            }),
            keylog: Mutex::new(keylog),
            running_tx,
        }
    }

    /// Handle one decoded frame.
    ///
    /// # Errors
    ///
    /// Only keylog I/O can fail; the caller treats that as loop-fatal.
    pub fn on_frame(&self, frame: Frame) -> Result<()> {
        match frame.class() {
            FrameClass::Status => {
                tracing::debug!("mitm proxy is running");
                self.running_tx.send_replace(true);
            }
            FrameClass::Secret => {
                lock(&self.keylog).write_secret(&frame.payload)?;
            }
            FrameClass::Error | FrameClass::Data => {
                let Frame {
                    timestamp,
                    local_port,
                    kind,
                    payload,
                } = frame;

                let mut state = lock(&self.state);
                match self.resolve(&mut state, local_port) {
                    Some(conn) => {
                        drop(state);
                        apply_payload(conn.as_ref(), kind, payload, timestamp);
                    }
                    None => {
                        // The registration event may simply not have arrived
                        // yet; hold the payload instead of dropping it.
                        let now = Instant::now();
                        state.pending.enqueue(
                            PendingPayload::new(kind, payload, local_port, timestamp, now),
                            now,
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Record newly registered connections and flush any payloads that
    /// arrived ahead of them, in original order.
    pub fn on_connections_added(&self, conns: &[Arc<R::Conn>]) {
        let mut state = lock(&self.state);

        for conn in conns {
            let port = conn.local_port();
            state.port_index.put(port, conn.id());

            for pending in state.pending.drain(port) {
                apply_payload(
                    conn.as_ref(),
                    pending.kind,
                    pending.payload,
                    pending.first_seen_at,
                );
            }
        }
    }

    /// Whether the proxy has reported itself up for this receiver run.
    pub fn proxy_running(&self) -> bool {
        *self.running_tx.borrow()
    }

    /// Subscribe to proxy status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<bool> {
        self.running_tx.subscribe()
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running_tx.send_replace(running);
    }

    /// Flush and close the keylog; called when the receive loop exits.
    pub(crate) fn close_keylog(&self) {
        if let Err(e) = lock(&self.keylog).close() {
            tracing::warn!("failed to close keylog: {e}");
        }
    }

    /// Resolve a port to a live connection, revalidating the indexed id
    /// against the connection's own recorded port. Ports are reused, so a
    /// hit in the index may still belong to an older connection.
    fn resolve(&self, state: &mut MutexGuard<'_, State>, port: u16) -> Option<Arc<R::Conn>> {
        let conn_id = state.port_index.get(port)?;
        let conn = self.registry.connection_by_id(conn_id)?;
        (conn.local_port() == port).then_some(conn)
    }
}

impl<R: ConnectionRegistry> ConnectionEvents<R::Conn> for Correlator<R> {
    fn connections_added(&self, conns: &[Arc<R::Conn>]) {
        self.on_connections_added(conns);
    }
}

/// Apply a resolved payload to its connection.
///
/// Errors are recorded as text; a closed connection transitions to the
/// client-error status, never the reverse. Everything else is appended to
/// the chunk sequence as-is.
fn apply_payload<C: Connection + ?Sized>(conn: &C, kind: PayloadKind, payload: Bytes, timestamp: i64) {
    if kind.class() == FrameClass::Error {
        conn.set_decryption_error(String::from_utf8_lossy(&payload).into_owned());

        if conn.status() == ConnStatus::Closed {
            conn.set_status(ConnStatus::ClientError);
        }
    } else {
        conn.append_chunk(PayloadChunk::new(
            payload,
            kind.chunk_kind(),
            kind.is_sent(),
            timestamp,
        ));
    }
}

/// Lock that survives poisoning; a panicked holder leaves the maps usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
