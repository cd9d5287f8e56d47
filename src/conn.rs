//! Consumed interfaces of the connection registry.
//!
//! Connection records are owned elsewhere; the core only annotates them —
//! it appends payload chunks and sets the decryption-error and status
//! fields. Implementors provide interior mutability behind these traits.

use std::sync::Arc;

use crate::protocol::PayloadChunk;

/// Identifier of a connection record in the registry.
pub type ConnectionId = u64;

/// Lifecycle status of a connection, as far as the core cares.
///
/// The core reads `Closed` and writes `ClientError`; every other state the
/// registry may track is opaque `Open` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Open,
    Closed,
    ClientError,
}

/// Surface of a connection record exposed to the correlator.
pub trait Connection: Send + Sync {
    /// Registry identifier of this connection.
    fn id(&self) -> ConnectionId;

    /// Local ephemeral port recorded for this connection.
    fn local_port(&self) -> u16;

    /// Current status.
    fn status(&self) -> ConnStatus;

    /// Overwrite the status.
    fn set_status(&self, status: ConnStatus);

    /// Record a decryption error message.
    fn set_decryption_error(&self, error: String);

    /// Append a chunk to the connection's ordered chunk sequence.
    fn append_chunk(&self, chunk: PayloadChunk);
}

/// Subscriber for connection-registration events.
///
/// The registry pushes immutable batches; the subscriber resolves them under
/// its own exclusion domain.
pub trait ConnectionEvents<C: Connection>: Send + Sync {
    /// Called with each batch of newly registered connections.
    fn connections_added(&self, conns: &[Arc<C>]);
}

/// The external registry that owns connection records.
pub trait ConnectionRegistry: Send + Sync + 'static {
    /// Concrete connection record type.
    type Conn: Connection + 'static;

    /// Look up a live connection by id.
    fn connection_by_id(&self, id: ConnectionId) -> Option<Arc<Self::Conn>>;

    /// Subscribe to registration events.
    fn add_listener(&self, listener: Arc<dyn ConnectionEvents<Self::Conn>>);

    /// Unsubscribe a previously added listener (matched by pointer identity).
    fn remove_listener(&self, listener: &Arc<dyn ConnectionEvents<Self::Conn>>);
}
