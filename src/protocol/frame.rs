//! Frame model and payload-kind classification.

use bytes::Bytes;

/// Maximum accepted payload length in bytes (64 MiB).
///
/// A header declaring more than this is a recoverable framing error: the
/// declared byte count is skipped and no frame is emitted.
pub const MAX_PAYLOAD_SIZE: usize = 67_108_864;

/// A single decoded message from the proxy stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Producer-supplied event timestamp.
    pub timestamp: i64,
    /// Local ephemeral port of the intercepted connection.
    pub local_port: u16,
    /// Classified payload kind.
    pub kind: PayloadKind,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(timestamp: i64, local_port: u16, kind: PayloadKind, payload: Bytes) -> Self {
        Self {
            timestamp,
            local_port,
            kind,
            payload,
        }
    }

    /// Control class of this frame's kind.
    #[inline]
    pub fn class(&self) -> FrameClass {
        self.kind.class()
    }
}

/// Closed set of payload kinds the proxy can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Unrecognized wire token. Carried, not an error.
    Unknown,
    /// Process-level status signal: the proxy is up and serving.
    Running,
    /// TLS decryption failure for one connection.
    TlsError,
    /// HTTP protocol failure for one connection.
    HttpError,
    /// TCP-level failure for one connection.
    TcpError,
    /// Decrypted HTTP request data.
    HttpRequest,
    /// Decrypted HTTP reply data.
    HttpReply,
    /// Raw TCP data sent by the local endpoint.
    TcpClientMsg,
    /// Raw TCP data received by the local endpoint.
    TcpServerMsg,
    /// WebSocket message sent by the local endpoint.
    WsClientMsg,
    /// WebSocket message received by the local endpoint.
    WsServerMsg,
    /// TLS master secret for the keylog sink.
    MasterSecret,
}

/// Coarse control class a frame belongs to, deciding how the correlator
/// handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Process-level status signal; touches no connection.
    Status,
    /// Master secret destined for the keylog sink.
    Secret,
    /// Decryption/protocol error recorded on a connection.
    Error,
    /// Plaintext data appended to a connection.
    Data,
}

/// Category of a payload chunk appended to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Http,
    Websocket,
    Raw,
}

impl PayloadKind {
    /// Resolve a wire token to a kind. Unrecognized tokens map to
    /// [`PayloadKind::Unknown`] rather than failing.
    pub fn from_token(token: &str) -> Self {
        match token {
            "running" => Self::Running,
            "tls_err" => Self::TlsError,
            "http_err" => Self::HttpError,
            "http_req" => Self::HttpRequest,
            "http_rep" => Self::HttpReply,
            "tcp_climsg" => Self::TcpClientMsg,
            "tcp_srvmsg" => Self::TcpServerMsg,
            "tcp_err" => Self::TcpError,
            "ws_climsg" => Self::WsClientMsg,
            "ws_srvmsg" => Self::WsServerMsg,
            "secret" => Self::MasterSecret,
            _ => Self::Unknown,
        }
    }

    /// Wire token for this kind, if it has one.
    pub fn token(&self) -> Option<&'static str> {
        match self {
            Self::Running => Some("running"),
            Self::TlsError => Some("tls_err"),
            Self::HttpError => Some("http_err"),
            Self::HttpRequest => Some("http_req"),
            Self::HttpReply => Some("http_rep"),
            Self::TcpClientMsg => Some("tcp_climsg"),
            Self::TcpServerMsg => Some("tcp_srvmsg"),
            Self::TcpError => Some("tcp_err"),
            Self::WsClientMsg => Some("ws_climsg"),
            Self::WsServerMsg => Some("ws_srvmsg"),
            Self::MasterSecret => Some("secret"),
            Self::Unknown => None,
        }
    }

    /// Control class this kind belongs to.
    pub fn class(&self) -> FrameClass {
        match self {
            Self::Running => FrameClass::Status,
            Self::MasterSecret => FrameClass::Secret,
            Self::TlsError | Self::HttpError | Self::TcpError => FrameClass::Error,
            _ => FrameClass::Data,
        }
    }

    /// Whether the payload was sent by the local endpoint.
    ///
    /// Only meaningful for data kinds.
    #[inline]
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::HttpRequest | Self::TcpClientMsg | Self::WsClientMsg)
    }

    /// Chunk category for data kinds.
    pub fn chunk_kind(&self) -> ChunkKind {
        match self {
            Self::HttpRequest | Self::HttpReply => ChunkKind::Http,
            Self::WsClientMsg | Self::WsServerMsg => ChunkKind::Websocket,
            _ => ChunkKind::Raw,
        }
    }
}

/// A unit of plaintext appended to a connection's chunk sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadChunk {
    /// Raw plaintext bytes.
    pub payload: Bytes,
    /// Chunk category.
    pub kind: ChunkKind,
    /// Whether the local endpoint sent this data.
    pub sent_by_local: bool,
    /// Producer-supplied event timestamp.
    pub timestamp: i64,
}

impl PayloadChunk {
    /// Create a new chunk.
    pub fn new(payload: Bytes, kind: ChunkKind, sent_by_local: bool, timestamp: i64) -> Self {
        Self {
            payload,
            kind,
            sent_by_local,
            timestamp,
        }
    }
}

/// Encode a frame into its wire representation (header line + payload).
///
/// The counterpart of [`FrameDecoder`](super::FrameDecoder); used by
/// producers and tests.
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let token = frame.kind.token().unwrap_or("unknown");
    let mut out = format!(
        "{}:{}:{}:{}\n",
        frame.timestamp,
        frame.local_port,
        token,
        frame.payload.len()
    )
    .into_bytes();
    out.extend_from_slice(&frame.payload);
    out
}
