//! Error types for tls-tap.

use thiserror::Error;

/// Main error type for all tap operations.
#[derive(Debug, Error)]
pub enum TapError {
    /// I/O error on the proxy stream or the keylog sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fatal framing error: the byte stream is desynchronized and the
    /// receive loop must terminate.
    #[error("framing error: {0}")]
    Framing(String),

    /// Binding to the mitm proxy process failed.
    #[error("failed to bind to the mitm proxy process")]
    BindFailed,

    /// The proxy root certificate is no longer installed.
    #[error("proxy root certificate not installed")]
    CertificateMissing,

    /// The process accepted the start request but returned no stream.
    #[error("proxy process returned no stream")]
    NoProxyStream,

    /// `start()` called while the receiver is not idle, or `stop()` while
    /// it is not running.
    #[error("invalid lifecycle state: {0}")]
    InvalidState(&'static str),
}

/// Result type alias using TapError.
pub type Result<T> = std::result::Result<T, TapError>;
