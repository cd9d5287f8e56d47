//! Consumed interfaces of the external decrypting process and its host.
//!
//! The core never starts or restarts the proxy process itself; it binds to
//! an existing handle, consumes the duplex stream the process returns, and
//! signals the owning capture session when decryption service is lost.

use std::future::Future;
use std::pin::Pin;

use tokio::io::AsyncRead;

use crate::config::ProxyConfig;

/// Boxed future returned by trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Scheduling priority requested when binding to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPriority {
    Normal,
    /// The process should be kept alive aggressively while bound.
    Important,
}

/// Handle to the external mitm proxy process.
pub trait ProxyProcess: Send + Sync + 'static {
    /// The duplex byte stream `start_proxy` hands back; the core only reads.
    type Stream: AsyncRead + Unpin + Send + 'static;

    /// Bind to the process. Returns `false` if binding was refused.
    fn connect(&self, priority: ConnectPriority) -> bool;

    /// Release the binding.
    fn disconnect(&self);

    /// Whether the binding is currently alive.
    fn is_connected(&self) -> bool;

    /// Ask the process for its root certificate (PEM), if it has one.
    fn request_root_certificate(&self) -> BoxFuture<'_, Option<String>>;

    /// Start the proxy with the given configuration, returning the stream
    /// frames will arrive on. `None` means the proxy could not start.
    fn start_proxy(&self, config: &ProxyConfig) -> Option<Self::Stream>;

    /// Explicit protocol-level stop signal. Closing the local end of the
    /// stream does not reliably wake the remote producer.
    fn stop_proxy(&self);
}

/// Verifies that the proxy's root certificate is still trusted on this
/// system.
pub trait TrustStore: Send + Sync + 'static {
    /// Whether the given PEM certificate is installed and trusted.
    /// `None` means the process could not produce a certificate.
    fn is_installed(&self, ca_pem: Option<&str>) -> bool;
}

/// The capture session that owns this receiver.
pub trait SessionControl: Send + Sync + 'static {
    /// Surface a user-visible error message.
    fn report_error(&self, message: &str);

    /// Ask the session to stop capturing entirely. Loss of the decrypting
    /// process means decryption service cannot continue.
    fn request_stop(&self);
}
