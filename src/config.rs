//! Proxy process configuration.
//!
//! The configuration is assembled at receiver construction time and passed
//! through unmodified to the process handle's `start_proxy`. The core never
//! interprets it; serde derives exist because process-handle implementations
//! typically ship it across a process boundary.

use serde::{Deserialize, Serialize};

/// Default TCP port the decrypting proxy listens on.
pub const DEFAULT_PROXY_PORT: u16 = 7780;

/// Configuration handed to the external mitm proxy process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Port the proxy should listen on.
    pub proxy_port: u16,
    /// Authentication token for proxy clients, if any.
    pub proxy_auth: Option<String>,
    /// Whether the proxy should emit `secret` frames with TLS master secrets.
    pub dump_master_secrets: bool,
    /// Disable upstream certificate verification in the proxy.
    pub ssl_insecure: bool,
}

impl ProxyConfig {
    /// Create a config with the default proxy port.
    pub fn new(proxy_auth: Option<String>, dump_master_secrets: bool) -> Self {
        Self {
            proxy_port: DEFAULT_PROXY_PORT,
            proxy_auth,
            dump_master_secrets,
            ssl_insecure: true,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::new(None, false)
    }
}
