//! # tls-tap
//!
//! Receiver and correlator for decrypted TLS plaintext produced by an
//! external mitm proxy process.
//!
//! The proxy process sends length-framed messages over a duplex byte
//! stream. Each frame names the local ephemeral port of the intercepted
//! connection; this crate parses the framing, maps ports back to live
//! connection records and annotates them with plaintext chunks and
//! decryption errors — tolerating messages that arrive before the
//! connection-registration event, out of order across threads, or on a
//! port number that has since been reused.
//!
//! ## Architecture
//!
//! - [`protocol`]: wire format and incremental frame decoder
//! - [`correlate`]: bounded port index, pending-payload store and the
//!   correlator that ties frames to connections
//! - [`TapController`]: lifecycle against the external process — connect,
//!   certificate check, proxy start, background receive task, join on stop
//!
//! Collaborators (the connection registry, the proxy process handle, the
//! trust store and the owning capture session) are consumed through traits
//! in [`conn`] and [`process`]; this crate never owns connection records
//! and never performs TLS decryption itself.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tls_tap::{ProxyConfig, TapController};
//!
//! # async fn run(process: Arc<MyProcess>, registry: Arc<MyRegistry>,
//! #              trust: Arc<MyTrust>, session: Arc<MySession>) {
//! let controller = TapController::new(
//!     process,
//!     registry,
//!     trust,
//!     session,
//!     ProxyConfig::new(Some("token".into()), true),
//!     "/tmp/SSLKEYLOG.txt",
//! );
//!
//! controller.start().await.unwrap();
//! // ... capture runs ...
//! controller.stop().await.unwrap();
//! # }
//! ```

pub mod config;
pub mod conn;
pub mod correlate;
pub mod error;
pub mod keylog;
pub mod process;
pub mod protocol;

mod controller;
mod receiver;

pub use config::{ProxyConfig, DEFAULT_PROXY_PORT};
pub use controller::{TapController, TapState};
pub use error::{Result, TapError};
pub use keylog::Keylog;
