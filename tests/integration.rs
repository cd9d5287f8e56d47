//! Integration tests for tls-tap.
//!
//! Drive a full controller over a `tokio::io::duplex` stream, with mock
//! implementations of the external collaborators, and verify the
//! end-to-end scenarios: payload correlation, pending resolution, secret
//! logging and shutdown ordering.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, DuplexStream};

use tls_tap::conn::{
    ConnStatus, Connection, ConnectionEvents, ConnectionId, ConnectionRegistry,
};
use tls_tap::process::{BoxFuture, ConnectPriority, ProxyProcess, SessionControl, TrustStore};
use tls_tap::protocol::{encode_frame, Frame, PayloadChunk, PayloadKind};
use tls_tap::{ProxyConfig, TapController, TapState};

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

struct MockConn {
    id: ConnectionId,
    local_port: u16,
    status: AtomicU8,
    decryption_error: Mutex<Option<String>>,
    chunks: Mutex<Vec<PayloadChunk>>,
}

impl MockConn {
    fn new(id: ConnectionId, local_port: u16) -> Arc<Self> {
        Arc::new(Self {
            id,
            local_port,
            status: AtomicU8::new(0),
            decryption_error: Mutex::new(None),
            chunks: Mutex::new(Vec::new()),
        })
    }

    fn chunks(&self) -> Vec<PayloadChunk> {
        self.chunks.lock().unwrap().clone()
    }
}

impl Connection for MockConn {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn local_port(&self) -> u16 {
        self.local_port
    }

    fn status(&self) -> ConnStatus {
        match self.status.load(Ordering::SeqCst) {
            0 => ConnStatus::Open,
            1 => ConnStatus::Closed,
            _ => ConnStatus::ClientError,
        }
    }

    fn set_status(&self, status: ConnStatus) {
        let raw = match status {
            ConnStatus::Open => 0,
            ConnStatus::Closed => 1,
            ConnStatus::ClientError => 2,
        };
        self.status.store(raw, Ordering::SeqCst);
    }

    fn set_decryption_error(&self, error: String) {
        *self.decryption_error.lock().unwrap() = Some(error);
    }

    fn append_chunk(&self, chunk: PayloadChunk) {
        self.chunks.lock().unwrap().push(chunk);
    }
}

/// Registry that owns mock connections and forwards registration batches to
/// its listeners, the way the real connection registry does.
#[derive(Default)]
struct MockRegistry {
    conns: Mutex<HashMap<ConnectionId, Arc<MockConn>>>,
    listeners: Mutex<Vec<Arc<dyn ConnectionEvents<MockConn>>>>,
}

impl MockRegistry {
    fn register(&self, conns: &[Arc<MockConn>]) {
        {
            let mut map = self.conns.lock().unwrap();
            for conn in conns {
                map.insert(conn.id, conn.clone());
            }
        }
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.connections_added(conns);
        }
    }
}

impl ConnectionRegistry for MockRegistry {
    type Conn = MockConn;

    fn connection_by_id(&self, id: ConnectionId) -> Option<Arc<MockConn>> {
        self.conns.lock().unwrap().get(&id).cloned()
    }

    fn add_listener(&self, listener: Arc<dyn ConnectionEvents<MockConn>>) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn ConnectionEvents<MockConn>>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }
}

struct MockProcess {
    stream: Mutex<Option<DuplexStream>>,
    connected: AtomicBool,
}

impl MockProcess {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
            connected: AtomicBool::new(false),
        }
    }
}

impl ProxyProcess for MockProcess {
    type Stream = DuplexStream;

    fn connect(&self, _priority: ConnectPriority) -> bool {
        self.connected.store(true, Ordering::SeqCst);
        true
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn request_root_certificate(&self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async { Some("-----BEGIN CERTIFICATE-----".to_string()) })
    }

    fn start_proxy(&self, _config: &ProxyConfig) -> Option<DuplexStream> {
        self.stream.lock().unwrap().take()
    }

    fn stop_proxy(&self) {}
}

struct AcceptingTrust;

impl TrustStore for AcceptingTrust {
    fn is_installed(&self, ca_pem: Option<&str>) -> bool {
        ca_pem.is_some()
    }
}

#[derive(Default)]
struct MockSession {
    errors: Mutex<Vec<String>>,
    stop_requested: AtomicBool,
}

impl SessionControl for MockSession {
    fn report_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    controller: Arc<TapController<MockProcess, MockRegistry, AcceptingTrust, MockSession>>,
    process: Arc<MockProcess>,
    registry: Arc<MockRegistry>,
    session: Arc<MockSession>,
    proxy: DuplexStream,
    keylog_path: PathBuf,
}

fn temp_keylog(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir().join(format!(
        "tls-tap-it-{}-{}-{:x}.txt",
        tag,
        std::process::id(),
        nanos
    ))
}

async fn start_harness(tag: &str) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (proxy, stream) = tokio::io::duplex(256 * 1024);
    let registry = Arc::new(MockRegistry::default());
    let session = Arc::new(MockSession::default());
    let keylog_path = temp_keylog(tag);

    let process = Arc::new(MockProcess::new(stream));
    let controller = Arc::new(TapController::new(
        process.clone(),
        registry.clone(),
        Arc::new(AcceptingTrust),
        session.clone(),
        ProxyConfig::default(),
        keylog_path.clone(),
    ));
    controller.start().await.unwrap();

    Harness {
        controller,
        process,
        registry,
        session,
        proxy,
        keylog_path,
    }
}

/// Poll until `check` passes or the deadline is hit. The receive task runs
/// concurrently; there is no completion signal to await per frame.
async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within deadline");
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_payload_before_connection_is_delivered_on_registration() {
    let mut h = start_harness("pending").await;

    // "100:5000:http_req:5\nHELLO" arrives before port 5000 is known.
    h.proxy
        .write_all(b"100:5000:http_req:5\nHELLO")
        .await
        .unwrap();

    // Give the frame time to land in the pending store, then register.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let conn = MockConn::new(7, 5000);
    h.registry.register(&[conn.clone()]);

    wait_until(|| !conn.chunks().is_empty()).await;

    let chunks = conn.chunks();
    assert_eq!(chunks.len(), 1);
    assert_eq!(&chunks[0].payload[..], b"HELLO");
    assert_eq!(chunks[0].kind, tls_tap::protocol::ChunkKind::Http);
    assert!(chunks[0].sent_by_local);

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_known_connection_receives_frames_directly() {
    let mut h = start_harness("direct").await;

    let conn = MockConn::new(1, 4321);
    h.registry.register(&[conn.clone()]);

    let request = Frame::new(10, 4321, PayloadKind::HttpRequest, Bytes::from_static(b"GET /"));
    let reply = Frame::new(11, 4321, PayloadKind::HttpReply, Bytes::from_static(b"200 OK"));
    h.proxy.write_all(&encode_frame(&request)).await.unwrap();
    h.proxy.write_all(&encode_frame(&reply)).await.unwrap();

    wait_until(|| conn.chunks().len() == 2).await;

    let chunks = conn.chunks();
    assert!(chunks[0].sent_by_local);
    assert!(!chunks[1].sent_by_local);
    assert_eq!(&chunks[1].payload[..], b"200 OK");

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_running_frame_flips_status() {
    let mut h = start_harness("running").await;

    assert!(!h.controller.proxy_running());
    h.proxy.write_all(b"1:0:running:0\n").await.unwrap();

    wait_until(|| h.controller.proxy_running()).await;

    h.controller.stop().await.unwrap();
    // The flag is cleared when the loop exits.
    assert!(!h.controller.proxy_running());
}

#[tokio::test]
async fn test_secrets_reach_the_keylog_verbatim() {
    let mut h = start_harness("secret").await;

    let secret = b"CLIENT_RANDOM 52345234 SECRET";
    let frame = Frame::new(
        1,
        0,
        PayloadKind::MasterSecret,
        Bytes::copy_from_slice(secret),
    );
    h.proxy.write_all(&encode_frame(&frame)).await.unwrap();

    // Wait for the frame to be consumed, then stop; stop joins the loop,
    // which closes (and flushes) the keylog.
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.controller.stop().await.unwrap();

    let contents = std::fs::read(&h.keylog_path).unwrap();
    let mut expected = secret.to_vec();
    expected.push(b'\n');
    assert_eq!(contents, expected);

    let _ = std::fs::remove_file(&h.keylog_path);
}

#[tokio::test]
async fn test_error_frame_marks_closed_connection() {
    let mut h = start_harness("error").await;

    let conn = MockConn::new(3, 7000);
    conn.set_status(ConnStatus::Closed);
    h.registry.register(&[conn.clone()]);

    let frame = Frame::new(
        5,
        7000,
        PayloadKind::TlsError,
        Bytes::from_static(b"certificate unknown"),
    );
    h.proxy.write_all(&encode_frame(&frame)).await.unwrap();

    wait_until(|| conn.status() == ConnStatus::ClientError).await;
    assert_eq!(
        conn.decryption_error.lock().unwrap().as_deref(),
        Some("certificate unknown")
    );

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_header_stops_the_session() {
    let mut h = start_harness("malformed").await;

    h.proxy.write_all(b"not a frame header\n").await.unwrap();

    wait_until(|| h.session.stop_requested.load(Ordering::SeqCst)).await;
    assert!(!h.session.errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_frame_is_skipped_and_stream_continues() {
    let mut h = start_harness("oversized").await;

    let conn = MockConn::new(9, 8080);
    h.registry.register(&[conn.clone()]);

    // Declared length one past the 64 MiB bound: recoverable. Skip bytes
    // are fed in chunks, then a valid frame follows on the same stream.
    h.proxy
        .write_all(b"1:8080:tcp_srvmsg:67108865\n")
        .await
        .unwrap();
    let junk = vec![0u8; 1024 * 1024];
    let mut sent = 0usize;
    while sent < 67_108_865 {
        let n = junk.len().min(67_108_865 - sent);
        h.proxy.write_all(&junk[..n]).await.unwrap();
        sent += n;
    }

    let frame = Frame::new(2, 8080, PayloadKind::TcpServerMsg, Bytes::from_static(b"ok"));
    h.proxy.write_all(&encode_frame(&frame)).await.unwrap();

    wait_until(|| !conn.chunks().is_empty()).await;
    let chunks = conn.chunks();
    assert_eq!(chunks.len(), 1);
    assert_eq!(&chunks[0].payload[..], b"ok");
    assert!(!h.session.stop_requested.load(Ordering::SeqCst));

    h.controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_remote_eof_requests_session_stop() {
    let h = start_harness("eof").await;

    drop(h.proxy);

    wait_until(|| h.session.stop_requested.load(Ordering::SeqCst)).await;
}

#[tokio::test]
async fn test_stop_while_read_is_blocked() {
    let h = start_harness("shutdown").await;

    // No bytes in flight: the loop is parked on the read. Stop must still
    // unblock it and return only after the task exits.
    h.controller.stop().await.unwrap();

    assert_eq!(h.controller.state(), TapState::Stopped);
    // The intentional close is not an error and never escalates.
    assert!(h.session.errors.lock().unwrap().is_empty());
    assert!(!h.session.stop_requested.load(Ordering::SeqCst));

    // Frames written after stop are never processed.
    let mut proxy = h.proxy;
    let conn = MockConn::new(4, 6000);
    h.registry.register(&[conn.clone()]);
    let frame = Frame::new(1, 6000, PayloadKind::HttpRequest, Bytes::from_static(b"late"));
    let _ = proxy.write_all(&encode_frame(&frame)).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(conn.chunks().is_empty());
}

#[tokio::test]
async fn test_restart_after_stop() {
    let h = start_harness("restart").await;
    h.controller.stop().await.unwrap();

    // A stopped controller can start again once the process hands out a
    // fresh stream.
    let (mut proxy, stream) = tokio::io::duplex(64 * 1024);
    *h.process.stream.lock().unwrap() = Some(stream);
    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state(), TapState::Running);

    let conn = MockConn::new(5, 9000);
    h.registry.register(&[conn.clone()]);
    let frame = Frame::new(1, 9000, PayloadKind::WsClientMsg, Bytes::from_static(b"ws"));
    proxy.write_all(&encode_frame(&frame)).await.unwrap();

    wait_until(|| !conn.chunks().is_empty()).await;
    h.controller.stop().await.unwrap();
}
