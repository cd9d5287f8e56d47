//! Background receive loop.
//!
//! A single task per receiver instance reads the proxy stream, feeds the
//! frame decoder and hands complete frames to the correlator. The loop only
//! exits on shutdown signal, end of stream, or an error; it never restarts
//! itself.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;

use crate::conn::ConnectionRegistry;
use crate::correlate::Correlator;
use crate::process::SessionControl;
use crate::protocol::FrameDecoder;

/// Read buffer size for the proxy stream.
const READ_BUF_SIZE: usize = 64 * 1024;

/// Drive the receive loop until shutdown or stream termination.
///
/// Error taxonomy:
/// - clean EOF means the decrypting process went away: the owning capture
///   session is asked to stop
/// - a malformed header is a desynchronized stream: report and stop the
///   session
/// - keylog I/O failure ends the loop
/// - transport errors after the shutdown signal are an intentional close
///   and are suppressed
pub(crate) async fn receive_loop<S, R, C>(
    mut stream: S,
    correlator: Arc<Correlator<R>>,
    session: Arc<C>,
    shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + Unpin,
    R: ConnectionRegistry,
    C: SessionControl,
{
    tracing::debug!("receiving data");

    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut shutdown_wait = shutdown.clone();

    loop {
        let n = tokio::select! {
            biased;
            _ = shutdown_wait.wait_for(|&stop| stop) => {
                tracing::debug!("shutdown requested, leaving receive loop");
                break;
            }
            res = stream.read(&mut buf) => match res {
                Ok(0) => {
                    // The stream ended under us: without the decrypting
                    // process there is no decryption service to offer.
                    if !*shutdown.borrow() {
                        tracing::debug!("proxy stream closed, stopping session");
                        session.request_stop();
                    }
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    if !*shutdown.borrow() {
                        tracing::error!("proxy stream read failed: {e}");
                    }
                    break;
                }
            },
        };

        let frames = match decoder.push(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                session.report_error("invalid header received from the mitm proxy");
                tracing::error!("fatal framing error: {e}");
                session.request_stop();
                break;
            }
        };

        let mut failed = false;
        for frame in frames {
            if let Err(e) = correlator.on_frame(frame) {
                tracing::error!("failed to handle frame: {e}");
                failed = true;
                break;
            }
        }
        if failed {
            break;
        }
    }

    correlator.close_keylog();
    correlator.set_running(false);
    tracing::debug!("end receiving data");
}
