//! Receiver lifecycle.
//!
//! [`TapController`] walks the receiver through
//! `Idle → Connecting → AwaitingCertificate → StartingProxy → Running →
//! Stopping → Stopped` in lockstep with the external proxy process. There
//! is exactly one background receive task per controller, created on
//! [`TapController::start`] and joined before [`TapController::stop`]
//! returns, so no shared state is touched after stop completes.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ProxyConfig;
use crate::conn::{ConnectionEvents, ConnectionRegistry};
use crate::correlate::Correlator;
use crate::error::{Result, TapError};
use crate::keylog::Keylog;
use crate::process::{ConnectPriority, ProxyProcess, SessionControl, TrustStore};
use crate::receiver::receive_loop;

/// Lifecycle state of the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    Idle,
    Connecting,
    AwaitingCertificate,
    StartingProxy,
    Running,
    Stopping,
    Stopped,
}

/// Orchestrates the receive task against the external proxy process.
pub struct TapController<P, R, T, S>
where
    P: ProxyProcess,
    R: ConnectionRegistry,
    T: TrustStore,
    S: SessionControl,
{
    process: Arc<P>,
    registry: Arc<R>,
    trust: Arc<T>,
    session: Arc<S>,
    config: ProxyConfig,
    correlator: Arc<Correlator<R>>,
    // Same correlator, pre-coerced so remove_listener can match by pointer.
    listener: Arc<dyn ConnectionEvents<R::Conn>>,
    state: Mutex<TapState>,
    shutdown_tx: watch::Sender<bool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<P, R, T, S> TapController<P, R, T, S>
where
    P: ProxyProcess,
    R: ConnectionRegistry,
    T: TrustStore,
    S: SessionControl,
{
    /// Create a controller. The keylog file at `keylog_path` is deleted
    /// here; it is recreated lazily when the first secret arrives.
    pub fn new(
        process: Arc<P>,
        registry: Arc<R>,
        trust: Arc<T>,
        session: Arc<S>,
        config: ProxyConfig,
        keylog_path: impl AsRef<Path>,
    ) -> Self {
        let correlator = Arc::new(Correlator::new(registry.clone(), Keylog::new(keylog_path)));
        let listener: Arc<dyn ConnectionEvents<R::Conn>> = correlator.clone();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            process,
            registry,
            trust,
            session,
            config,
            correlator,
            listener,
            state: Mutex::new(TapState::Idle),
            shutdown_tx,
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TapState {
        *lock_state(&self.state)
    }

    /// Whether the proxy has reported itself running.
    pub fn proxy_running(&self) -> bool {
        self.correlator.proxy_running()
    }

    /// Subscribe to proxy status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<bool> {
        self.correlator.subscribe_status()
    }

    /// Shared correlator, for hosts that wire registry events manually
    /// instead of through `add_listener`.
    pub fn correlator(&self) -> &Arc<Correlator<R>> {
        &self.correlator
    }

    /// Bind to the proxy process, verify its certificate, start the proxy
    /// and spawn the receive task.
    ///
    /// On bind refusal the controller returns to `Idle`. A missing
    /// certificate aborts to `Stopped` and asks the owning session to stop:
    /// decryption cannot work until the user reinstalls it.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = lock_state(&self.state);
            if !matches!(*state, TapState::Idle | TapState::Stopped) {
                return Err(TapError::InvalidState("start requires an idle receiver"));
            }
            *state = TapState::Connecting;
        }

        tracing::debug!("starting");
        self.correlator.set_running(false);

        if self.process.is_connected() {
            self.set_state(TapState::Idle);
            return Err(TapError::InvalidState("process handle already bound"));
        }

        if !self.process.connect(ConnectPriority::Important) {
            self.session.report_error("failed to start the mitm proxy");
            self.set_state(TapState::Idle);
            return Err(TapError::BindFailed);
        }

        // Another instance may still be serving from a previous run.
        self.process.stop_proxy();

        self.set_state(TapState::AwaitingCertificate);
        let ca_pem = self.process.request_root_certificate().await;

        if !self.trust.is_installed(ca_pem.as_deref()) {
            self.session.report_error("proxy certificate reinstall required");
            self.process.disconnect();
            self.set_state(TapState::Stopped);
            self.session.request_stop();
            return Err(TapError::CertificateMissing);
        }

        self.set_state(TapState::StartingProxy);
        let Some(stream) = self.process.start_proxy(&self.config) else {
            self.process.disconnect();
            self.set_state(TapState::Stopped);
            return Err(TapError::NoProxyStream);
        };

        self.shutdown_tx.send_replace(false);
        self.registry.add_listener(self.listener.clone());

        let handle = tokio::spawn(receive_loop(
            stream,
            self.correlator.clone(),
            self.session.clone(),
            self.shutdown_tx.subscribe(),
        ));
        *self.task.lock().await = Some(handle);

        self.set_state(TapState::Running);
        Ok(())
    }

    /// Stop the receiver and wait for the receive task to exit.
    ///
    /// The shutdown signal abandons the pending read, which drops and
    /// closes the stream; the explicit `stop_proxy` wakes the remote
    /// producer, which closing our end alone does not reliably do. Returns
    /// only after the task has been joined.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = lock_state(&self.state);
            if !matches!(*state, TapState::Running) {
                return Err(TapError::InvalidState("stop requires a running receiver"));
            }
            *state = TapState::Stopping;
        }

        tracing::debug!("stopping");
        self.registry.remove_listener(&self.listener);

        self.shutdown_tx.send_replace(true);
        self.process.stop_proxy();
        self.process.disconnect();

        if let Some(handle) = self.task.lock().await.take() {
            tracing::debug!("joining receiver task");
            if let Err(e) = handle.await {
                tracing::warn!("receiver task aborted: {e}");
            }
        }

        self.set_state(TapState::Stopped);
        tracing::debug!("stop done");
        Ok(())
    }

    fn set_state(&self, next: TapState) {
        *lock_state(&self.state) = next;
    }
}

fn lock_state(state: &Mutex<TapState>) -> std::sync::MutexGuard<'_, TapState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
