//! Shutdown and reload signalling
//!
//! A shutdown request lets the tick in flight finish; the controller only
//! observes it between ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Operator wants out now (SIGQUIT); still never interrupts a tick
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

/// Shutdown coordinator
pub struct GracefulShutdown {
    requested: AtomicBool,
    signal_tx: watch::Sender<Option<ShutdownSignal>>,
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (signal_tx, _) = watch::channel(None);
        Self {
            requested: AtomicBool::new(false),
            signal_tx,
        }
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Request shutdown; only the first request counts
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        self.signal_tx.send_replace(Some(signal));
    }

    /// Token for tasks that need to observe the request
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            signal_rx: self.signal_tx.subscribe(),
        }
    }
}

/// Token for checking shutdown status in async tasks
#[derive(Clone)]
pub struct ShutdownToken {
    signal_rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownToken {
    pub fn is_shutdown_requested(&self) -> bool {
        self.signal_rx.borrow().is_some()
    }

    /// Resolve once shutdown is requested. A dropped coordinator counts as
    /// a graceful request.
    pub async fn wait_for_shutdown(&mut self) -> ShutdownSignal {
        match self.signal_rx.wait_for(Option::is_some).await {
            Ok(signal) => (*signal).unwrap_or(ShutdownSignal::Graceful),
            Err(_) => ShutdownSignal::Graceful,
        }
    }
}

/// Callback run on SIGHUP
pub type ReloadHook = Arc<dyn Fn() + Send + Sync>;

/// Install OS signal handlers.
///
/// SIGTERM and SIGINT request a graceful shutdown, SIGQUIT an urgent one.
/// SIGHUP runs `reload` when one is given.
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>, reload: Option<ReloadHook>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name, request) in [
            (SignalKind::terminate(), "SIGTERM", ShutdownSignal::Graceful),
            (SignalKind::interrupt(), "SIGINT", ShutdownSignal::Graceful),
            (SignalKind::quit(), "SIGQUIT", ShutdownSignal::Urgent),
        ] {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut stream = match signal(kind) {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!("Failed to install {} handler: {}", name, e);
                        return;
                    }
                };
                stream.recv().await;
                info!("Received {}", name);
                shutdown.request_shutdown(request);
            });
        }

        if let Some(reload) = reload {
            tokio::spawn(async move {
                let mut stream = match signal(SignalKind::hangup()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!("Failed to install SIGHUP handler: {}", e);
                        return;
                    }
                };
                while stream.recv().await.is_some() {
                    info!("Received SIGHUP, reloading thresholds");
                    reload();
                }
            });
        }
    }

    #[cfg(windows)]
    {
        let _ = reload;
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C");
                    shutdown.request_shutdown(ShutdownSignal::Graceful);
                }
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        });
    }
}
