//! Cancellation signal and the listeners that set it

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// What asked the process to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// Ctrl-C from an interactive terminal
    Interrupt,
    /// The host runtime is unloading the module (SIGTERM)
    HostUnload,
    /// Requested from code, e.g. tests
    Manual,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownTrigger::Interrupt => f.write_str("interrupt"),
            ShutdownTrigger::HostUnload => f.write_str("host unload"),
            ShutdownTrigger::Manual => f.write_str("manual"),
        }
    }
}

/// Process-wide cancellation flag
///
/// Set at most once. Any number of tasks may trigger it concurrently; the
/// forwarding loop reads it between polls.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    /// Create a new, unset signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal; returns `true` only for the call that set it
    pub fn trigger(&self, source: ShutdownTrigger) -> bool {
        let first = self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if first {
            info!(trigger = %source, "Termination requested, closing.");
            self.notify.notify_waiters();
        } else {
            debug!(trigger = %source, "Termination already requested");
        }
        first
    }

    /// Check if shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Wait until the signal is set
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Listens for process termination and sets the shutdown signal
pub struct ShutdownCoordinator {
    signal: Arc<ShutdownSignal>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(signal: Arc<ShutdownSignal>) -> Self {
        Self { signal }
    }

    /// Spawn the listener task
    ///
    /// The task ends after the first trigger fires or once the signal is set
    /// from elsewhere.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let trigger = tokio::select! {
                _ = interrupt() => ShutdownTrigger::Interrupt,
                _ = host_unload() => ShutdownTrigger::HostUnload,
                _ = self.signal.cancelled() => return,
            };
            self.signal.trigger(trigger);
        })
    }
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn host_unload() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn host_unload() {
    std::future::pending::<()>().await;
}
