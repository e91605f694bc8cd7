//! Shutdown requests, from signals or from code.

use std::io;
use std::sync::Arc;

use futures::future::{self, FutureExt};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

/// Cloneable trigger for a graceful shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Creates a handle and the receiver that observes it.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Requests shutdown. Repeated calls are harmless.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    /// Returns `true` once shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Wait for the first of SIGINT, SIGTERM, SIGQUIT or SIGHUP.
///
/// Returns the signal's name.
pub async fn wait_for_signal() -> io::Result<&'static str> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let (name, ..) = future::select_all([
        sigint.recv().map(|_| "SIGINT").boxed(),
        sigterm.recv().map(|_| "SIGTERM").boxed(),
        sigquit.recv().map(|_| "SIGQUIT").boxed(),
        sighup.recv().map(|_| "SIGHUP").boxed(),
    ])
    .await;

    Ok(name)
}
