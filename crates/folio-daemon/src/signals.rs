//! Signal handling for graceful shutdown.

use std::fmt;
use tokio::sync::broadcast;

/// What ended the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    /// Sent on the daemon's shutdown channel
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "SIGINT"),
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
            ShutdownReason::Requested => write!(f, "shutdown request"),
        }
    }
}

/// Wait for Ctrl+C, SIGTERM or a message on `shutdown_rx`.
///
/// A closed channel counts as a request.
pub async fn wait_for_shutdown(mut shutdown_rx: broadcast::Receiver<()>) -> ShutdownReason {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => ShutdownReason::Interrupt,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGINT");
                std::future::pending::<ShutdownReason>().await
            }
        },
        _ = shutdown_rx.recv() => ShutdownReason::Requested,
        _ = wait_for_sigterm() => ShutdownReason::Terminate,
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
