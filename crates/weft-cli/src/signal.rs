//! Signal handling for graceful shutdown.

use tracing::{info, warn};

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!(signal = "SIGINT", "signal received"),
                    _ = sigterm.recv() => info!(signal = "SIGTERM", "signal received"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C only"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Ctrl-C handler unavailable");
        return;
    }
    info!(signal = "SIGINT", "signal received");
}
