//! Shutdown signal handling
//!
//! Resolves on SIGINT or SIGTERM on Unix, and on Ctrl-C elsewhere.

use tracing::{info, warn};

#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Signal handlers unavailable, falling back to Ctrl-C");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() {
    ctrl_c().await
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C"),
        Err(e) => {
            // Without a signal source the node can only be killed
            warn!(error = %e, "Unable to listen for Ctrl-C");
            std::future::pending::<()>().await
        }
    }
}
