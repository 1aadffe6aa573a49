//! Process signals turned into cancellation.

use tokio_util::sync::CancellationToken;

/// Cancel the returned token on Ctrl+C, or SIGTERM on unix.
///
/// Install this before starting any work so that a node started by the run is
/// always cleaned up. Later signals are ignored once the token is cancelled.
pub fn install_signal_handlers() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::warn!("Shutdown signal received, cleaning up...");
        cancel.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to listen for SIGTERM, only Ctrl+C is handled");
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = sigterm.recv() => tracing::debug!("SIGTERM received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::debug!("Ctrl+C received"),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            // Without a listener the token must not fire spuriously.
            std::future::pending::<()>().await;
        }
    }
}
