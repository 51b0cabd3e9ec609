//! Termination signals
//!
//! [`wait_for_shutdown_signal`] resolves on SIGINT, SIGTERM or SIGQUIT
//! (`crondog stop` sends SIGTERM). Off Unix only Ctrl-C is watched.

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    tracing::info!(signal = name, "Shutdown requested");
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!(signal = "ctrl-c", "Shutdown requested");
    Ok(())
}

/// Shutdown future for [`crate::Supervisor::run`]. If the handlers cannot be
/// installed the error is logged and the future resolves at once.
pub async fn shutdown_signal() {
    if let Err(e) = wait_for_shutdown_signal().await {
        tracing::error!("Cannot install signal handlers: {e}");
    }
}
