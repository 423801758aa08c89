//! Process stop signals.
use std::future::Future;
use tracing::{info, warn};

/// Installs the handlers now and returns a future that resolves on SIGINT, or
/// SIGTERM on unix. Installing up front means a signal that arrives before the
/// future is first polled is not lost.
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    #[cfg(unix)]
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(async move {
        let interrupt = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("received SIGINT"),
                Err(err) => {
                    warn!(?err, "failed to listen for SIGINT");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(unix)]
        tokio::select! {
            _ = interrupt => {}
            _ = term.recv() => info!("received SIGTERM"),
        }
        #[cfg(not(unix))]
        interrupt.await;
    })
}
