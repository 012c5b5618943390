//! Process signals that stop the bot and cancel what it has resting.

use std::future::Future;
use std::io;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Signal handlers registered up front, so a SIGTERM that arrives before
/// anyone awaits is still caught instead of killing the process.
pub struct ShutdownSignals {
    #[cfg(unix)]
    terminate: signal::unix::Signal,
}

impl ShutdownSignals {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: signal::unix::signal(signal::unix::SignalKind::terminate())?,
        })
    }

    /// Resolves with the name of the first signal received.
    pub async fn recv(mut self) -> &'static str {
        #[cfg(unix)]
        let name = tokio::select! {
            result = signal::ctrl_c() => Self::interrupted(result),
            _ = self.terminate.recv() => "SIGTERM",
        };
        #[cfg(not(unix))]
        let name = Self::interrupted(signal::ctrl_c().await);
        name
    }

    fn interrupted(result: io::Result<()>) -> &'static str {
        if let Err(e) = result {
            error!(error = %e, "Failed to listen for Ctrl-C, shutting down");
        }
        "SIGINT"
    }
}

/// Flip `shutdown` once `signal` resolves.
pub fn forward<F>(signal: F, shutdown: watch::Sender<bool>) -> JoinHandle<()>
where
    F: Future<Output = &'static str> + Send + 'static,
{
    tokio::spawn(async move {
        let name = signal.await;
        info!(signal = name, "🛑 Shutdown signal received");
        let _ = shutdown.send(true);
    })
}
