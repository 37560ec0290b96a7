use std::future::Future;
use std::sync::Arc;

use tokio::select;
use tracing::{info, warn};

use crate::fetcher::FetcherSet;

/// Why the guarded work stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Completed,
    Signalled,
}

/// Reclaims every fetcher's storage when the process is told to stop.
pub struct ShutdownHandler {
    fetchers: Arc<FetcherSet>,
}

impl ShutdownHandler {
    pub fn new(fetchers: Arc<FetcherSet>) -> Self {
        Self { fetchers }
    }

    /// Drive `work` until it finishes or `signal` fires, then clean up.
    ///
    /// Tasks spawned by `work` are not cancelled; in-flight uploads lose their
    /// files and fail on their own.
    pub async fn guard<W, S>(&self, work: W, signal: S) -> Exit
    where
        W: Future<Output = ()>,
        S: Future<Output = ()>,
    {
        let exit = select! {
            () = work => Exit::Completed,
            () = signal => {
                info!("termination signal received, shutting down");
                Exit::Signalled
            }
        };

        self.cleanup();
        exit
    }

    pub fn cleanup(&self) {
        info!(fetchers = self.fetchers.len(), "removing downloaded images");
        self.fetchers.cleanup();
    }
}

/// Resolves on SIGINT or, on Unix, SIGTERM.
pub async fn termination_signal() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    select! {
        () = interrupt => {}
        () = terminate => {}
    }
}
