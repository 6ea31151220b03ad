pub mod load_gen;
pub mod monitor;

use std::future::Future;

use hls_stats_engine::HlsStatsError;
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::error::Result;

/// How the viewer set came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Ctrl-C or SIGTERM
    Interrupted,
    /// Every viewer terminated on its own
    Finished,
}

/// Resolves on Ctrl-C, or on SIGTERM where available.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
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
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Waits for the viewers until `shutdown` resolves or all of them are done.
///
/// A viewer returning an error is a configuration problem: the remaining viewers are
/// aborted and the error is handed back.
pub async fn supervise(
    mut viewers: JoinSet<std::result::Result<(), HlsStatsError>>,
    shutdown: impl Future<Output = ()>,
) -> Result<Outcome> {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                viewers.abort_all();
                return Ok(Outcome::Interrupted);
            }
            joined = viewers.join_next() => match joined {
                None => return Ok(Outcome::Finished),
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    viewers.abort_all();
                    return Err(e.into());
                }
                Some(Err(e)) if e.is_cancelled() => {}
                Some(Err(e)) => error!(error = %e, "Viewer task panicked"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn finishes_when_every_viewer_is_done() {
        let mut viewers = JoinSet::new();
        viewers.spawn(async { Ok(()) });
        viewers.spawn(async { Ok(()) });

        let outcome = supervise(viewers, std::future::pending()).await.unwrap();
        assert_eq!(outcome, Outcome::Finished);
    }

    #[tokio::test]
    async fn configuration_error_stops_everything() {
        let mut viewers = JoinSet::new();
        viewers.spawn(async {
            std::future::pending::<()>().await;
            Ok(())
        });
        viewers.spawn(async { Err(HlsStatsError::configuration("buffer offset too large")) });

        let err = supervise(viewers, std::future::pending()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Engine(HlsStatsError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn shutdown_interrupts_running_viewers() {
        let mut viewers = JoinSet::new();
        viewers.spawn(async {
            std::future::pending::<()>().await;
            Ok(())
        });

        let outcome = supervise(viewers, std::future::ready(())).await.unwrap();
        assert_eq!(outcome, Outcome::Interrupted);
    }
}
