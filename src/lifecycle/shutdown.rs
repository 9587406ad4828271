//! Shutdown triggering.
//!
//! Shutdown can arrive two ways: an OS signal (SIGTERM/Ctrl+C) or a
//! programmatic trigger (admin call, tests). Both resolve the same
//! [`ShutdownSignal`], which the application passes to the server's graceful
//! shutdown and which hosted tasks observe through the scheduler.

use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Programmatic shutdown trigger. Cloning is cheap; all clones observe the
/// same trigger.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when shutdown has been requested programmatically. Does not
    /// watch OS signals; see [`wait`](Self::wait).
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }

    /// Resolves when shutdown has been requested, by trigger or OS signal.
    pub async fn wait(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {
                tracing::info!("shutdown triggered");
            }
            _ = os_signal() => {}
        }
    }
}

/// Completes when SIGTERM or Ctrl+C arrives.
pub async fn os_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_resolves_waiters() {
        let shutdown = ShutdownSignal::new();
        let waiter = shutdown.clone();

        let handle = tokio::spawn(async move { waiter.triggered().await });
        assert!(!shutdown.is_triggered());

        shutdown.trigger();
        handle.await.unwrap();
        assert!(shutdown.is_triggered());
    }
}
