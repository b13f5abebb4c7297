use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Process-termination signal shared by the head and node loops.
///
/// Clones observe the same flag. A loop checks it between polls and races
/// [`ShutdownToken::cancelled`] against its idle sleep, so a stop request
/// never interrupts a message that is already being handled.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    state: Arc<StopState>,
}

#[derive(Debug)]
struct StopState {
    stopped: AtomicBool,
    wake: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StopState {
                stopped: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        }
    }

    /// Asks every loop holding a clone to stop. Repeated calls are harmless.
    pub fn cancel(&self) {
        if !self.state.stopped.swap(true, Ordering::AcqRel) {
            self.state.wake.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }

    /// Resolves once [`ShutdownToken::cancel`] has been called on any clone.
    pub async fn cancelled(&self) {
        let wake = self.state.wake.notified();
        tokio::pin!(wake);
        // Registered before the flag check so a cancel in between still wakes us.
        wake.as_mut().enable();
        if !self.is_cancelled() {
            wake.await;
        }
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns a token that is cancelled on SIGTERM or SIGINT (ctrl-c elsewhere).
pub fn install_signal_handler() -> ShutdownToken {
    let token = ShutdownToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(err), _) | (_, Err(err)) => {
                tracing::error!(error = %err, "signal handlers unavailable, loops run until killed");
                return std::future::pending().await;
            }
        };

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    tracing::info!(signal, "stopping control loops");
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "ctrl-c handler unavailable, loops run until killed");
        return std::future::pending().await;
    }
    tracing::info!(signal = "ctrl-c", "stopping control loops");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn cancelled_returns_at_once_after_cancel() {
        let token = ShutdownToken::default();
        assert!(!token.is_cancelled());

        token.cancel();
        token.cancel();

        assert!(token.clone().is_cancelled());
        timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn every_waiting_clone_wakes() {
        let token = ShutdownToken::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let clone = token.clone();
                tokio::spawn(async move { clone.cancelled().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let joined = timeout(Duration::from_secs(5), futures::future::join_all(waiters))
            .await
            .unwrap();
        assert!(joined.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn idle_sleep_is_cut_short() {
        let token = ShutdownToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let woke_early = tokio::select! {
            _ = token.cancelled() => true,
            _ = tokio::time::sleep(Duration::from_secs(30)) => false,
        };
        assert!(woke_early);
    }
}
