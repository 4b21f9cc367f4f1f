//! Server shutdown: one trigger shared by the listener, the expiry sweeper,
//! and the daemon, followed by a bounded drain.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::drain`] waits before aborting stragglers.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Shared shutdown trigger.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator with [`DEFAULT_DRAIN_GRACE`].
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_DRAIN_GRACE)
    }

    /// Coordinator with a custom drain grace period.
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace,
        }
    }

    /// Token for one task; cancelled when shutdown is triggered.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Start shutting down. Idempotent.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown triggered");
        }
        self.token.cancel();
    }

    /// Whether [`trigger`](Self::trigger) has been called.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger, then wait up to the grace period for `tasks`.
    ///
    /// Tasks still running afterwards are aborted. Returns how many that was.
    pub async fn drain(&self, mut tasks: Vec<JoinHandle<()>>) -> usize {
        self.trigger();
        let wait_all = async {
            for task in &mut tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(self.grace, wait_all).await.is_ok() {
            info!(tasks = tasks.len(), "relay drained");
            return 0;
        }

        let stragglers: Vec<_> = tasks.iter().filter(|t| !t.is_finished()).collect();
        for task in &stragglers {
            task.abort();
        }
        warn!(aborted = stragglers.len(), grace = ?self.grace, "drain grace elapsed, aborting tasks");
        stragglers.len()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
