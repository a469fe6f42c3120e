// Shared helpers: the cooperative wait/poll combinator used by GR state
// transitions, GTID sync, and advisory lock retries (spec.md §5, §9).

use crate::error::AdminError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Set by the host environment's signal handler; every long wait polls it.
/// Cloning shares the same underlying flag.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Polls `f` every `interval` until it returns `Ok(true)`, `timeout` elapses,
/// or `cancel` is tripped. Returns `Err(AdminError::Cancelled)` on
/// cancellation and `Err(AdminError::GtidSyncTimeout)` on timeout by
/// default; callers needing a different timeout error should catch the
/// `Elapsed` marker and remap it.
pub async fn wait_for<F, Fut>(
    mut f: F,
    timeout: Duration,
    interval: Duration,
    cancel: &CancelToken,
) -> crate::Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<bool>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Err(AdminError::Cancelled);
        }
        if f().await? {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(AdminError::GtidSyncTimeout);
        }
        tokio::time::sleep(interval.min(deadline.saturating_duration_since(Instant::now())))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn wait_for_returns_once_predicate_is_true() {
        let counter = AtomicU32::new(0);
        let cancel = CancelToken::new();
        let result = wait_for(
            || async {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(n >= 2)
            },
            Duration::from_secs(5),
            Duration::from_millis(1),
            &cancel,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn wait_for_times_out() {
        let cancel = CancelToken::new();
        let result = wait_for(
            || async { Ok(false) },
            Duration::from_millis(10),
            Duration::from_millis(1),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(AdminError::GtidSyncTimeout)));
    }

    #[tokio::test]
    async fn wait_for_honors_cancellation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = wait_for(
            || async { Ok(false) },
            Duration::from_secs(5),
            Duration::from_millis(1),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(AdminError::Cancelled)));
    }
}
