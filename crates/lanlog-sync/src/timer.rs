//! Cancellable one-shot timer for the handshake collection window.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A task that runs once after a delay unless cancelled first.
///
/// Dropping a `RoundTimer` does not cancel it; the task still fires.
/// Call [`RoundTimer::cancel`] to abort it.
#[derive(Debug)]
pub struct RoundTimer {
    handle: JoinHandle<()>,
}

impl RoundTimer {
    /// Run `task` after `delay` on the current tokio runtime.
    pub fn schedule<F>(delay: Duration, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        Self { handle }
    }

    /// Abort the timer. A no-op if it already fired.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// True once the task has completed or been aborted.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let _timer = RoundTimer::schedule(Duration::from_secs(5), async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let timer = RoundTimer::schedule(Duration::from_secs(5), async move {
            flag.store(true, Ordering::SeqCst);
        });

        timer.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert!(timer.is_finished());
    }
}
