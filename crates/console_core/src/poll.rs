use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Continue,
    Stop,
}

/// Fixed-interval repeat-until-stop execution unit.
///
/// Cancellation is cooperative: it is checked once per wake, so an
/// in-flight action is never aborted mid-request. Exclusivity (at most
/// one task per owner) is the owner's responsibility.
pub struct PollTask {
    active: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PollTask {
    pub fn spawn<A, Fut>(interval: Duration, mut action: A) -> Self
    where
        A: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = PollOutcome> + Send,
    {
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                if action().await == PollOutcome::Stop {
                    flag.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });
        Self {
            active,
            handle: Some(handle),
        }
    }

    /// Request termination at the next wake boundary. Idempotent.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Wait for the loop to observe its stop condition and exit.
    pub async fn stopped(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    const TICK: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn runs_until_the_action_signals_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let task = PollTask::spawn(TICK, move || {
            let seen = Arc::clone(&seen);
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                    PollOutcome::Stop
                } else {
                    PollOutcome::Continue
                }
            }
        });

        tokio::time::timeout(Duration::from_secs(2), task.stopped())
            .await
            .expect("poll task should stop on its own");
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancel_takes_effect_at_the_next_wake() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let task = PollTask::spawn(TICK, move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                PollOutcome::Continue
            }
        });

        task.cancel();
        task.cancel(); // idempotent
        assert!(!task.is_active());
        tokio::time::timeout(Duration::from_secs(2), task.stopped())
            .await
            .expect("cancelled task should exit");

        // Cancelled before the first wake: the action never ran, and
        // advancing time further produces no invocations.
        tokio::time::sleep(TICK * 3).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn a_stopped_task_reports_inactive() {
        let task = PollTask::spawn(TICK, || async { PollOutcome::Stop });
        tokio::time::timeout(Duration::from_secs(2), task.stopped())
            .await
            .expect("poll task should stop");

        let task = PollTask::spawn(TICK, || async { PollOutcome::Continue });
        assert!(task.is_active());
        task.cancel();
        assert!(!task.is_active());
    }
}
