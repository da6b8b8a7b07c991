use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tokio::{
    sync::Notify,
    task::{JoinError, JoinHandle},
    time::Duration,
};

/// A task scheduled for a specific point in the future.
/// It will automatically execute at that point, or can be cancelled or triggered early.
pub struct ScheduledTask<T> {
    handle: JoinHandle<T>,
    trigger: Arc<Notify>,
}

impl<T> ScheduledTask<T>
where
    T: Send + 'static,
{
    /// Schedule the given task to execute at time `run_at`.
    /// If `run_at` is in the past, the task will execute immediately.
    pub fn new<Fut>(task: Fut, run_at: DateTime<Utc>) -> Self
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let trigger = Arc::new(Notify::new());
        let delay = datetime_to_duration(run_at);

        // Wait for whichever comes first: the scheduled time or a manual trigger.
        // `notify_one` stores a permit, so an early trigger is never lost.
        let task_trigger = trigger.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = task_trigger.notified() => {},
            }
            task.await
        });

        Self { handle, trigger }
    }

    /// Cancel the task. Returns true iff it had already completed before we could cancel it.
    pub async fn cancel(self) -> bool {
        self.handle.abort();
        self.handle.await.is_ok()
    }

    /// Trigger the task now instead of waiting till the original time.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    /// Has the task finished running (or been aborted)?
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Implement `Future` for `ScheduledTask` so we can directly `await` it.
impl<T> Future for ScheduledTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

/// Convert a `DateTime` into a duration from the current instant.
/// A `DateTime` in the past will produce a duration of zero.
fn datetime_to_duration(datetime: DateTime<Utc>) -> Duration {
    (datetime - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn past_time_runs_immediately() {
        let task = ScheduledTask::new(async { 7 }, Utc::now() - chrono::Duration::seconds(5));
        assert_eq!(task.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn trigger_runs_early() {
        let task = ScheduledTask::new(async { "done" }, Utc::now() + chrono::Duration::hours(1));
        task.trigger_now();
        let result = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert_eq!(result.unwrap().unwrap(), "done");
    }

    #[tokio::test]
    async fn cancelled_task_never_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let task_ran = ran.clone();
        let task = ScheduledTask::new(
            async move { task_ran.store(true, Ordering::SeqCst) },
            Utc::now() + chrono::Duration::milliseconds(50),
        );
        assert!(!task.cancel().await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn past_datetimes_are_zero() {
        assert_eq!(
            datetime_to_duration(Utc::now() - chrono::Duration::days(1)),
            Duration::ZERO
        );
        assert!(datetime_to_duration(Utc::now() + chrono::Duration::hours(1)) > Duration::from_secs(3500));
    }
}
