use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::Mutex;

use super::caster::BallotCaster;
use crate::error::{Error, Result};
use crate::model::{
    ballot::{Ballot, ReceiptStatus},
    mongodb::Id,
};
use crate::scheduled_task::ScheduledTask;

/// Map from ballot IDs to scheduled receipt retries.
type TaskMap = HashMap<Id, ScheduledTask<Result<()>>>;

/// Scheduled re-renders of receipts that could not be produced when their
/// ballot was cast.
pub struct ReceiptRetries {
    caster: Arc<BallotCaster>,
    interval: Duration,
    max_attempts: u32,
    tasks: Arc<Mutex<TaskMap>>,
}

impl ReceiptRetries {
    /// Create an empty set of retries. Failed receipts are retried every
    /// `interval` until they have failed `max_attempts` times.
    pub fn new(caster: Arc<BallotCaster>, interval: Duration, max_attempts: u32) -> Self {
        Self {
            caster,
            interval,
            max_attempts,
            tasks: Default::default(),
        }
    }

    /// Does the given ballot have a retry scheduled?
    pub async fn has_retry(&self, ballot_id: Id) -> bool {
        self.tasks.lock().await.contains_key(&ballot_id)
    }

    /// Number of retries currently scheduled.
    pub async fn scheduled(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Schedule a retry for every ballot whose receipt is outstanding and not
    /// already scheduled. Returns how many were newly scheduled.
    pub async fn schedule_pending(&self) -> Result<usize> {
        let pending = self.caster.store().pending_receipts().await?;
        let mut scheduled = 0;
        for ballot in pending {
            if !self.has_retry(ballot.id).await && self.schedule(&ballot).await {
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }

    /// Schedule a retry for the given ballot, replacing any existing one.
    /// A receipt never attempted runs at once; a failed one after the retry
    /// interval. Returns false if the ballot needs no retry.
    pub async fn schedule(&self, ballot: &Ballot) -> bool {
        let run_at = match &ballot.receipt {
            ReceiptStatus::Generated { .. } => return false,
            ReceiptStatus::Failed { attempts, .. } if *attempts >= self.max_attempts => {
                return false;
            }
            ReceiptStatus::Failed { .. } => Utc::now() + self.interval,
            ReceiptStatus::Pending => Utc::now(),
        };
        let retry = Self::retrier(
            ballot.id,
            self.caster.clone(),
            self.tasks.clone(),
            self.interval,
            self.max_attempts,
        );
        let mut tasks_locked = self.tasks.lock().await;
        if let Some(task) = tasks_locked.remove(&ballot.id) {
            task.cancel().await;
        }
        tasks_locked.insert(ballot.id, ScheduledTask::new(retry, run_at));
        true
    }

    /// Immediately run the retry for the given ballot and wait for it.
    /// If no retry was scheduled, this has no effect.
    pub async fn retry_now(&self, ballot_id: Id) -> Result<()> {
        let task = self.tasks.lock().await.remove(&ballot_id);
        // The lock is released here, as the retry needs it too.
        match task {
            Some(retry) => {
                retry.trigger_now();
                retry.await.unwrap_or_else(|e| {
                    Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("receipt retry for ballot {ballot_id} did not complete: {e}"),
                    )))
                })
            }
            None => Ok(()),
        }
    }

    /// Cancel every scheduled retry.
    pub async fn cancel_all(&self) {
        let tasks: Vec<_> = self.tasks.lock().await.drain().collect();
        for (_, task) in tasks {
            task.cancel().await;
        }
    }

    /// Retry the receipt for one ballot, rescheduling itself on failure.
    /// Since this is a recursive async function, we must use `BoxFuture` to
    /// avoid an infinitely-recursive state machine.
    fn retrier(
        ballot_id: Id,
        caster: Arc<BallotCaster>,
        tasks: Arc<Mutex<TaskMap>>,
        interval: Duration,
        max_attempts: u32,
    ) -> BoxFuture<'static, Result<()>> {
        async move {
            debug!("Retrying receipt for ballot {ballot_id}");
            let result = caster.retry_receipt(ballot_id).await;
            let give_up = match &result {
                Ok(ballot) if ballot.receipt_generated() => {
                    info!("Receipt for ballot {ballot_id} generated on retry");
                    true
                }
                Ok(ballot) if ballot.receipt.failed_attempts() >= max_attempts => {
                    error!(
                        "Receipt for ballot {ballot_id} failed {} times, giving up",
                        ballot.receipt.failed_attempts()
                    );
                    true
                }
                Ok(_) => false,
                Err(e) if e.is_rejection() => {
                    error!("Receipt retry for ballot {ballot_id} cannot succeed: {e}");
                    true
                }
                Err(e) => {
                    error!("Receipt retry for ballot {ballot_id} failed: {e}");
                    false
                }
            };

            if give_up {
                tasks.lock().await.remove(&ballot_id);
                trace!("Receipt retry completed; removed self from list");
            } else {
                let retry = Self::retrier(ballot_id, caster, tasks.clone(), interval, max_attempts);
                let retry_time = Utc::now() + interval;
                tasks
                    .lock()
                    .await
                    .insert(ballot_id, ScheduledTask::new(retry, retry_time));
                warn!(
                    "Receipt for ballot {ballot_id} will be retried in {} seconds",
                    interval.num_seconds()
                );
            }
            result.map(|_| ())
        }
        .boxed()
    }
}
