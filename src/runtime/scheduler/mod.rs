use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Value};

use crate::storage::{from_millis, to_millis};

use super::{
    task::{JobId, ReminderTask, ScheduledJob},
    RuntimeError,
};

const PENDING: &str = "pending";
const RUNNING: &str = "running";
const DONE: &str = "done";
const CANCELLED: &str = "cancelled";
const FAILED: &str = "failed";

/// Durable delayed execution. Jobs fire at or after their delay and survive
/// restarts. Cancellation is best effort: a job that already fired must be
/// made harmless by its handler.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule_after(&self, delay: Duration, task: ReminderTask) -> Result<JobId, RuntimeError>;

    /// `true` when a pending job was cancelled.
    async fn cancel(&self, job_id: &JobId) -> Result<bool, RuntimeError>;

    /// Cancels every pending job of one lead.
    async fn cancel_for_lead(&self, telegram_id: i64) -> Result<u64, RuntimeError>;
}

pub fn after(now: DateTime<Utc>, delay: Duration) -> Result<DateTime<Utc>, RuntimeError> {
    let delay = chrono::Duration::from_std(delay).map_err(|e| RuntimeError::Delay(e.to_string()))?;
    now.checked_add_signed(delay)
        .ok_or_else(|| RuntimeError::Delay("timestamp overflow".to_string()))
}

#[derive(Clone)]
pub struct LibSqlScheduler {
    conn: Connection,
}

impl LibSqlScheduler {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub async fn schedule_at(&self, run_at: DateTime<Utc>, task: ReminderTask) -> Result<JobId, RuntimeError> {
        let id = JobId::new();
        let payload = serde_json::to_string(&task)?;

        self.conn
            .execute(
                "INSERT INTO scheduled_jobs (id, telegram_id, task, run_at, state, failures, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                vec![
                    Value::Text(id.as_str().to_string()),
                    Value::Integer(task.telegram_id),
                    Value::Text(payload),
                    Value::Integer(to_millis(run_at)),
                    Value::Text(PENDING.to_string()),
                    Value::Integer(to_millis(Utc::now())),
                ],
            )
            .await?;

        debug!(
            "Scheduled job {} ({} {:?}) for lead {} at {}",
            id, task.stage, task.step, task.telegram_id, run_at
        );
        Ok(id)
    }

    /// Moves up to `limit` due jobs from pending to running and returns them.
    /// A job another poller claimed first is skipped.
    pub async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledJob>, RuntimeError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, task, run_at, failures FROM scheduled_jobs \
                 WHERE state = ?1 AND run_at <= ?2 ORDER BY run_at LIMIT ?3",
                vec![
                    Value::Text(PENDING.to_string()),
                    Value::Integer(to_millis(now)),
                    Value::Integer(limit as i64),
                ],
            )
            .await?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next().await? {
            candidates.push((
                row.get::<String>(0)?,
                row.get::<String>(1)?,
                row.get::<i64>(2)?,
                row.get::<i64>(3)?,
            ));
        }

        let mut claimed = Vec::with_capacity(candidates.len());
        for (id, payload, run_at, failures) in candidates {
            let id = JobId::from(id);

            let task = match serde_json::from_str::<ReminderTask>(&payload) {
                Ok(task) => task,
                Err(e) => {
                    error!("Dropping job {} with unreadable payload: {}", id, e);
                    self.set_state(&id, FAILED).await?;
                    continue;
                }
            };

            if !self.transition(&id, PENDING, RUNNING).await? {
                continue;
            }

            claimed.push(ScheduledJob {
                id,
                task,
                run_at: from_millis(run_at)?,
                failures: u32::try_from(failures).unwrap_or(u32::MAX),
            });
        }

        Ok(claimed)
    }

    pub async fn complete(&self, job_id: &JobId) -> Result<(), RuntimeError> {
        self.set_state(job_id, DONE).await
    }

    /// Hands a claimed job back without counting a failure.
    pub async fn release(&self, job_id: &JobId) -> Result<(), RuntimeError> {
        self.transition(job_id, RUNNING, PENDING).await?;
        Ok(())
    }

    /// Reschedules a failed job after `backoff`, or marks it failed once it
    /// has failed `max_failures` times. Returns `true` when rescheduled.
    pub async fn retry_later(
        &self,
        job_id: &JobId,
        backoff: Duration,
        max_failures: u32,
    ) -> Result<bool, RuntimeError> {
        let run_at = after(Utc::now(), backoff)?;
        let changed = self
            .conn
            .execute(
                "UPDATE scheduled_jobs SET state = ?1, run_at = ?2, failures = failures + 1 \
                 WHERE id = ?3 AND failures + 1 < ?4",
                vec![
                    Value::Text(PENDING.to_string()),
                    Value::Integer(to_millis(run_at)),
                    Value::Text(job_id.as_str().to_string()),
                    Value::Integer(max_failures as i64),
                ],
            )
            .await?;

        if changed == 0 {
            warn!("Job {} exhausted its retries", job_id);
            self.set_state(job_id, FAILED).await?;
            return Ok(false);
        }

        Ok(true)
    }

    /// Jobs left running by a previous process go back to pending.
    pub async fn recover_stale(&self) -> Result<u64, RuntimeError> {
        let recovered = self
            .conn
            .execute(
                "UPDATE scheduled_jobs SET state = ?1 WHERE state = ?2",
                vec![Value::Text(PENDING.to_string()), Value::Text(RUNNING.to_string())],
            )
            .await?;

        if recovered > 0 {
            info!("Recovered {} interrupted jobs", recovered);
        }
        Ok(recovered)
    }

    pub async fn pending_for(&self, telegram_id: i64) -> Result<Vec<ScheduledJob>, RuntimeError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, task, run_at, failures FROM scheduled_jobs \
                 WHERE telegram_id = ?1 AND state = ?2 ORDER BY run_at",
                vec![Value::Integer(telegram_id), Value::Text(PENDING.to_string())],
            )
            .await?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await? {
            jobs.push(ScheduledJob {
                id: JobId::from(row.get::<String>(0)?),
                task: serde_json::from_str(&row.get::<String>(1)?)?,
                run_at: from_millis(row.get::<i64>(2)?)?,
                failures: u32::try_from(row.get::<i64>(3)?).unwrap_or(u32::MAX),
            });
        }

        Ok(jobs)
    }

    async fn transition(&self, job_id: &JobId, from: &str, to: &str) -> Result<bool, RuntimeError> {
        let changed = self
            .conn
            .execute(
                "UPDATE scheduled_jobs SET state = ?1 WHERE id = ?2 AND state = ?3",
                vec![
                    Value::Text(to.to_string()),
                    Value::Text(job_id.as_str().to_string()),
                    Value::Text(from.to_string()),
                ],
            )
            .await?;
        Ok(changed == 1)
    }

    async fn set_state(&self, job_id: &JobId, state: &str) -> Result<(), RuntimeError> {
        self.conn
            .execute(
                "UPDATE scheduled_jobs SET state = ?1 WHERE id = ?2",
                vec![Value::Text(state.to_string()), Value::Text(job_id.as_str().to_string())],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Scheduler for LibSqlScheduler {
    async fn schedule_after(&self, delay: Duration, task: ReminderTask) -> Result<JobId, RuntimeError> {
        let run_at = after(Utc::now(), delay)?;
        self.schedule_at(run_at, task).await
    }

    async fn cancel(&self, job_id: &JobId) -> Result<bool, RuntimeError> {
        let cancelled = self.transition(job_id, PENDING, CANCELLED).await?;
        if cancelled {
            debug!("Cancelled job {}", job_id);
        }
        Ok(cancelled)
    }

    async fn cancel_for_lead(&self, telegram_id: i64) -> Result<u64, RuntimeError> {
        let cancelled = self
            .conn
            .execute(
                "UPDATE scheduled_jobs SET state = ?1 WHERE telegram_id = ?2 AND state = ?3",
                vec![
                    Value::Text(CANCELLED.to_string()),
                    Value::Integer(telegram_id),
                    Value::Text(PENDING.to_string()),
                ],
            )
            .await?;
        Ok(cancelled)
    }
}
