use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

use crate::{
    runtime::{after, JobId, ReminderTask, Scheduler, StageStep},
    service::{
        lead::{ActiveReminder, Language, Lead, LeadPatch, LeadStatus, LeadStore},
        messenger::{self, Affordance, Messenger},
        ServiceError,
    },
};

use super::Stage;

/// Result of one wake-up of a stage loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Another wake-up is scheduled.
    Pending,
    /// The stage's field is present. Carries the fresh lead.
    Satisfied(Lead),
    /// Attempts ran out and `status` was applied.
    Exhausted { status: LeadStatus },
    Aborted(AbortReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    NotFound,
    Stale,
    Cold,
    MissingLanguage,
    SendGaveUp,
}

/// Runs a single stage's remind / verify loop, one durable wake-up at a time.
/// Every wake-up re-reads the lead, so cancellation only needs the tag to move.
pub struct StageEngine {
    leads: Arc<dyn LeadStore>,
    scheduler: Arc<dyn Scheduler>,
    messenger: Arc<dyn Messenger>,
    send_retry_backoff: Duration,
    max_send_retries: u32,
}

impl StageEngine {
    pub fn new(
        leads: Arc<dyn LeadStore>,
        scheduler: Arc<dyn Scheduler>,
        messenger: Arc<dyn Messenger>,
        send_retry_backoff: Duration,
        max_send_retries: u32,
    ) -> Self {
        Self {
            leads,
            scheduler,
            messenger,
            send_retry_backoff,
            max_send_retries,
        }
    }

    pub async fn run(&self, job_id: &JobId, task: &ReminderTask, now: DateTime<Utc>) -> Result<StageOutcome, ServiceError> {
        let stage = task.stage;

        let Some(lead) = self.leads.get(task.telegram_id).await? else {
            warn!("Lead {} not found, dropping {} reminder", task.telegram_id, stage);
            return Ok(StageOutcome::Aborted(AbortReason::NotFound));
        };

        if lead.active_job() != Some(job_id) {
            debug!("Stale {} job {} for lead {}", stage, job_id, lead.telegram_id);
            return Ok(StageOutcome::Aborted(AbortReason::Stale));
        }

        if lead.is_stage_complete(stage) {
            debug!("Lead {} already completed {} stage", lead.telegram_id, stage);
            return Ok(StageOutcome::Satisfied(lead));
        }

        if lead.is_cold() {
            self.clear_reminder(lead.telegram_id).await?;
            return Ok(StageOutcome::Aborted(AbortReason::Cold));
        }

        match task.step {
            StageStep::Remind { attempt, send_failures } => {
                self.remind(&lead, task, attempt, send_failures, now).await
            }
            StageStep::Verify { attempt } => self.verify(&lead, task, attempt, now).await,
        }
    }

    async fn remind(
        &self,
        lead: &Lead,
        task: &ReminderTask,
        attempt: u32,
        send_failures: u32,
        now: DateTime<Utc>,
    ) -> Result<StageOutcome, ServiceError> {
        let stage = task.stage;
        let config = stage.config();

        if lead.attempts(stage) >= config.max_attempts {
            return self.finalize(lead, stage).await;
        }

        let Some((text, affordance)) = reminder_message(stage, lead.language, attempt) else {
            error!(
                "Lead {} has no language at the {} stage, stopping reminders",
                lead.telegram_id, stage
            );
            self.clear_reminder(lead.telegram_id).await?;
            return Ok(StageOutcome::Aborted(AbortReason::MissingLanguage));
        };

        if let Err(e) = self.messenger.send(task.chat_id, text, affordance).await {
            if send_failures >= self.max_send_retries {
                warn!(
                    "Giving up on {} reminder {} for lead {} after {} failed sends: {}",
                    stage, attempt, lead.telegram_id, send_failures, e
                );
                self.clear_reminder(lead.telegram_id).await?;
                return Ok(StageOutcome::Aborted(AbortReason::SendGaveUp));
            }

            warn!(
                "Failed to send {} reminder {} to lead {}: {}, retrying in {:?}",
                stage, attempt, lead.telegram_id, e, self.send_retry_backoff
            );
            let retry = task.with_step(StageStep::Remind {
                attempt,
                send_failures: send_failures + 1,
            });
            self.schedule(retry, self.send_retry_backoff, now).await?;
            return Ok(StageOutcome::Pending);
        }

        let Some(updated) = self
            .leads
            .increment_attempts(lead.telegram_id, stage, config.max_attempts, now)
            .await?
        else {
            return self.finalize(lead, stage).await;
        };

        info!(
            "Sent {} reminder {} to lead {} ({}/{})",
            stage,
            attempt,
            lead.telegram_id,
            updated.attempts(stage),
            config.max_attempts
        );

        self.schedule(
            task.with_step(StageStep::Verify { attempt }),
            config.response_window,
            now,
        )
        .await?;
        Ok(StageOutcome::Pending)
    }

    async fn verify(
        &self,
        lead: &Lead,
        task: &ReminderTask,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<StageOutcome, ServiceError> {
        let config = task.stage.config();

        if lead.attempts(task.stage) >= config.max_attempts {
            return self.finalize(lead, task.stage).await;
        }

        let next = task.with_step(StageStep::Remind {
            attempt: attempt + 1,
            send_failures: 0,
        });
        self.schedule(next, config.retry_delay, now).await?;
        Ok(StageOutcome::Pending)
    }

    async fn finalize(&self, lead: &Lead, stage: Stage) -> Result<StageOutcome, ServiceError> {
        let exhaust = stage.config().on_exhaust;

        let updated = self
            .leads
            .update(lead.telegram_id, LeadPatch::new().status(exhaust).clear_reminder())
            .await?;
        let cancelled = self.scheduler.cancel_for_lead(lead.telegram_id).await?;

        let status = updated.map(|l| l.status).unwrap_or(exhaust);
        info!(
            "Lead {} exhausted the {} stage, status is now {} ({} timers cancelled)",
            lead.telegram_id,
            stage,
            status.as_str(),
            cancelled
        );

        Ok(StageOutcome::Exhausted { status })
    }

    /// Schedules `task` and points the lead's reminder tag at it.
    pub async fn schedule(&self, task: ReminderTask, delay: Duration, now: DateTime<Utc>) -> Result<JobId, ServiceError> {
        let telegram_id = task.telegram_id;
        let stage = task.stage;
        let job_id = self.scheduler.schedule_after(delay, task).await?;

        let reminder = ActiveReminder {
            stage,
            job_id: job_id.clone(),
            next_at: after(now, delay)?,
        };
        self.leads
            .update(telegram_id, LeadPatch::new().reminder(reminder))
            .await?;

        Ok(job_id)
    }

    async fn clear_reminder(&self, telegram_id: i64) -> Result<(), ServiceError> {
        self.leads
            .update(telegram_id, LeadPatch::new().clear_reminder())
            .await?;
        Ok(())
    }
}

/// Reminder text and affordance for a stage. `None` when the stage needs a
/// language the lead has not chosen.
fn reminder_message(stage: Stage, language: Option<Language>, attempt: u32) -> Option<(String, Affordance)> {
    match stage {
        Stage::Language => Some((messenger::language_reminder(attempt), Affordance::LanguageChoice)),
        Stage::Phone => {
            language.map(|lang| (messenger::phone_reminder(lang), Affordance::ShareContact(lang)))
        }
        Stage::City => language.map(|lang| (messenger::city_reminder(lang), Affordance::None)),
    }
}
