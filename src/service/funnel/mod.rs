mod engine;
mod stage;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    config::FunnelConfig,
    runtime::{ReminderTask, RuntimeError, ScheduledJob, Scheduler, TaskHandler},
    service::{
        lead::{ConversationStage, Language, Lead, LeadPatch, LeadProfile, LeadStatus, LeadStore},
        messenger::{self, Affordance, Messenger},
        ServiceError,
    },
    utils::{is_phone_number, normalize_phone_number, parse_start_payload},
};

pub use engine::{AbortReason, StageEngine, StageOutcome};
pub use stage::{Stage, StageConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Repeated /start inside the debounce window. Nothing changed.
    Debounced,
    Created(Lead),
    Updated(Lead),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextOutcome {
    Phone(Lead),
    City(Lead),
    LanguagePrompted,
    Ignored,
}

/// Sequences the language, phone and city stages for every lead and reacts to
/// the lead's answers.
pub struct FunnelService {
    leads: Arc<dyn LeadStore>,
    scheduler: Arc<dyn Scheduler>,
    messenger: Arc<dyn Messenger>,
    engine: StageEngine,
    config: FunnelConfig,
}

impl FunnelService {
    pub fn new(
        leads: Arc<dyn LeadStore>,
        scheduler: Arc<dyn Scheduler>,
        messenger: Arc<dyn Messenger>,
        config: FunnelConfig,
    ) -> Self {
        let engine = StageEngine::new(
            Arc::clone(&leads),
            Arc::clone(&scheduler),
            Arc::clone(&messenger),
            Duration::from_secs(config.send_retry_backoff_secs),
            config.max_send_retries,
        );

        Self {
            leads,
            scheduler,
            messenger,
            engine,
            config,
        }
    }

    /// Starts the reminder loop of the first incomplete stage. No-op for cold
    /// leads and for leads that already wait on a reminder.
    pub async fn begin(&self, lead: &Lead, now: DateTime<Utc>) -> Result<Option<Stage>, ServiceError> {
        if lead.is_cold() {
            debug!("Lead {} is cold, not starting the funnel", lead.telegram_id);
            return Ok(None);
        }

        if let Some(reminder) = &lead.reminder {
            debug!(
                "Lead {} already waits on a {} reminder",
                lead.telegram_id, reminder.stage
            );
            return Ok(None);
        }

        self.begin_from(lead, Stage::Language, now).await
    }

    async fn begin_from(&self, lead: &Lead, from: Stage, now: DateTime<Utc>) -> Result<Option<Stage>, ServiceError> {
        let Some(stage) = from.from_here().find(|s| !lead.is_stage_complete(*s)) else {
            self.leads
                .update(lead.telegram_id, LeadPatch::new().clear_reminder())
                .await?;
            return Ok(None);
        };

        let task = ReminderTask::first_reminder(lead.telegram_id, lead.chat_id, stage);
        self.engine.schedule(task, stage.config().initial_delay, now).await?;
        info!("Lead {} entered the {} stage", lead.telegram_id, stage);

        Ok(Some(stage))
    }

    /// Drops the lead's tracked reminder job and any leftover timers.
    async fn cancel_reminders(&self, lead: &Lead) -> Result<(), ServiceError> {
        if let Some(job_id) = lead.active_job() {
            self.scheduler.cancel(job_id).await?;
        }
        self.scheduler.cancel_for_lead(lead.telegram_id).await?;
        Ok(())
    }

    /// Handles one durable wake-up and moves the funnel along.
    pub async fn handle_wakeup(&self, job: &ScheduledJob, now: DateTime<Utc>) -> Result<StageOutcome, ServiceError> {
        let outcome = self.engine.run(&job.id, &job.task, now).await?;

        match &outcome {
            StageOutcome::Satisfied(lead) => match job.task.stage.next() {
                Some(next) if !lead.is_cold() => {
                    self.begin_from(lead, next, now).await?;
                }
                _ => {
                    self.leads
                        .update(lead.telegram_id, LeadPatch::new().clear_reminder())
                        .await?;
                }
            },
            StageOutcome::Exhausted { status } => {
                info!(
                    "Funnel for lead {} ended at the {} stage as {}",
                    job.task.telegram_id,
                    job.task.stage,
                    status.as_str()
                );
            }
            StageOutcome::Pending | StageOutcome::Aborted(_) => {}
        }

        Ok(outcome)
    }

    pub async fn handle_start(
        &self,
        profile: LeadProfile,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<StartOutcome, ServiceError> {
        let telegram_id = profile.telegram_id;
        let existing = self.leads.get(telegram_id).await?;

        if let Some(last_start) = existing.as_ref().and_then(|l| l.last_start_time) {
            if now.signed_duration_since(last_start) < chrono::Duration::seconds(self.config.debounce_secs) {
                info!("Debounced /start from lead {}", telegram_id);
                return Ok(StartOutcome::Debounced);
            }
        }

        let payload = parse_start_payload(payload);

        let (lead, created) = match existing {
            Some(_) => {
                let mut patch = LeadPatch::new().profile(&profile).contacted_at(now).started_at(now);
                if let Some(language) = payload.language {
                    patch = patch.language(language).stage(ConversationStage::LanguageSelection);
                }
                if let Some(code) = payload.referral_code {
                    patch = patch.source("referral").referral_code(code);
                }

                let lead = self
                    .leads
                    .update(telegram_id, patch)
                    .await?
                    .ok_or(ServiceError::LeadNotFound(telegram_id))?;
                (lead, false)
            }
            None => {
                let mut lead = Lead::new(profile, now);
                if let Some(language) = payload.language {
                    lead.language = Some(language);
                    lead.conversation_stage = ConversationStage::LanguageSelection;
                }
                if let Some(code) = payload.referral_code {
                    lead.source = "referral".to_string();
                    lead.referral_code = Some(code);
                }

                self.leads.insert(&lead).await?;
                info!("New lead {} (source: {})", lead.telegram_id, lead.source);
                (lead, true)
            }
        };

        self.greet(&lead).await;
        self.begin(&lead, now).await?;

        // re-read so the returned lead carries the reminder tag
        let lead = self.require(telegram_id).await?;
        Ok(if created {
            StartOutcome::Created(lead)
        } else {
            StartOutcome::Updated(lead)
        })
    }

    async fn greet(&self, lead: &Lead) {
        let greeting = messenger::greeting(Some(&lead.first_name));

        // cold leads get the greeting only, no prompts to answer
        if lead.is_cold() {
            self.notify(lead.chat_id, greeting, Affordance::None).await;
            return;
        }

        match lead.language {
            None => {
                let text = format!("{}\n\n{}", greeting, messenger::select_language());
                self.notify(lead.chat_id, text, Affordance::LanguageChoice).await;
            }
            Some(language) => {
                self.notify(lead.chat_id, greeting, Affordance::None).await;
                if lead.phone_number.is_none() {
                    self.notify(lead.chat_id, messenger::ask_phone(language), Affordance::ShareContact(language))
                        .await;
                }
            }
        }
    }

    pub async fn handle_language_selected(
        &self,
        telegram_id: i64,
        language: Language,
        now: DateTime<Utc>,
    ) -> Result<Lead, ServiceError> {
        let lead = self.require(telegram_id).await?;
        self.cancel_reminders(&lead).await?;

        let patch = LeadPatch::new()
            .language(language)
            .stage(ConversationStage::LanguageSelection)
            .contacted_at(now)
            .clear_reminder();
        let lead = self
            .leads
            .update(telegram_id, patch)
            .await?
            .ok_or(ServiceError::LeadNotFound(telegram_id))?;
        info!("Lead {} selected language {}", telegram_id, language);

        self.continue_after_answer(&lead, now).await?;
        Ok(lead)
    }

    pub async fn handle_phone(&self, telegram_id: i64, raw: &str, now: DateTime<Utc>) -> Result<Lead, ServiceError> {
        let lead = self.require(telegram_id).await?;
        self.cancel_reminders(&lead).await?;

        let phone_number = normalize_phone_number(raw);
        let patch = LeadPatch::new()
            .phone_number(phone_number)
            .status(LeadStatus::Contacted)
            .stage(ConversationStage::Qualification)
            .contacted_at(now)
            .clear_reminder();
        let lead = self
            .leads
            .update(telegram_id, patch)
            .await?
            .ok_or(ServiceError::LeadNotFound(telegram_id))?;
        info!("Lead {} shared a phone number", telegram_id);

        self.continue_after_answer(&lead, now).await?;
        Ok(lead)
    }

    pub async fn handle_city(&self, telegram_id: i64, city: &str, now: DateTime<Utc>) -> Result<Lead, ServiceError> {
        let lead = self.require(telegram_id).await?;
        self.cancel_reminders(&lead).await?;

        let follow_up = now + chrono::Duration::days(self.config.follow_up_days);
        let patch = LeadPatch::new()
            .city(city.trim())
            .status(LeadStatus::Interested)
            .stage(ConversationStage::InterestBuilding)
            .follow_up_at(follow_up)
            .contacted_at(now)
            .clear_reminder();
        let lead = self
            .leads
            .update(telegram_id, patch)
            .await?
            .ok_or(ServiceError::LeadNotFound(telegram_id))?;
        info!("Lead {} completed the funnel, follow up at {}", telegram_id, follow_up);

        let language = lead.language.unwrap_or(Language::Uzbek);
        self.notify(lead.chat_id, messenger::final_message(language), Affordance::RemoveKeyboard)
            .await;

        Ok(lead)
    }

    /// Free text is read by what the lead still owes us. A phone number is
    /// taken at any point; anything else only answers the city question once
    /// language and phone are known.
    pub async fn handle_text(&self, telegram_id: i64, text: &str, now: DateTime<Utc>) -> Result<TextOutcome, ServiceError> {
        let lead = self.require(telegram_id).await?;

        let text = text.trim();
        if text.is_empty() || text.starts_with('/') {
            debug!("Ignoring text from lead {}", telegram_id);
            return Ok(TextOutcome::Ignored);
        }

        if lead.phone_number.is_none() && is_phone_number(text) {
            return Ok(TextOutcome::Phone(self.handle_phone(telegram_id, text, now).await?));
        }

        if lead.first_incomplete_stage() == Some(Stage::City) {
            return Ok(TextOutcome::City(self.handle_city(telegram_id, text, now).await?));
        }

        if lead.language.is_none() {
            self.notify(lead.chat_id, messenger::select_language(), Affordance::LanguageChoice)
                .await;
            return Ok(TextOutcome::LanguagePrompted);
        }

        debug!("Ignoring text from lead {}", telegram_id);
        Ok(TextOutcome::Ignored)
    }

    /// Prompts for the next missing field and starts its reminder loop.
    async fn continue_after_answer(&self, lead: &Lead, now: DateTime<Utc>) -> Result<(), ServiceError> {
        let Some(next) = lead.first_incomplete_stage() else {
            return Ok(());
        };

        if let Some((text, affordance)) = prompt_for(next, lead.language) {
            self.notify(lead.chat_id, text, affordance).await;
        }

        if !lead.is_cold() {
            self.begin_from(lead, next, now).await?;
        }
        Ok(())
    }

    async fn require(&self, telegram_id: i64) -> Result<Lead, ServiceError> {
        self.leads
            .get(telegram_id)
            .await?
            .ok_or(ServiceError::LeadNotFound(telegram_id))
    }

    /// Replies to a lead's own action. A failed send is logged and dropped.
    async fn notify(&self, chat_id: i64, text: String, affordance: Affordance) {
        if let Err(e) = self.messenger.send(chat_id, text, affordance).await {
            warn!("Failed to send message to chat {}: {}", chat_id, e);
        }
    }
}

fn prompt_for(stage: Stage, language: Option<Language>) -> Option<(String, Affordance)> {
    match (stage, language) {
        (Stage::Language, _) => Some((messenger::select_language(), Affordance::LanguageChoice)),
        (Stage::Phone, Some(lang)) => Some((messenger::ask_phone(lang), Affordance::ShareContact(lang))),
        (Stage::City, Some(lang)) => Some((messenger::ask_city(lang), Affordance::RemoveKeyboard)),
        _ => None,
    }
}

#[async_trait]
impl TaskHandler for FunnelService {
    async fn handle(&self, job: &ScheduledJob) -> Result<(), RuntimeError> {
        match self.handle_wakeup(job, Utc::now()).await {
            Ok(outcome) => {
                debug!("Job {} finished with {:?}", job.id, outcome);
                Ok(())
            }
            Err(ServiceError::Runtime(e)) => Err(e),
            Err(e) => Err(RuntimeError::TaskError(e.to_string())),
        }
    }
}
