use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    config::{new_test_config, FunnelConfig},
    runtime::{LibSqlScheduler, ReminderTask, ReminderWorker, ScheduledJob, StageStep},
    service::{
        funnel::{AbortReason, FunnelService, Stage, StageOutcome, StartOutcome, TextOutcome},
        lead::{ActiveReminder, ConversationStage, Language, Lead, LeadPatch, LeadProfile, LeadStatus, LeadStore},
        messenger::{self, testing::RecordingMessenger, Affordance},
        LibSqlLeadStore, ServiceError,
    },
    storage::TursoClient,
};

const LEAD: i64 = 1001;

struct Harness {
    _client: TursoClient,
    leads: Arc<LibSqlLeadStore>,
    scheduler: LibSqlScheduler,
    messenger: Arc<RecordingMessenger>,
    funnel: Arc<FunnelService>,
}

async fn harness() -> Harness {
    let client = TursoClient::new_memory().await.unwrap();
    let leads = Arc::new(LibSqlLeadStore::new(client.connection()));
    let scheduler = LibSqlScheduler::new(client.connection());
    let messenger = Arc::new(RecordingMessenger::default());

    let funnel = Arc::new(FunnelService::new(
        leads.clone(),
        Arc::new(scheduler.clone()),
        messenger.clone(),
        FunnelConfig::default(),
    ));

    Harness {
        _client: client,
        leads,
        scheduler,
        messenger,
        funnel,
    }
}

fn profile() -> LeadProfile {
    LeadProfile {
        telegram_id: LEAD,
        chat_id: LEAD,
        first_name: "Aziz".to_string(),
        last_name: None,
        username: Some("aziz".to_string()),
        is_bot: false,
    }
}

impl Harness {
    async fn lead(&self) -> Lead {
        self.leads.get(LEAD).await.unwrap().unwrap()
    }

    async fn start(&self, payload: &str, now: DateTime<Utc>) -> StartOutcome {
        self.funnel.handle_start(profile(), payload, now).await.unwrap()
    }

    /// Claims the earliest pending job, as if the clock jumped to its run time.
    async fn fire_next(&self) -> Option<(ScheduledJob, StageOutcome)> {
        let far = Utc::now() + Duration::days(30);
        let job = self.scheduler.claim_due(far, 1).await.unwrap().pop()?;
        let outcome = self.funnel.handle_wakeup(&job, job.run_at).await.unwrap();
        self.scheduler.complete(&job.id).await.unwrap();
        Some((job, outcome))
    }

    async fn drain(&self) -> Vec<(ScheduledJob, StageOutcome)> {
        let mut fired = Vec::new();
        while let Some(step) = self.fire_next().await {
            fired.push(step);
            assert!(fired.len() < 50, "reminder loop never terminated");
        }
        fired
    }

    async fn pending(&self) -> Vec<ScheduledJob> {
        self.scheduler.pending_for(LEAD).await.unwrap()
    }
}

/// Wall clock truncated to the millisecond precision the store keeps.
fn clock() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
}

fn outcomes(fired: &[(ScheduledJob, StageOutcome)]) -> Vec<StageOutcome> {
    fired.iter().map(|(_, outcome)| outcome.clone()).collect()
}

#[test]
fn test_config_defaults_match_funnel() {
    let config = new_test_config();
    assert_eq!(config.funnel.debounce_secs, 30);
    assert_eq!(config.funnel.max_send_retries, 3);
    assert_eq!(config.funnel.follow_up_days, 7);
}

#[tokio::test]
async fn test_start_is_debounced_within_thirty_seconds() {
    let h = harness().await;
    let t0 = clock();

    assert!(matches!(h.start("", t0).await, StartOutcome::Created(_)));
    assert_eq!(h.start("", t0 + Duration::seconds(10)).await, StartOutcome::Debounced);
    assert_eq!(h.lead().await.last_start_time, Some(t0));
    assert_eq!(h.messenger.sent().len(), 1);

    assert!(matches!(h.start("", t0 + Duration::seconds(31)).await, StartOutcome::Updated(_)));
    assert_eq!(h.lead().await.last_start_time, Some(t0 + Duration::seconds(31)));
    assert_eq!(h.messenger.sent().len(), 2);

    // the language loop is already running, a refresh does not start another
    assert_eq!(h.pending().await.len(), 1);
}

#[tokio::test]
async fn test_silent_lead_goes_cold_after_three_language_reminders() {
    let h = harness().await;
    let t0 = clock();
    h.start("", t0).await;

    let lead = h.lead().await;
    assert_eq!(lead.status, LeadStatus::New);
    assert_eq!(lead.conversation_stage, ConversationStage::Greeting);
    let reminder = lead.reminder.unwrap();
    assert_eq!(reminder.stage, Stage::Language);
    assert_eq!(reminder.next_at - t0, Duration::seconds(90));

    let sent = h.messenger.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].affordance, Affordance::LanguageChoice);
    assert!(sent[0].text.starts_with(&messenger::greeting(Some("Aziz"))));

    // response window after a reminder, retry delay after a verify
    let (remind, first) = h.fire_next().await.unwrap();
    assert_eq!(h.lead().await.reminder.unwrap().next_at - remind.run_at, Duration::seconds(60));
    let (verify, second) = h.fire_next().await.unwrap();
    assert_eq!(h.lead().await.reminder.unwrap().next_at - verify.run_at, Duration::seconds(120));

    let mut fired = vec![(remind, first), (verify, second)];
    fired.extend(h.drain().await);
    assert_eq!(
        outcomes(&fired),
        vec![
            StageOutcome::Pending,
            StageOutcome::Pending,
            StageOutcome::Pending,
            StageOutcome::Pending,
            StageOutcome::Pending,
            StageOutcome::Exhausted {
                status: LeadStatus::Cold
            },
        ]
    );

    let steps: Vec<StageStep> = fired.iter().map(|(job, _)| job.task.step).collect();
    assert_eq!(
        steps,
        vec![
            StageStep::Remind {
                attempt: 1,
                send_failures: 0
            },
            StageStep::Verify { attempt: 1 },
            StageStep::Remind {
                attempt: 2,
                send_failures: 0
            },
            StageStep::Verify { attempt: 2 },
            StageStep::Remind {
                attempt: 3,
                send_failures: 0
            },
            StageStep::Verify { attempt: 3 },
        ]
    );

    let texts = h.messenger.texts();
    assert_eq!(
        texts[1..],
        [
            messenger::language_reminder(1),
            messenger::language_reminder(2),
            messenger::language_reminder(3),
        ]
    );

    let lead = h.lead().await;
    assert_eq!(lead.status, LeadStatus::Cold);
    assert_eq!(lead.language_prompt_attempts, 3);
    assert_eq!(lead.phone_prompt_attempts, 0);
    assert!(lead.reminder.is_none());
    assert!(h.pending().await.is_empty());
}

#[tokio::test]
async fn test_cold_lead_is_not_restarted() {
    let h = harness().await;
    let t0 = clock();
    h.start("", t0).await;
    h.drain().await;
    assert!(h.lead().await.is_cold());

    h.start("", t0 + Duration::hours(1)).await;
    assert!(h.pending().await.is_empty());
    assert_eq!(h.lead().await.language_prompt_attempts, 3);

    let last = h.messenger.sent().pop().unwrap();
    assert_eq!(last.text, messenger::greeting(Some("Aziz")));
    assert_eq!(last.affordance, Affordance::None);
}

#[tokio::test]
async fn test_phone_exhaustion_marks_cold_and_skips_city() {
    let h = harness().await;
    h.start("lang_uz", Utc::now()).await;

    let lead = h.lead().await;
    assert_eq!(lead.language, Some(Language::Uzbek));
    assert_eq!(lead.reminder.unwrap().stage, Stage::Phone);

    let texts = h.messenger.texts();
    assert_eq!(texts.len(), 2);
    assert_eq!(texts[1], messenger::ask_phone(Language::Uzbek));

    let fired = h.drain().await;
    assert_eq!(fired.len(), 6);
    assert!(fired.iter().all(|(job, _)| job.task.stage == Stage::Phone));
    assert_eq!(
        fired.last().map(|(_, outcome)| outcome.clone()),
        Some(StageOutcome::Exhausted {
            status: LeadStatus::Cold
        })
    );

    let lead = h.lead().await;
    assert_eq!(lead.status, LeadStatus::Cold);
    assert_eq!(lead.language_prompt_attempts, 0);
    assert_eq!(lead.phone_prompt_attempts, 3);
    assert_eq!(lead.city_prompt_attempts, 0);

    let reminders = h.messenger.sent().into_iter().skip(2).collect::<Vec<_>>();
    assert_eq!(reminders.len(), 3);
    assert!(reminders
        .iter()
        .all(|m| m.affordance == Affordance::ShareContact(Language::Uzbek)));
}

#[tokio::test]
async fn test_city_exhaustion_still_counts_as_interested() {
    let h = harness().await;
    let now = clock();
    h.start("lang_ru", now).await;
    h.funnel.handle_phone(LEAD, "+998 90 123 45 67", now).await.unwrap();

    let lead = h.lead().await;
    assert_eq!(lead.status, LeadStatus::Contacted);
    assert_eq!(lead.reminder.as_ref().unwrap().stage, Stage::City);
    assert_eq!(h.messenger.texts().last().unwrap(), &messenger::ask_city(Language::Russian));

    let fired = h.drain().await;
    assert_eq!(fired.len(), 6);
    assert_eq!(
        fired.last().map(|(_, outcome)| outcome.clone()),
        Some(StageOutcome::Exhausted {
            status: LeadStatus::Interested
        })
    );

    let lead = h.lead().await;
    assert_eq!(lead.status, LeadStatus::Interested);
    assert_eq!(lead.city_prompt_attempts, 3);
    assert!(lead.city.is_none());
    assert!(h.pending().await.is_empty());
}

#[tokio::test]
async fn test_language_answer_mid_loop_moves_to_phone() {
    let h = harness().await;
    let now = clock();
    h.start("", now).await;

    let (_, outcome) = h.fire_next().await.unwrap();
    assert_eq!(outcome, StageOutcome::Pending);
    assert_eq!(h.lead().await.language_prompt_attempts, 1);

    let lead = h.funnel.handle_language_selected(LEAD, Language::Russian, now).await.unwrap();
    assert_eq!(lead.conversation_stage, ConversationStage::LanguageSelection);

    let pending = h.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task.stage, Stage::Phone);

    let last = h.messenger.sent().pop().unwrap();
    assert_eq!(last.text, messenger::ask_phone(Language::Russian));
    assert_eq!(last.affordance, Affordance::ShareContact(Language::Russian));

    let (job, _) = h.fire_next().await.unwrap();
    assert_eq!(job.task.stage, Stage::Phone);

    let lead = h.lead().await;
    assert_eq!(lead.language_prompt_attempts, 1);
    assert_eq!(lead.phone_prompt_attempts, 1);
}

#[tokio::test]
async fn test_phone_by_free_text_during_language_selection() {
    let h = harness().await;
    let now = clock();
    h.start("", now).await;
    h.funnel.handle_language_selected(LEAD, Language::Uzbek, now).await.unwrap();

    let outcome = h.funnel.handle_text(LEAD, "998 90 123 45 67", now).await.unwrap();
    let TextOutcome::Phone(lead) = outcome else {
        panic!("expected a phone answer, got {:?}", outcome);
    };

    assert_eq!(lead.phone_number.as_deref(), Some("+998901234567"));
    assert_eq!(lead.conversation_stage, ConversationStage::Qualification);
    assert_eq!(lead.status, LeadStatus::Contacted);

    let last = h.messenger.sent().pop().unwrap();
    assert_eq!(last.text, messenger::ask_city(Language::Uzbek));
    assert_eq!(last.affordance, Affordance::RemoveKeyboard);

    let pending = h.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task.stage, Stage::City);
}

#[tokio::test]
async fn test_full_round_trip() {
    let h = harness().await;
    let now = clock();
    h.start("ref_spring", now).await;
    h.funnel.handle_language_selected(LEAD, Language::Karakalpak, now).await.unwrap();
    h.funnel.handle_phone(LEAD, "998901234567", now).await.unwrap();

    let outcome = h.funnel.handle_text(LEAD, "  Nukus ", now).await.unwrap();
    let TextOutcome::City(lead) = outcome else {
        panic!("expected a city answer, got {:?}", outcome);
    };

    assert_eq!(lead.city.as_deref(), Some("Nukus"));
    assert_eq!(lead.status, LeadStatus::Interested);
    assert_eq!(lead.conversation_stage, ConversationStage::InterestBuilding);
    assert_eq!(lead.next_follow_up_at, Some(now + Duration::days(7)));
    assert_eq!(lead.source, "referral");
    assert_eq!(lead.referral_code.as_deref(), Some("spring"));
    assert!(lead.reminder.is_none());
    assert!(h.pending().await.is_empty());

    let last = h.messenger.sent().pop().unwrap();
    assert_eq!(last.text, messenger::final_message(Language::Karakalpak));

    assert!(h.drain().await.is_empty());
    assert_ne!(h.lead().await.status, LeadStatus::Cold);

    // later chatter is ignored
    assert_eq!(h.funnel.handle_text(LEAD, "thanks", now).await.unwrap(), TextOutcome::Ignored);
}

#[tokio::test]
async fn test_text_without_language_resends_prompt() {
    let h = harness().await;
    let now = clock();
    h.start("", now).await;

    let outcome = h.funnel.handle_text(LEAD, "hello", now).await.unwrap();
    assert_eq!(outcome, TextOutcome::LanguagePrompted);

    let last = h.messenger.sent().pop().unwrap();
    assert_eq!(last.text, messenger::select_language());
    assert_eq!(last.affordance, Affordance::LanguageChoice);
    assert_eq!(h.lead().await.language_prompt_attempts, 0);
}

#[tokio::test]
async fn test_text_after_phone_without_language_is_not_the_city() {
    let h = harness().await;
    let now = clock();
    h.start("", now).await;

    let outcome = h.funnel.handle_text(LEAD, "+998 90 123 45 67", now).await.unwrap();
    assert!(matches!(outcome, TextOutcome::Phone(_)));

    let outcome = h.funnel.handle_text(LEAD, "Russian", now).await.unwrap();
    assert_eq!(outcome, TextOutcome::LanguagePrompted);

    let lead = h.lead().await;
    assert_eq!(lead.city, None);
    assert_eq!(lead.language, None);
    assert_eq!(lead.status, LeadStatus::Contacted);
    assert_eq!(lead.reminder.unwrap().stage, Stage::Language);

    let pending = h.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task.stage, Stage::Language);
}

#[tokio::test]
async fn test_commands_are_not_taken_as_answers() {
    let h = harness().await;
    let now = clock();
    h.start("lang_uz", now).await;
    h.funnel.handle_phone(LEAD, "+998901234567", now).await.unwrap();
    let sent_before = h.messenger.sent().len();

    for command in ["/help", "/start@otherbot"] {
        let outcome = h.funnel.handle_text(LEAD, command, now).await.unwrap();
        assert_eq!(outcome, TextOutcome::Ignored);
    }

    let lead = h.lead().await;
    assert_eq!(lead.city, None);
    assert_eq!(lead.reminder.unwrap().stage, Stage::City);
    assert_eq!(h.messenger.sent().len(), sent_before);
}

#[tokio::test]
async fn test_late_start_payload_is_picked_up_by_the_running_reminder() {
    let h = harness().await;
    let t0 = clock();
    h.start("", t0).await;

    let (remind, outcome) = h.fire_next().await.unwrap();
    assert_eq!(remind.task.stage, Stage::Language);
    assert_eq!(outcome, StageOutcome::Pending);

    // the language arrives through the payload while the language loop is live
    assert!(matches!(h.start("lang_ru", t0 + Duration::seconds(100)).await, StartOutcome::Updated(_)));
    let lead = h.lead().await;
    assert_eq!(lead.language, Some(Language::Russian));
    assert_eq!(lead.reminder.unwrap().stage, Stage::Language);
    assert_eq!(h.messenger.texts().last().unwrap(), &messenger::ask_phone(Language::Russian));

    let (verify, outcome) = h.fire_next().await.unwrap();
    assert_eq!(verify.task.stage, Stage::Language);
    assert!(matches!(outcome, StageOutcome::Satisfied(_)));

    let pending = h.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task.stage, Stage::Phone);
    assert_eq!(
        pending[0].task.step,
        StageStep::Remind {
            attempt: 1,
            send_failures: 0
        }
    );

    let lead = h.lead().await;
    assert_eq!(lead.reminder.unwrap().stage, Stage::Phone);
    assert_eq!(lead.language_prompt_attempts, 1);
    assert_eq!(lead.phone_prompt_attempts, 0);
}

#[tokio::test]
async fn test_unknown_lead_is_not_found() {
    let h = harness().await;
    let err = h
        .funnel
        .handle_language_selected(LEAD, Language::Uzbek, Utc::now())
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::LeadNotFound(LEAD)));
    assert!(h.messenger.sent().is_empty());
}

#[tokio::test]
async fn test_send_failure_does_not_consume_attempt() {
    let h = harness().await;
    h.start("", Utc::now()).await;
    h.messenger.fail_next(1);

    let (first, outcome) = h.fire_next().await.unwrap();
    assert_eq!(outcome, StageOutcome::Pending);
    assert_eq!(h.lead().await.language_prompt_attempts, 0);

    let pending = h.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(
        pending[0].task.step,
        StageStep::Remind {
            attempt: 1,
            send_failures: 1
        }
    );
    assert_eq!(h.lead().await.reminder.unwrap().next_at - first.run_at, Duration::seconds(30));

    h.fire_next().await.unwrap();
    assert_eq!(h.lead().await.language_prompt_attempts, 1);
    assert_eq!(h.messenger.texts().last().unwrap(), &messenger::language_reminder(1));
}

#[tokio::test]
async fn test_send_retries_give_up_silently() {
    let h = harness().await;
    h.start("", Utc::now()).await;
    h.messenger.fail_next(10);

    let fired = h.drain().await;
    assert_eq!(fired.len(), 4);
    assert_eq!(
        fired.last().map(|(_, outcome)| outcome.clone()),
        Some(StageOutcome::Aborted(AbortReason::SendGaveUp))
    );

    let lead = h.lead().await;
    assert_eq!(lead.language_prompt_attempts, 0);
    assert_eq!(lead.status, LeadStatus::New);
    assert!(lead.reminder.is_none());
}

#[tokio::test]
async fn test_stale_job_is_a_noop() {
    let h = harness().await;
    let now = clock();
    h.start("", now).await;

    let far = Utc::now() + Duration::days(1);
    let stale = h.scheduler.claim_due(far, 1).await.unwrap().pop().unwrap();

    h.funnel.handle_language_selected(LEAD, Language::Russian, now).await.unwrap();
    let sent_before = h.messenger.sent().len();

    let outcome = h.funnel.handle_wakeup(&stale, stale.run_at).await.unwrap();
    assert_eq!(outcome, StageOutcome::Aborted(AbortReason::Stale));
    assert_eq!(h.messenger.sent().len(), sent_before);
    assert_eq!(h.lead().await.language_prompt_attempts, 0);
    assert_eq!(h.lead().await.reminder.unwrap().stage, Stage::Phone);
}

#[tokio::test]
async fn test_phone_stage_without_language_stops_quietly() {
    let h = harness().await;
    let now = clock();
    h.leads.insert(&Lead::new(profile(), now)).await.unwrap();

    let task = ReminderTask::first_reminder(LEAD, LEAD, Stage::Phone);
    let job_id = h.scheduler.schedule_at(now, task).await.unwrap();
    let reminder = ActiveReminder {
        stage: Stage::Phone,
        job_id,
        next_at: now,
    };
    h.leads.update(LEAD, LeadPatch::new().reminder(reminder)).await.unwrap();

    let (_, outcome) = h.fire_next().await.unwrap();
    assert_eq!(outcome, StageOutcome::Aborted(AbortReason::MissingLanguage));
    assert!(h.messenger.sent().is_empty());
    assert!(h.lead().await.reminder.is_none());
    assert_eq!(h.lead().await.phone_prompt_attempts, 0);
}

#[tokio::test]
async fn test_worker_drives_funnel() {
    let h = harness().await;
    h.start("lang_ru", Utc::now()).await;

    let worker = ReminderWorker::new(
        "reminder",
        h.scheduler.clone(),
        h.funnel.clone(),
        &new_test_config().runtime,
    );

    let far = Utc::now() + Duration::days(1);
    for handle in worker.tick(far).await.unwrap() {
        handle.await.unwrap();
    }

    let lead = h.lead().await;
    assert_eq!(lead.phone_prompt_attempts, 1);
    assert_eq!(h.messenger.texts().last().unwrap(), &messenger::phone_reminder(Language::Russian));

    let pending = h.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task.step, StageStep::Verify { attempt: 1 });
}
