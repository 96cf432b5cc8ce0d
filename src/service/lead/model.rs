use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{runtime::JobId, service::funnel::Stage};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Language {
    #[serde(rename = "uz")]
    Uzbek,
    #[serde(rename = "ru")]
    Russian,
    #[serde(rename = "kk")]
    Karakalpak,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::Uzbek => "uz",
            Language::Russian => "ru",
            Language::Karakalpak => "kk",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uz" | "uzbek" => Ok(Language::Uzbek),
            "ru" | "russian" => Ok(Language::Russian),
            "kk" | "karakalpak" => Ok(Language::Karakalpak),
            _ => Err(format!("Unknown language code: {}", s)),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// `Cold` is terminal: the store never moves a lead out of it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    New,
    Contacted,
    Interested,
    Cold,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Interested => "interested",
            LeadStatus::Cold => "cold",
        }
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(LeadStatus::New),
            "contacted" => Ok(LeadStatus::Contacted),
            "interested" => Ok(LeadStatus::Interested),
            "cold" => Ok(LeadStatus::Cold),
            _ => Err(format!("Unknown lead status: {}", s)),
        }
    }
}

/// Declaration order is funnel order; the store only ever moves forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStage {
    Greeting,
    LanguageSelection,
    Qualification,
    InterestBuilding,
}

impl ConversationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStage::Greeting => "greeting",
            ConversationStage::LanguageSelection => "language_selection",
            ConversationStage::Qualification => "qualification",
            ConversationStage::InterestBuilding => "interest_building",
        }
    }

    pub fn rank(&self) -> i64 {
        *self as i64
    }
}

impl FromStr for ConversationStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greeting" => Ok(ConversationStage::Greeting),
            "language_selection" => Ok(ConversationStage::LanguageSelection),
            "qualification" => Ok(ConversationStage::Qualification),
            "interest_building" => Ok(ConversationStage::InterestBuilding),
            _ => Err(format!("Unknown conversation stage: {}", s)),
        }
    }
}

/// The reminder job a lead is currently waiting on. A wake-up for any other
/// job id is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveReminder {
    pub stage: Stage,
    pub job_id: JobId,
    pub next_at: DateTime<Utc>,
}

/// Identity fields as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadProfile {
    pub telegram_id: i64,
    pub chat_id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub is_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub telegram_id: i64,
    pub chat_id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub is_bot: bool,

    pub language: Option<Language>,
    pub phone_number: Option<String>,
    pub city: Option<String>,

    pub status: LeadStatus,
    pub conversation_stage: ConversationStage,

    pub created_at: DateTime<Utc>,
    pub last_contact_at: DateTime<Utc>,
    pub last_start_time: Option<DateTime<Utc>>,
    pub next_follow_up_at: Option<DateTime<Utc>>,

    pub language_prompt_attempts: u32,
    pub phone_prompt_attempts: u32,
    pub city_prompt_attempts: u32,

    pub source: String,
    pub referral_code: Option<String>,

    pub reminder: Option<ActiveReminder>,
}

impl Lead {
    pub fn new(profile: LeadProfile, now: DateTime<Utc>) -> Self {
        Self {
            telegram_id: profile.telegram_id,
            chat_id: profile.chat_id,
            first_name: profile.first_name,
            last_name: profile.last_name,
            username: profile.username,
            is_bot: profile.is_bot,
            language: None,
            phone_number: None,
            city: None,
            status: LeadStatus::New,
            conversation_stage: ConversationStage::Greeting,
            created_at: now,
            last_contact_at: now,
            last_start_time: Some(now),
            next_follow_up_at: None,
            language_prompt_attempts: 0,
            phone_prompt_attempts: 0,
            city_prompt_attempts: 0,
            source: "direct".to_string(),
            referral_code: None,
            reminder: None,
        }
    }

    pub fn attempts(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Language => self.language_prompt_attempts,
            Stage::Phone => self.phone_prompt_attempts,
            Stage::City => self.city_prompt_attempts,
        }
    }

    /// Completion is presence of the stage's field, nothing else.
    pub fn is_stage_complete(&self, stage: Stage) -> bool {
        match stage {
            Stage::Language => self.language.is_some(),
            Stage::Phone => self.phone_number.is_some(),
            Stage::City => self.city.is_some(),
        }
    }

    /// The stage the lead still owes an answer for, in funnel order.
    pub fn first_incomplete_stage(&self) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| !self.is_stage_complete(*s))
    }

    pub fn is_cold(&self) -> bool {
        self.status == LeadStatus::Cold
    }

    pub fn active_job(&self) -> Option<&JobId> {
        self.reminder.as_ref().map(|r| &r.job_id)
    }
}

/// Field-level update. `None` leaves a column untouched, so concurrent
/// writers only overwrite what they set.
#[derive(Debug, Clone, Default)]
pub struct LeadPatch {
    pub first_name: Option<String>,
    pub last_name: Option<Option<String>>,
    pub username: Option<Option<String>>,
    pub language: Option<Language>,
    pub phone_number: Option<String>,
    pub city: Option<String>,
    pub status: Option<LeadStatus>,
    pub conversation_stage: Option<ConversationStage>,
    pub last_contact_at: Option<DateTime<Utc>>,
    pub last_start_time: Option<DateTime<Utc>>,
    pub next_follow_up_at: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub referral_code: Option<String>,
    pub reminder: Option<Option<ActiveReminder>>,
}

impl LeadPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile(mut self, profile: &LeadProfile) -> Self {
        self.first_name = Some(profile.first_name.clone());
        self.last_name = Some(profile.last_name.clone());
        self.username = Some(profile.username.clone());
        self
    }

    pub fn language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn phone_number(mut self, phone_number: impl Into<String>) -> Self {
        self.phone_number = Some(phone_number.into());
        self
    }

    pub fn city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn status(mut self, status: LeadStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn stage(mut self, stage: ConversationStage) -> Self {
        self.conversation_stage = Some(stage);
        self
    }

    pub fn contacted_at(mut self, now: DateTime<Utc>) -> Self {
        self.last_contact_at = Some(now);
        self
    }

    pub fn started_at(mut self, now: DateTime<Utc>) -> Self {
        self.last_start_time = Some(now);
        self
    }

    pub fn follow_up_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_follow_up_at = Some(at);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn referral_code(mut self, code: impl Into<String>) -> Self {
        self.referral_code = Some(code.into());
        self
    }

    pub fn reminder(mut self, reminder: ActiveReminder) -> Self {
        self.reminder = Some(Some(reminder));
        self
    }

    pub fn clear_reminder(mut self) -> Self {
        self.reminder = Some(None);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> LeadProfile {
        LeadProfile {
            telegram_id: 42,
            chat_id: 42,
            first_name: "Aziz".to_string(),
            last_name: None,
            username: Some("aziz".to_string()),
            is_bot: false,
        }
    }

    #[test]
    fn test_new_lead_defaults() {
        let now = Utc::now();
        let lead = Lead::new(profile(), now);

        assert_eq!(lead.status, LeadStatus::New);
        assert_eq!(lead.conversation_stage, ConversationStage::Greeting);
        assert_eq!(lead.source, "direct");
        assert_eq!(lead.last_start_time, Some(now));
        for stage in Stage::ALL {
            assert_eq!(lead.attempts(stage), 0);
            assert!(!lead.is_stage_complete(stage));
        }
    }

    #[test]
    fn test_stage_completion_ignores_counters() {
        let mut lead = Lead::new(profile(), Utc::now());
        lead.language_prompt_attempts = 3;
        assert!(!lead.is_stage_complete(Stage::Language));

        lead.language = Some(Language::Russian);
        assert!(lead.is_stage_complete(Stage::Language));
        assert!(!lead.is_stage_complete(Stage::Phone));
    }

    #[test]
    fn test_language_codes() {
        assert_eq!("uz".parse::<Language>().unwrap(), Language::Uzbek);
        assert_eq!("RU".parse::<Language>().unwrap(), Language::Russian);
        assert_eq!("kk".parse::<Language>().unwrap(), Language::Karakalpak);
        assert!("en".parse::<Language>().is_err());
        assert_eq!(Language::Karakalpak.to_string(), "kk");
    }

    #[test]
    fn test_conversation_stage_order() {
        assert!(ConversationStage::Greeting < ConversationStage::LanguageSelection);
        assert!(ConversationStage::LanguageSelection < ConversationStage::Qualification);
        assert!(ConversationStage::Qualification < ConversationStage::InterestBuilding);
        assert_eq!(ConversationStage::InterestBuilding.rank(), 3);
        assert_eq!(
            "language_selection".parse::<ConversationStage>().unwrap(),
            ConversationStage::LanguageSelection
        );
    }
}
