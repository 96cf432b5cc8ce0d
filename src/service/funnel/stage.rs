use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::service::lead::LeadStatus;

/// Funnel stages, in the order they run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Language,
    Phone,
    City,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageConfig {
    pub initial_delay: Duration,
    pub retry_delay: Duration,
    pub response_window: Duration,
    pub max_attempts: u32,
    pub on_exhaust: LeadStatus,
}

const LANGUAGE: StageConfig = StageConfig {
    initial_delay: Duration::from_secs(90),
    retry_delay: Duration::from_secs(120),
    response_window: Duration::from_secs(60),
    max_attempts: 3,
    on_exhaust: LeadStatus::Cold,
};

const PHONE: StageConfig = StageConfig {
    initial_delay: Duration::from_secs(120),
    retry_delay: Duration::from_secs(120),
    response_window: Duration::from_secs(60),
    max_attempts: 3,
    on_exhaust: LeadStatus::Cold,
};

// city exhaustion still counts as interest: the lead gave language and phone
const CITY: StageConfig = StageConfig {
    initial_delay: Duration::from_secs(120),
    retry_delay: Duration::from_secs(120),
    response_window: Duration::from_secs(60),
    max_attempts: 3,
    on_exhaust: LeadStatus::Interested,
};

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Language, Stage::Phone, Stage::City];

    pub fn config(&self) -> &'static StageConfig {
        match self {
            Stage::Language => &LANGUAGE,
            Stage::Phone => &PHONE,
            Stage::City => &CITY,
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Language => Some(Stage::Phone),
            Stage::Phone => Some(Stage::City),
            Stage::City => None,
        }
    }

    /// This stage and every stage after it.
    pub fn from_here(&self) -> impl Iterator<Item = Stage> {
        let start = *self;
        Stage::ALL.into_iter().skip_while(move |s| *s != start)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Language => "language",
            Stage::Phone => "phone",
            Stage::City => "city",
        }
    }

    pub(crate) fn counter_column(&self) -> &'static str {
        match self {
            Stage::Language => "language_prompt_attempts",
            Stage::Phone => "phone_prompt_attempts",
            Stage::City => "city_prompt_attempts",
        }
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "language" => Ok(Stage::Language),
            "phone" => Ok(Stage::Phone),
            "city" => Ok(Stage::City),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
