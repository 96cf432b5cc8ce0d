use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::service::funnel::Stage;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One wake-up of a stage's reminder loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageStep {
    /// Fires after the initial or retry delay; sends reminder `attempt`.
    Remind { attempt: u32, send_failures: u32 },
    /// Fires after the response window of reminder `attempt`.
    Verify { attempt: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderTask {
    pub telegram_id: i64,
    pub chat_id: i64,
    pub stage: Stage,
    pub step: StageStep,
}

impl ReminderTask {
    pub fn first_reminder(telegram_id: i64, chat_id: i64, stage: Stage) -> Self {
        Self {
            telegram_id,
            chat_id,
            stage,
            step: StageStep::Remind {
                attempt: 1,
                send_failures: 0,
            },
        }
    }

    pub fn with_step(&self, step: StageStep) -> Self {
        Self { step, ..self.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub id: JobId,
    pub task: ReminderTask,
    pub run_at: DateTime<Utc>,
    pub failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_payload_shape() {
        let task = ReminderTask::first_reminder(7, 7, Stage::Phone);
        let json = serde_json::to_value(&task).unwrap();

        assert_eq!(json["stage"], "phone");
        assert_eq!(json["step"]["kind"], "remind");
        assert_eq!(json["step"]["attempt"], 1);

        let verify = task.with_step(StageStep::Verify { attempt: 2 });
        let back: ReminderTask = serde_json::from_str(&serde_json::to_string(&verify).unwrap()).unwrap();
        assert_eq!(back.step, StageStep::Verify { attempt: 2 });
        assert_eq!(back.telegram_id, 7);
    }

    #[test]
    fn test_job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }
}
