mod model;

pub use model::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Row, Value};

use crate::{
    runtime::JobId,
    service::funnel::Stage,
    storage::{from_millis, from_millis_opt, to_millis, StorageError},
};

/// Persistent lead records keyed by Telegram user id.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn get(&self, telegram_id: i64) -> Result<Option<Lead>, StorageError>;

    async fn insert(&self, lead: &Lead) -> Result<(), StorageError>;

    /// Applies `patch` to an existing lead and returns the stored result.
    /// `None` when the lead does not exist.
    async fn update(&self, telegram_id: i64, patch: LeadPatch) -> Result<Option<Lead>, StorageError>;

    /// Bumps the stage counter by one unless it already reached `max`.
    /// `None` when nothing was incremented.
    async fn increment_attempts(
        &self,
        telegram_id: i64,
        stage: Stage,
        max: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Lead>, StorageError>;
}

const LEAD_COLUMNS: &str = "telegram_id, chat_id, first_name, last_name, username, is_bot, \
     language, phone_number, city, status, conversation_stage, \
     created_at, last_contact_at, last_start_time, next_follow_up_at, \
     language_prompt_attempts, phone_prompt_attempts, city_prompt_attempts, \
     source, referral_code, reminder_stage, reminder_job_id, next_reminder_at";

const STAGE_RANK_SQL: &str = "(CASE conversation_stage \
     WHEN 'greeting' THEN 0 \
     WHEN 'language_selection' THEN 1 \
     WHEN 'qualification' THEN 2 \
     ELSE 3 END)";

#[derive(Clone)]
pub struct LibSqlLeadStore {
    conn: Connection,
}

impl LibSqlLeadStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

fn opt_text(value: Option<String>) -> Value {
    value.map(Value::Text).unwrap_or(Value::Null)
}

fn opt_millis(value: Option<DateTime<Utc>>) -> Value {
    value.map(|ts| Value::Integer(to_millis(ts))).unwrap_or(Value::Null)
}

fn parse_column<T: std::str::FromStr<Err = String>>(raw: String) -> Result<T, StorageError> {
    raw.parse::<T>().map_err(StorageError::Corrupt)
}

fn counter(raw: i64) -> Result<u32, StorageError> {
    u32::try_from(raw).map_err(|_| StorageError::Corrupt(format!("bad counter: {}", raw)))
}

fn row_to_lead(row: &Row) -> Result<Lead, StorageError> {
    let language = row.get::<Option<String>>(6)?.map(parse_column).transpose()?;

    let reminder_stage = row.get::<Option<String>>(20)?;
    let reminder_job = row.get::<Option<String>>(21)?;
    let next_reminder_at = row.get::<Option<i64>>(22)?;
    let reminder = match (reminder_stage, reminder_job, next_reminder_at) {
        (Some(stage), Some(job_id), Some(next_at)) => Some(ActiveReminder {
            stage: parse_column(stage)?,
            job_id: JobId::from(job_id),
            next_at: from_millis(next_at)?,
        }),
        _ => None,
    };

    Ok(Lead {
        telegram_id: row.get::<i64>(0)?,
        chat_id: row.get::<i64>(1)?,
        first_name: row.get::<String>(2)?,
        last_name: row.get::<Option<String>>(3)?,
        username: row.get::<Option<String>>(4)?,
        is_bot: row.get::<i64>(5)? != 0,
        language,
        phone_number: row.get::<Option<String>>(7)?,
        city: row.get::<Option<String>>(8)?,
        status: parse_column(row.get::<String>(9)?)?,
        conversation_stage: parse_column(row.get::<String>(10)?)?,
        created_at: from_millis(row.get::<i64>(11)?)?,
        last_contact_at: from_millis(row.get::<i64>(12)?)?,
        last_start_time: from_millis_opt(row.get::<Option<i64>>(13)?)?,
        next_follow_up_at: from_millis_opt(row.get::<Option<i64>>(14)?)?,
        language_prompt_attempts: counter(row.get::<i64>(15)?)?,
        phone_prompt_attempts: counter(row.get::<i64>(16)?)?,
        city_prompt_attempts: counter(row.get::<i64>(17)?)?,
        source: row.get::<String>(18)?,
        referral_code: row.get::<Option<String>>(19)?,
        reminder,
    })
}

/// Collects `column = ?n` assignments with positional parameters.
#[derive(Default)]
struct Assignments {
    sets: Vec<String>,
    params: Vec<Value>,
}

impl Assignments {
    fn next_param(&mut self, value: Value) -> usize {
        self.params.push(value);
        self.params.len()
    }

    fn set(&mut self, column: &str, value: Value) {
        let n = self.next_param(value);
        self.sets.push(format!("{} = ?{}", column, n));
    }

    fn set_status(&mut self, status: LeadStatus) {
        let n = self.next_param(text(status.as_str()));
        self.sets
            .push(format!("status = CASE WHEN status = 'cold' THEN status ELSE ?{} END", n));
    }

    fn set_stage_forward(&mut self, stage: ConversationStage) {
        let rank = self.next_param(Value::Integer(stage.rank()));
        let value = self.next_param(text(stage.as_str()));
        self.sets.push(format!(
            "conversation_stage = CASE WHEN {} < ?{} THEN ?{} ELSE conversation_stage END",
            STAGE_RANK_SQL, rank, value
        ));
    }
}

#[async_trait]
impl LeadStore for LibSqlLeadStore {
    async fn get(&self, telegram_id: i64) -> Result<Option<Lead>, StorageError> {
        let sql = format!("SELECT {} FROM leads WHERE telegram_id = ?1 LIMIT 1", LEAD_COLUMNS);
        let mut rows = self.conn.query(&sql, [telegram_id]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_lead(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, lead: &Lead) -> Result<(), StorageError> {
        let (reminder_stage, reminder_job, next_reminder_at) = match &lead.reminder {
            Some(r) => (
                text(r.stage.as_str()),
                text(r.job_id.as_str()),
                Value::Integer(to_millis(r.next_at)),
            ),
            None => (Value::Null, Value::Null, Value::Null),
        };

        let params: Vec<Value> = vec![
            Value::Integer(lead.telegram_id),
            Value::Integer(lead.chat_id),
            text(lead.first_name.clone()),
            opt_text(lead.last_name.clone()),
            opt_text(lead.username.clone()),
            Value::Integer(lead.is_bot as i64),
            opt_text(lead.language.map(|l| l.code().to_string())),
            opt_text(lead.phone_number.clone()),
            opt_text(lead.city.clone()),
            text(lead.status.as_str()),
            text(lead.conversation_stage.as_str()),
            Value::Integer(to_millis(lead.created_at)),
            Value::Integer(to_millis(lead.last_contact_at)),
            opt_millis(lead.last_start_time),
            opt_millis(lead.next_follow_up_at),
            Value::Integer(lead.language_prompt_attempts as i64),
            Value::Integer(lead.phone_prompt_attempts as i64),
            Value::Integer(lead.city_prompt_attempts as i64),
            text(lead.source.clone()),
            opt_text(lead.referral_code.clone()),
            reminder_stage,
            reminder_job,
            next_reminder_at,
        ];

        let placeholders = (1..=params.len()).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ");
        let sql = format!("INSERT INTO leads ({}) VALUES ({})", LEAD_COLUMNS, placeholders);

        self.conn.execute(&sql, params).await?;
        debug!("Inserted lead {}", lead.telegram_id);
        Ok(())
    }

    async fn update(&self, telegram_id: i64, patch: LeadPatch) -> Result<Option<Lead>, StorageError> {
        let mut a = Assignments::default();

        if let Some(first_name) = patch.first_name {
            a.set("first_name", text(first_name));
        }
        if let Some(last_name) = patch.last_name {
            a.set("last_name", opt_text(last_name));
        }
        if let Some(username) = patch.username {
            a.set("username", opt_text(username));
        }
        if let Some(language) = patch.language {
            a.set("language", text(language.code()));
        }
        if let Some(phone_number) = patch.phone_number {
            a.set("phone_number", text(phone_number));
        }
        if let Some(city) = patch.city {
            a.set("city", text(city));
        }
        if let Some(status) = patch.status {
            a.set_status(status);
        }
        if let Some(stage) = patch.conversation_stage {
            a.set_stage_forward(stage);
        }
        if let Some(ts) = patch.last_contact_at {
            a.set("last_contact_at", Value::Integer(to_millis(ts)));
        }
        if let Some(ts) = patch.last_start_time {
            a.set("last_start_time", Value::Integer(to_millis(ts)));
        }
        if let Some(ts) = patch.next_follow_up_at {
            a.set("next_follow_up_at", Value::Integer(to_millis(ts)));
        }
        if let Some(source) = patch.source {
            a.set("source", text(source));
        }
        if let Some(code) = patch.referral_code {
            a.set("referral_code", text(code));
        }
        match patch.reminder {
            Some(Some(reminder)) => {
                a.set("reminder_stage", text(reminder.stage.as_str()));
                a.set("reminder_job_id", text(reminder.job_id.as_str()));
                a.set("next_reminder_at", Value::Integer(to_millis(reminder.next_at)));
            }
            Some(None) => {
                a.set("reminder_stage", Value::Null);
                a.set("reminder_job_id", Value::Null);
                a.set("next_reminder_at", Value::Null);
            }
            None => {}
        }

        if a.sets.is_empty() {
            return self.get(telegram_id).await;
        }

        let id_param = a.next_param(Value::Integer(telegram_id));
        let sql = format!("UPDATE leads SET {} WHERE telegram_id = ?{}", a.sets.join(", "), id_param);

        let changed = self.conn.execute(&sql, a.params).await?;
        if changed == 0 {
            return Ok(None);
        }

        self.get(telegram_id).await
    }

    async fn increment_attempts(
        &self,
        telegram_id: i64,
        stage: Stage,
        max: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Lead>, StorageError> {
        let column = stage.counter_column();
        let sql = format!(
            "UPDATE leads SET {col} = {col} + 1, last_contact_at = ?1 WHERE telegram_id = ?2 AND {col} < ?3",
            col = column
        );

        let changed = self
            .conn
            .execute(
                &sql,
                vec![
                    Value::Integer(to_millis(now)),
                    Value::Integer(telegram_id),
                    Value::Integer(max as i64),
                ],
            )
            .await?;

        if changed == 0 {
            return Ok(None);
        }

        self.get(telegram_id).await
    }
}
