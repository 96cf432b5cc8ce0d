pub(super) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS leads (
    telegram_id INTEGER PRIMARY KEY,
    chat_id INTEGER NOT NULL,
    first_name TEXT NOT NULL,
    last_name TEXT,
    username TEXT,
    is_bot INTEGER NOT NULL DEFAULT 0,
    language TEXT,
    phone_number TEXT,
    city TEXT,
    status TEXT NOT NULL,
    conversation_stage TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    last_contact_at INTEGER NOT NULL,
    last_start_time INTEGER,
    next_follow_up_at INTEGER,
    language_prompt_attempts INTEGER NOT NULL DEFAULT 0,
    phone_prompt_attempts INTEGER NOT NULL DEFAULT 0,
    city_prompt_attempts INTEGER NOT NULL DEFAULT 0,
    source TEXT NOT NULL DEFAULT 'direct',
    referral_code TEXT,
    reminder_stage TEXT,
    reminder_job_id TEXT,
    next_reminder_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_leads_status ON leads (status);
CREATE INDEX IF NOT EXISTS idx_leads_stage ON leads (conversation_stage);
CREATE INDEX IF NOT EXISTS idx_leads_follow_up ON leads (next_follow_up_at);

CREATE TABLE IF NOT EXISTS scheduled_jobs (
    id TEXT PRIMARY KEY,
    telegram_id INTEGER NOT NULL,
    task TEXT NOT NULL,
    run_at INTEGER NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending',
    failures INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_due ON scheduled_jobs (state, run_at);
CREATE INDEX IF NOT EXISTS idx_jobs_lead ON scheduled_jobs (telegram_id, state);
"#;
