mod error;
mod schema;
mod turso;

pub use error::StorageError;
pub use turso::TursoClient;

use chrono::{DateTime, Utc};

/// Timestamps are persisted as epoch milliseconds.
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| StorageError::Corrupt(format!("bad timestamp: {}", ms)))
}

pub fn from_millis_opt(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, StorageError> {
    ms.map(from_millis).transpose()
}
