use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("delay out of range: {0}")]
    Delay(String),
    #[error("task error: {0}")]
    TaskError(String),
}

impl From<libsql::Error> for RuntimeError {
    fn from(error: libsql::Error) -> Self {
        RuntimeError::Storage(StorageError::Turso(error))
    }
}
