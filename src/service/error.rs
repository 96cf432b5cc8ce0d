use crate::{runtime::RuntimeError, storage::StorageError};

use super::messenger::MessengerError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Lead not found: {0}")]
    LeadNotFound(i64),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("Messenger error: {0}")]
    Messenger(#[from] MessengerError),
}
