use libsql::errors::Error as TursoError;
use libsql::{Builder, Connection, Database};
use std::sync::{Arc, OnceLock};

use super::{schema::SCHEMA, StorageError};

pub static TURSO_CLIENT: OnceLock<TursoClient> = OnceLock::new();

/// Shared libSQL handle. One connection is kept and cloned so that an
/// in-memory database is the same database for every caller.
#[derive(Clone)]
pub struct TursoClient {
    #[allow(dead_code)]
    inner: Arc<Database>,
    conn: Connection,
}

impl TursoClient {
    pub async fn init(url: &str, token: &str) -> Result<(), StorageError> {
        if TURSO_CLIENT.get().is_some() {
            info!("TursoClient already initialized");
            return Ok(());
        }

        let client = Self::connect(url, token).await?;

        TURSO_CLIENT.set(client).map_err(|_| {
            StorageError::Turso(TursoError::ConnectionFailed(
                "Failed to set global Turso client".to_string(),
            ))
        })?;

        Ok(())
    }

    pub fn get() -> Result<&'static TursoClient, StorageError> {
        TURSO_CLIENT.get().ok_or_else(|| {
            StorageError::Turso(TursoError::ConnectionFailed("Turso client not initialized".to_string()))
        })
    }

    /// Remote for `libsql://` and `https://` urls, local file otherwise.
    pub async fn connect(url: &str, token: &str) -> Result<Self, StorageError> {
        info!("Initializing TursoClient...");
        let db = if url.starts_with("libsql://") || url.starts_with("https://") {
            Builder::new_remote(url.to_string(), token.to_string()).build().await?
        } else {
            Builder::new_local(url).build().await?
        };

        let client = Self::from_database(db).await?;
        info!("TursoClient initialized");
        Ok(client)
    }

    pub async fn new_memory() -> Result<Self, StorageError> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self, StorageError> {
        let conn = db.connect()?;
        conn.execute_batch(SCHEMA).await?;
        debug!("Schema applied");

        Ok(Self {
            inner: Arc::new(db),
            conn,
        })
    }

    pub fn connection(&self) -> Connection {
        self.conn.clone()
    }
}
