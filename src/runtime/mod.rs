mod error;
pub mod scheduler;
pub mod task;
pub mod worker;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::RuntimeConfig;

pub use error::RuntimeError;
pub use scheduler::{after, LibSqlScheduler, Scheduler};
pub use task::{JobId, ReminderTask, ScheduledJob, StageStep};
pub use worker::{ReminderWorker, TaskHandler, WorkerPool};

/// Owns the durable scheduler and the workers that drain it.
#[derive(Clone)]
pub struct RuntimeManager {
    pub scheduler: LibSqlScheduler,
    config: RuntimeConfig,
    pool: Arc<Mutex<WorkerPool>>,
}

impl RuntimeManager {
    pub fn new(conn: libsql::Connection, config: &RuntimeConfig) -> Self {
        Self {
            scheduler: LibSqlScheduler::new(conn),
            config: config.clone(),
            pool: Arc::new(Mutex::new(WorkerPool::new())),
        }
    }

    pub async fn start(&self, handler: Arc<dyn TaskHandler>) -> Result<(), RuntimeError> {
        let mut pool = self.pool.lock().await;
        pool.add_worker(ReminderWorker::new(
            "reminder",
            self.scheduler.clone(),
            handler,
            &self.config,
        ));
        pool.start_all().await?;
        info!("Runtime started with {} worker(s)", pool.running());
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), RuntimeError> {
        self.pool.lock().await.stop_all().await
    }
}
