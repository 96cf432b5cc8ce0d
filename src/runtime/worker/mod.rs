mod reminder;

use async_trait::async_trait;
use std::collections::HashMap;

use super::{task::ScheduledJob, RuntimeError};

pub use reminder::ReminderWorker;

#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn name(&self) -> &str;
    async fn start(&self) -> Result<(), RuntimeError>;
    async fn stop(&self) -> Result<(), RuntimeError>;
    fn is_running(&self) -> bool;
}

/// Consumer of due jobs. An `Err` reschedules the job with backoff.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, job: &ScheduledJob) -> Result<(), RuntimeError>;
}

#[derive(Default)]
pub struct WorkerPool {
    workers: HashMap<String, Box<dyn Worker>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_worker<W: Worker + 'static>(&mut self, worker: W) {
        self.workers.insert(worker.name().to_string(), Box::new(worker));
    }

    pub async fn start_all(&self) -> Result<(), RuntimeError> {
        for worker in self.workers.values() {
            worker.start().await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) -> Result<(), RuntimeError> {
        for worker in self.workers.values() {
            worker.stop().await?;
        }
        Ok(())
    }

    pub fn running(&self) -> usize {
        self.workers.values().filter(|w| w.is_running()).count()
    }
}
