use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{
    config::RuntimeConfig,
    runtime::{
        scheduler::LibSqlScheduler,
        task::{JobId, ScheduledJob},
        RuntimeError,
    },
};

use super::{TaskHandler, Worker};

const JOB_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Polls the scheduler and runs due reminder jobs, one tokio task per job.
/// Jobs of the same lead never run concurrently.
#[derive(Clone)]
pub struct ReminderWorker {
    name: String,
    scheduler: LibSqlScheduler,
    handler: Arc<dyn TaskHandler>,
    poll_interval: Duration,
    batch_size: usize,
    max_job_retries: u32,
    in_flight: Arc<DashMap<i64, JobId>>,
    shutdown: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
}

impl ReminderWorker {
    pub fn new(name: &str, scheduler: LibSqlScheduler, handler: Arc<dyn TaskHandler>, config: &RuntimeConfig) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            name: name.to_string(),
            scheduler,
            handler,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            batch_size: config.batch_size,
            max_job_retries: config.max_job_retries,
            in_flight: Arc::new(DashMap::new()),
            shutdown,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claims the jobs due at `now` and spawns them. Returns the spawned handles.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<JoinHandle<()>>, RuntimeError> {
        let jobs = self.scheduler.claim_due(now, self.batch_size).await?;
        let mut handles = Vec::with_capacity(jobs.len());

        for job in jobs {
            let telegram_id = job.task.telegram_id;

            let busy_with = match self.in_flight.entry(telegram_id) {
                Entry::Occupied(busy) => Some(busy.get().clone()),
                Entry::Vacant(slot) => {
                    slot.insert(job.id.clone());
                    None
                }
            };

            if let Some(busy_with) = busy_with {
                debug!("Lead {} busy with job {}, releasing job {}", telegram_id, busy_with, job.id);
                self.scheduler.release(&job.id).await?;
                continue;
            }

            let worker = self.clone();
            handles.push(tokio::spawn(async move {
                worker.run_job(job).await;
            }));
        }

        Ok(handles)
    }

    async fn run_job(&self, job: ScheduledJob) {
        let telegram_id = job.task.telegram_id;

        let result = match self.handler.handle(&job).await {
            Ok(()) => self.scheduler.complete(&job.id).await,
            Err(e) => {
                warn!("Worker {} failed job {}: {}", self.name, job.id, e);
                self.scheduler
                    .retry_later(&job.id, JOB_RETRY_BACKOFF, self.max_job_retries)
                    .await
                    .map(|_| ())
            }
        };

        if let Err(e) = result {
            error!("Worker {} could not record outcome of job {}: {}", self.name, job.id, e);
        }

        self.in_flight.remove(&telegram_id);
    }
}

#[async_trait]
impl Worker for ReminderWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.scheduler.recover_stale().await?;

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let worker = self.clone();
        let mut rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(worker.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = worker.tick(Utc::now()).await {
                            error!("Worker {} failed to poll jobs: {}", worker.name, e);
                        }
                    }
                    _ = rx.recv() => {
                        break;
                    }
                }
            }

            info!("Worker {} stopped", worker.name);
        });

        info!("Worker {} started", self.name);
        Ok(())
    }

    async fn stop(&self) -> Result<(), RuntimeError> {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(());
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
