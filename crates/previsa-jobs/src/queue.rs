//! Durable job queue with bounded concurrency, type priority and retries.
//!
//! The job table behind [`JobRepository`] is the source of truth. The queue
//! keeps a per-type FIFO ready index in memory, rebuilt from the table on
//! [`JobQueue::start`], and dispatches from it whenever a slot is free:
//! after an enqueue, after start, after a job finishes and after a retry is
//! re-admitted. Types are served in [`JobType::PRIORITY`] order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use previsa_core::defaults::{
    EVENT_BUS_CAPACITY, JOB_BACKOFF_BASE_MS, JOB_BACKOFF_MAX_EXPONENT, JOB_CONCURRENCY,
    JOB_MAX_ATTEMPTS, JOB_STORE_WRITE_ATTEMPTS,
};
use previsa_core::{
    new_v7, BatchStatus, EnqueueOptions, Enqueued, Error, Job, JobPayload, JobRepository,
    JobState, JobType, QueueStats, Result,
};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Configuration for the job queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of jobs executing at once, across all types.
    pub concurrency: usize,
    /// Whether `start` begins dispatching.
    pub enabled: bool,
    /// Attempt limit for jobs enqueued without an explicit one.
    pub max_attempts: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: JOB_CONCURRENCY,
            enabled: true,
            max_attempts: JOB_MAX_ATTEMPTS,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `WORKER_CONCURRENCY` | `3` | Max concurrent jobs |
    /// | `JOB_MAX_ATTEMPTS` | `3` | Default attempt limit per job |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let concurrency = std::env::var("WORKER_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(JOB_CONCURRENCY)
            .max(1);

        let max_attempts = std::env::var("JOB_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(JOB_MAX_ATTEMPTS)
            .max(1);

        Self {
            concurrency,
            enabled,
            max_attempts,
        }
    }

    /// Set maximum concurrent jobs (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the default attempt limit (minimum 1).
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Event emitted by the job queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// Recovery finished and dispatch began.
    QueueStarted { recovered: u64, queued: usize },
    /// A job attempt was started.
    JobStarted {
        job_id: Uuid,
        job_type: JobType,
        attempt: i32,
    },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, job_type: JobType },
    /// A failed attempt will be retried after `delay_ms`.
    JobRetryScheduled {
        job_id: Uuid,
        job_type: JobType,
        attempt: i32,
        delay_ms: u64,
    },
    /// A job failed permanently.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    /// Dispatch stopped.
    QueueStopped,
}

/// Delay before re-admitting a job that has failed `attempts` times.
///
/// 1s, 2s, 4s, ... doubling per attempt.
pub fn backoff_delay(attempts: i32) -> Duration {
    let exponent = (attempts.max(1) - 1) as u32;
    let factor = 1u64 << exponent.min(JOB_BACKOFF_MAX_EXPONENT);
    Duration::from_millis(JOB_BACKOFF_BASE_MS.saturating_mul(factor))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Starting,
    Running,
    Stopped,
}

struct Scheduler {
    phase: Phase,
    ready: HashMap<JobType, VecDeque<Job>>,
    active: usize,
}

impl Scheduler {
    fn push(&mut self, job: Job) {
        self.ready.entry(job.job_type).or_default().push_back(job);
    }

    fn pop_next(&mut self) -> Option<Job> {
        JobType::PRIORITY
            .iter()
            .find_map(|job_type| self.ready.get_mut(job_type).and_then(VecDeque::pop_front))
    }

    fn contains(&self, id: Uuid) -> bool {
        self.ready.values().flatten().any(|job| job.id == id)
    }
}

struct QueueInner {
    repo: Arc<dyn JobRepository>,
    config: QueueConfig,
    handlers: RwLock<HashMap<JobType, Arc<dyn JobHandler>>>,
    scheduler: Mutex<Scheduler>,
    event_tx: broadcast::Sender<QueueEvent>,
    stop_tx: watch::Sender<bool>,
    drained: Notify,
}

/// Job queue handle. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    /// Create a queue over `repo`. Nothing runs until [`JobQueue::start`].
    pub fn new(repo: Arc<dyn JobRepository>, config: QueueConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(QueueInner {
                repo,
                config,
                handlers: RwLock::new(HashMap::new()),
                scheduler: Mutex::new(Scheduler {
                    phase: Phase::Idle,
                    ready: HashMap::new(),
                    active: 0,
                }),
                event_tx,
                stop_tx,
                drained: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Register the handler for its job type.
    ///
    /// Fails once the queue has been started, or if the type already has a
    /// handler.
    pub fn register_handler<H: JobHandler + 'static>(&self, handler: H) -> Result<()> {
        self.register_arc(Arc::new(handler))
    }

    fn register_arc(&self, handler: Arc<dyn JobHandler>) -> Result<()> {
        if self.inner.scheduler().phase != Phase::Idle {
            return Err(Error::Job(
                "handlers must be registered before the queue starts".to_string(),
            ));
        }

        let job_type = handler.job_type();
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if handlers.contains_key(&job_type) {
            return Err(Error::Job(format!(
                "a handler is already registered for {}",
                job_type
            )));
        }
        handlers.insert(job_type, handler);
        debug!(job_type = %job_type, "Registered job handler");
        Ok(())
    }

    /// Get a receiver for queue events.
    pub fn events(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Validate, persist and schedule a job.
    ///
    /// Nothing is written when the payload or options are invalid. A new
    /// batch id is generated when the options carry none.
    #[instrument(skip(self, payload, options), fields(subsystem = "jobs", component = "queue", op = "enqueue"))]
    pub async fn enqueue(&self, payload: JobPayload, options: EnqueueOptions) -> Result<Enqueued> {
        payload.validate()?;
        let max_attempts = EnqueueOptions {
            max_attempts: options.max_attempts.or(Some(self.inner.config.max_attempts)),
            ..options.clone()
        }
        .resolved_max_attempts()?;

        let now = Utc::now();
        let job = Job {
            id: new_v7(),
            job_type: payload.job_type(),
            batch_id: options.batch_id.unwrap_or_else(new_v7),
            external_id: options.external_id,
            tenant_id: options.tenant_id,
            payload,
            state: JobState::Queued,
            attempts: 0,
            max_attempts,
            error_message: None,
            result: None,
            created_at: now,
            updated_at: now,
        };
        self.inner.repo.insert(&job).await?;

        let enqueued = Enqueued {
            job_id: job.id,
            batch_id: job.batch_id,
        };
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            batch_id = %job.batch_id,
            "Job enqueued"
        );

        self.inner.scheduler().push(job);
        QueueInner::schedule(&self.inner);
        Ok(enqueued)
    }

    /// Recover interrupted work and begin dispatching.
    ///
    /// Jobs left Processing by a crash are reset to Queued, every Queued job
    /// is loaded oldest first, and only then does dispatch begin. Calling
    /// `start` on a queue that is running or stopped does nothing.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "queue", op = "start"))]
    pub async fn start(&self) -> Result<()> {
        {
            let mut scheduler = self.inner.scheduler();
            if scheduler.phase != Phase::Idle {
                debug!("Queue already started");
                return Ok(());
            }
            scheduler.phase = Phase::Starting;
        }

        if !self.inner.config.enabled {
            info!("Job queue is disabled, not dispatching");
            self.inner.scheduler().phase = Phase::Stopped;
            return Ok(());
        }

        let recovered = match self.inner.repo.recover_processing().await {
            Ok(n) => n,
            Err(e) => {
                self.inner.scheduler().phase = Phase::Idle;
                return Err(e);
            }
        };
        if recovered > 0 {
            warn!(recovered, "Reset interrupted jobs to queued");
        }

        let queued = match self.inner.repo.list_queued().await {
            Ok(jobs) => jobs,
            Err(e) => {
                self.inner.scheduler().phase = Phase::Idle;
                return Err(e);
            }
        };

        let loaded = {
            let mut scheduler = self.inner.scheduler();
            let mut seen: HashSet<Uuid> = HashSet::new();
            for job in queued {
                if scheduler.contains(job.id) || !seen.insert(job.id) {
                    continue;
                }
                scheduler.push(job);
            }
            // Enqueues racing with recovery were pushed unsorted; restore FIFO.
            for jobs in scheduler.ready.values_mut() {
                jobs.make_contiguous()
                    .sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            }
            scheduler.phase = Phase::Running;
            scheduler.ready.values().map(VecDeque::len).sum::<usize>()
        };

        info!(
            recovered,
            queued = loaded,
            concurrency = self.inner.config.concurrency,
            "Job queue started"
        );
        let _ = self.inner.event_tx.send(QueueEvent::QueueStarted {
            recovered,
            queued: loaded,
        });

        QueueInner::schedule(&self.inner);
        Ok(())
    }

    /// Stop dispatching and cancel pending retry re-admissions.
    ///
    /// In-flight executions run to completion. Jobs waiting for a retry stay
    /// Queued in the table and are picked up by the next process to start.
    pub fn stop(&self) {
        {
            let mut scheduler = self.inner.scheduler();
            if scheduler.phase == Phase::Stopped {
                return;
            }
            scheduler.phase = Phase::Stopped;
        }
        self.inner.stop_tx.send_replace(true);
        info!("Job queue stopped");
        let _ = self.inner.event_tx.send(QueueEvent::QueueStopped);
    }

    /// Stop and wait for in-flight executions to finish.
    pub async fn shutdown(&self) {
        self.stop();
        loop {
            let drained = self.inner.drained.notified();
            if self.active_count() == 0 {
                break;
            }
            drained.await;
        }
        info!("Job queue drained");
    }

    /// Number of jobs executing right now.
    pub fn active_count(&self) -> usize {
        self.inner.scheduler().active
    }

    /// Current persisted state of a job.
    pub async fn get_job_status(&self, job_id: Uuid) -> Result<Option<Job>> {
        self.inner.repo.get(job_id).await
    }

    /// Aggregate state of a batch, recomputed from the table on every call.
    pub async fn get_batch_status(&self, batch_id: Uuid) -> Result<Option<BatchStatus>> {
        let jobs = self.inner.repo.list_by_batch(batch_id).await?;
        Ok(BatchStatus::from_jobs(batch_id, jobs))
    }

    /// Job counts per type and state.
    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.inner.repo.queue_stats().await
    }
}

impl QueueInner {
    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handler_for(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_type)
            .cloned()
    }

    /// Fill free slots from the ready index.
    fn schedule(this: &Arc<Self>) {
        loop {
            let job = {
                let mut scheduler = this.scheduler();
                if scheduler.phase != Phase::Running
                    || scheduler.active >= this.config.concurrency
                {
                    return;
                }
                match scheduler.pop_next() {
                    Some(job) => {
                        scheduler.active += 1;
                        job
                    }
                    None => return,
                }
            };

            let inner = this.clone();
            tokio::spawn(async move {
                inner.run(job).await;
                inner.release();
            });
        }
    }

    fn release(self: &Arc<Self>) {
        let idle = {
            let mut scheduler = self.scheduler();
            scheduler.active = scheduler.active.saturating_sub(1);
            scheduler.active == 0
        };
        if idle {
            self.drained.notify_waiters();
        }
        Self::schedule(self);
    }

    async fn run(self: &Arc<Self>, job: Job) {
        let job_id = job.id;
        let job_type = job.job_type;

        if let Err(e) = self.repo.mark_processing(job_id).await {
            if e.is_transient() {
                let delay = backoff_delay(1);
                warn!(
                    job_id = %job_id,
                    job_type = %job_type,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Failed to mark job as processing, re-admitting"
                );
                self.readmit_after(job, delay);
            } else {
                error!(job_id = %job_id, job_type = %job_type, error = %e, "Job cannot be claimed, dropping it");
            }
            return;
        }

        let ctx = JobContext::new(job.clone());
        let attempt = ctx.attempt;

        let Some(handler) = self.handler_for(job_type) else {
            warn!(job_id = %job_id, job_type = %job_type, "No handler registered for job type");
            self.fail(job_id, job_type, attempt, "no handler registered".to_string())
                .await;
            return;
        };

        info!(job_id = %job_id, job_type = %job_type, attempt, "Processing job");
        let _ = self.event_tx.send(QueueEvent::JobStarted {
            job_id,
            job_type,
            attempt,
        });

        let start = Instant::now();
        let result = match tokio::spawn(async move { handler.execute(ctx).await }).await {
            Ok(result) => result,
            Err(e) => JobResult::Failed(format!("handler panicked: {}", e)),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            JobResult::Success(data) => {
                let repo = &self.repo;
                let written = self
                    .write_state(job_id, "complete", move || {
                        repo.complete(job_id, attempt, data.clone())
                    })
                    .await;
                if let Err(e) = written {
                    error!(job_id = %job_id, error = %e, "Failed to mark job as completed, left for recovery");
                    return;
                }
                info!(job_id = %job_id, job_type = %job_type, attempt, duration_ms, "Job completed successfully");
                let _ = self
                    .event_tx
                    .send(QueueEvent::JobCompleted { job_id, job_type });
            }
            JobResult::Failed(message) if attempt < job.max_attempts => {
                let repo = &self.repo;
                let error_message = message.as_str();
                let written = self
                    .write_state(job_id, "requeue", move || {
                        repo.requeue(job_id, attempt, error_message)
                    })
                    .await;
                if let Err(e) = written {
                    error!(job_id = %job_id, error = %e, "Failed to requeue job, left for recovery");
                    return;
                }
                let delay = backoff_delay(attempt);
                warn!(
                    job_id = %job_id,
                    job_type = %job_type,
                    attempt,
                    max_attempts = job.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    duration_ms,
                    "Job attempt failed, retry scheduled"
                );
                let _ = self.event_tx.send(QueueEvent::JobRetryScheduled {
                    job_id,
                    job_type,
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });

                let retry = Job {
                    state: JobState::Queued,
                    attempts: attempt,
                    error_message: Some(message),
                    updated_at: Utc::now(),
                    ..job
                };
                self.readmit_after(retry, delay);
            }
            JobResult::Failed(message) => {
                self.fail(job_id, job_type, attempt, message).await;
            }
        }
    }

    async fn fail(&self, job_id: Uuid, job_type: JobType, attempts: i32, message: String) {
        let repo = &self.repo;
        let error_message = message.as_str();
        let written = self
            .write_state(job_id, "fail", move || repo.fail(job_id, attempts, error_message))
            .await;
        if let Err(e) = written {
            error!(job_id = %job_id, error = %e, "Failed to mark job as failed, left for recovery");
            return;
        }
        warn!(job_id = %job_id, job_type = %job_type, attempts, error = %message, "Job failed");
        let _ = self.event_tx.send(QueueEvent::JobFailed {
            job_id,
            job_type,
            error: message,
        });
    }

    /// Run a job state write, retrying transient store errors with backoff.
    ///
    /// A write that still fails leaves the row Processing; the next `start`
    /// requeues it.
    async fn write_state<F, Fut>(&self, job_id: Uuid, op: &'static str, mut write: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut tries = 1;
        loop {
            match write().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && tries < JOB_STORE_WRITE_ATTEMPTS => {
                    let delay = backoff_delay(tries);
                    warn!(
                        job_id = %job_id,
                        op,
                        try_number = tries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Job state write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    tries += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Put `job` back on the ready index after `delay`, unless stopped first.
    fn readmit_after(self: &Arc<Self>, job: Job, delay: Duration) {
        let inner = self.clone();
        let mut stop_rx = self.stop_tx.subscribe();
        tokio::spawn(async move {
            if *stop_rx.borrow() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    debug!(job_id = %job.id, "Retry re-admitted");
                    {
                        let mut scheduler = inner.scheduler();
                        if scheduler.phase != Phase::Running {
                            return;
                        }
                        scheduler.push(job);
                    }
                    Self::schedule(&inner);
                }
                _ = stop_rx.changed() => {
                    debug!(job_id = %job.id, "Retry cancelled by stop");
                }
            }
        });
    }
}

/// Builder for creating a job queue with handlers.
pub struct QueueBuilder {
    repo: Arc<dyn JobRepository>,
    config: QueueConfig,
    handlers: Vec<Arc<dyn JobHandler>>,
}

impl QueueBuilder {
    pub fn new(repo: Arc<dyn JobRepository>) -> Self {
        Self {
            repo,
            config: QueueConfig::default(),
            handlers: Vec::new(),
        }
    }

    /// Set the queue configuration.
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a handler.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Build the queue, rejecting duplicate handlers.
    pub fn build(self) -> Result<JobQueue> {
        let queue = JobQueue::new(self.repo, self.config);
        for handler in self.handlers {
            queue.register_arc(handler)?;
        }
        Ok(queue)
    }
}
