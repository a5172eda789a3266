//! Background Job Queue
//!
//! Deferred mirror syncs run here, off the request path. Jobs are
//! fire-and-forget: a failed job records its error and is never re-run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Job errors
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error("Job failed: {0}")]
    Failed(String),
    #[error("Queue error: {0}")]
    QueueError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<JobError> for mirror_core::MirrorError {
    fn from(err: JobError) -> Self {
        mirror_core::MirrorError::Job(err.to_string())
    }
}

pub type JobResult<T> = Result<T, JobError>;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// Failed; kept for inspection
    Dead,
}

/// A background job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Handler name
    pub job_type: String,
    pub queue: String,
    pub args: serde_json::Value,
    pub status: JobStatus,
    /// Failure message
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(job_type: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: job_type.into(),
            queue: "default".to_string(),
            args,
            status: JobStatus::Pending,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Build a job from serializable arguments
    pub fn with_args<A: Serialize>(job_type: impl Into<String>, args: &A) -> JobResult<Self> {
        let args = serde_json::to_value(args)
            .map_err(|e| JobError::SerializationError(e.to_string()))?;
        Ok(Self::new(job_type, args))
    }

    /// Decode the arguments
    pub fn args<A: for<'de> Deserialize<'de>>(&self) -> JobResult<A> {
        serde_json::from_value(self.args.clone())
            .map_err(|e| JobError::SerializationError(e.to_string()))
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Dead;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }
}

/// Job queue trait
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job, returning its id
    async fn enqueue(&self, job: Job) -> JobResult<String>;

    async fn get(&self, job_id: &str) -> JobResult<Option<Job>>;

    /// Take the oldest pending job and mark it running
    async fn dequeue(&self, queue: &str) -> JobResult<Option<Job>>;

    async fn update(&self, job: &Job) -> JobResult<()>;

    async fn list(&self, queue: &str, status: Option<JobStatus>) -> JobResult<Vec<Job>>;
}

/// In-memory job queue for development/testing
#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: RwLock<HashMap<String, Job>>,
    /// job ids in enqueue order
    order: RwLock<Vec<String>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: Job) -> JobResult<String> {
        let id = job.id.clone();
        self.jobs.write().await.insert(id.clone(), job);
        self.order.write().await.push(id.clone());
        Ok(id)
    }

    async fn get(&self, job_id: &str) -> JobResult<Option<Job>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn dequeue(&self, queue: &str) -> JobResult<Option<Job>> {
        let order = self.order.read().await;
        let mut jobs = self.jobs.write().await;

        for id in order.iter() {
            if let Some(job) = jobs.get_mut(id) {
                if job.queue == queue && job.status == JobStatus::Pending {
                    job.mark_running();
                    return Ok(Some(job.clone()));
                }
            }
        }

        Ok(None)
    }

    async fn update(&self, job: &Job) -> JobResult<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(JobError::NotFound(job.id.clone())),
        }
    }

    async fn list(&self, queue: &str, status: Option<JobStatus>) -> JobResult<Vec<Job>> {
        let order = self.order.read().await;
        let jobs = self.jobs.read().await;
        Ok(order
            .iter()
            .filter_map(|id| jobs.get(id))
            .filter(|j| j.queue == queue && status.map_or(true, |s| j.status == s))
            .cloned()
            .collect())
    }
}

/// Handler for a specific job type
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> JobResult<()>;
}

/// Processes jobs from one queue
pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    queue_name: String,
    handlers: HashMap<String, Box<dyn JobHandler>>,
}

impl JobWorker {
    pub fn new(queue: Arc<dyn JobQueue>, queue_name: impl Into<String>) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job type
    pub fn register<H: JobHandler + 'static>(&mut self, job_type: impl Into<String>, handler: H) {
        self.handlers.insert(job_type.into(), Box::new(handler));
    }

    /// Process one job; `false` when the queue had nothing ready
    pub async fn process_one(&self) -> JobResult<bool> {
        let mut job = match self.queue.dequeue(&self.queue_name).await? {
            Some(job) => job,
            None => return Ok(false),
        };

        let outcome = match self.handlers.get(&job.job_type) {
            Some(handler) => handler.handle(&job).await,
            None => Err(JobError::Failed(format!("Unknown job type: {}", job.job_type))),
        };

        match outcome {
            Ok(()) => {
                debug!(job_id = %job.id, job_type = %job.job_type, "Job completed");
                job.mark_completed();
            }
            Err(e) => {
                warn!(job_id = %job.id, job_type = %job.job_type, error = %e, "Job failed");
                job.mark_failed(e.to_string());
            }
        }

        self.queue.update(&job).await?;
        Ok(true)
    }

    /// Process ready jobs until none are left, returning how many ran
    pub async fn drain(&self) -> JobResult<usize> {
        let mut processed = 0;
        while self.process_one().await? {
            processed += 1;
        }
        Ok(processed)
    }

    /// Run the worker loop until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.process_one().await {
                Ok(true) => continue,
                Ok(false) => tokio::time::Duration::from_millis(100),
                Err(e) => {
                    error!(error = %e, "Job worker error");
                    tokio::time::Duration::from_secs(1)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(idle) => {}
                changed = shutdown.changed() => {
                    // sender gone
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
