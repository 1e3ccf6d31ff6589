//! In-memory registry of submitted generation jobs.
//!
//! Each job wraps one pipeline run. Finished jobs stay queryable until the
//! retention period has passed, after which `evict_expired` drops them and
//! removes the workspace still holding a successful run's artifact.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::errors::{ErrorDetail, ErrorKind, PipelineError};
use crate::pipeline::{Artifact, CorrelationId, PipelineOrchestrator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

enum JobState {
    Running,
    Succeeded(Artifact),
    Failed(PipelineError),
}

struct Job {
    state: JobState,
    cancel: CancellationToken,
    submitted_at: DateTime<Utc>,
    finished_at: Option<(DateTime<Utc>, Instant)>,
}

impl Job {
    fn status(&self) -> JobStatus {
        match &self.state {
            JobState::Running => JobStatus::Running,
            JobState::Succeeded(_) => JobStatus::Succeeded,
            JobState::Failed(err) if err.kind == ErrorKind::Cancelled => JobStatus::Cancelled,
            JobState::Failed(_) => JobStatus::Failed,
        }
    }

    fn view(&self, id: CorrelationId) -> JobView {
        let (artifact, error) = match &self.state {
            JobState::Running => (None, None),
            JobState::Succeeded(artifact) => (Some(ArtifactView::from(artifact)), None),
            JobState::Failed(err) => (None, Some(ErrorView::from(err))),
        };
        JobView {
            id,
            status: self.status(),
            submitted_at: self.submitted_at,
            finished_at: self.finished_at.map(|(at, _)| at),
            artifact,
            error,
        }
    }
}

/// What the API reports for a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: CorrelationId,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactView {
    pub file_name: String,
    pub extension: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub produced_at: DateTime<Utc>,
}

impl From<&Artifact> for ArtifactView {
    fn from(artifact: &Artifact) -> Self {
        Self {
            file_name: artifact.file_name(),
            extension: artifact.extension.clone(),
            size_bytes: artifact.size_bytes,
            mime_type: artifact.mime_type(),
            produced_at: artifact.produced_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorView {
    pub kind: ErrorKind,
    pub title: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<ErrorDetail>,
    pub retryable: bool,
}

impl From<&PipelineError> for ErrorView {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind,
            title: err.kind.title(),
            message: err.message.clone(),
            detail: err.detail.clone(),
            retryable: err.is_retryable(),
        }
    }
}

/// Why an artifact could not be handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLookup {
    Unknown,
    Running,
    Unavailable(JobStatus),
}

#[derive(Clone)]
pub struct JobRegistry {
    orchestrator: PipelineOrchestrator,
    jobs: Arc<Mutex<HashMap<CorrelationId, Job>>>,
    /// One task per job, alive until the job's run has ended.
    tasks: TaskTracker,
}

impl JobRegistry {
    pub fn new(orchestrator: PipelineOrchestrator) -> Self {
        Self {
            orchestrator,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            tasks: TaskTracker::new(),
        }
    }

    pub fn orchestrator(&self) -> &PipelineOrchestrator {
        &self.orchestrator
    }

    /// Start a pipeline and track it. Returns the new job's id.
    pub async fn submit(&self, prompt: &str) -> Result<CorrelationId, PipelineError> {
        let handle = self.orchestrator.submit(prompt)?;
        let id = handle.correlation_id();

        self.jobs.lock().await.insert(
            id,
            Job {
                state: JobState::Running,
                cancel: handle.cancellation_token(),
                submitted_at: Utc::now(),
                finished_at: None,
            },
        );

        let jobs = Arc::clone(&self.jobs);
        self.tasks.spawn(async move {
            let state = match handle.wait().await {
                Ok(artifact) => JobState::Succeeded(artifact),
                Err(err) => JobState::Failed(err),
            };
            if let Some(job) = jobs.lock().await.get_mut(&id) {
                job.state = state;
                job.finished_at = Some((Utc::now(), Instant::now()));
            }
        });

        Ok(id)
    }

    pub async fn get(&self, id: CorrelationId) -> Option<JobView> {
        self.jobs.lock().await.get(&id).map(|job| job.view(id))
    }

    pub async fn list(&self) -> Vec<JobView> {
        let mut views: Vec<_> = self
            .jobs
            .lock()
            .await
            .iter()
            .map(|(id, job)| job.view(*id))
            .collect();
        views.sort_by_key(|v| v.submitted_at);
        views
    }

    /// The artifact of a succeeded job.
    pub async fn artifact(&self, id: CorrelationId) -> Result<Artifact, ArtifactLookup> {
        let jobs = self.jobs.lock().await;
        let job = jobs.get(&id).ok_or(ArtifactLookup::Unknown)?;
        match &job.state {
            JobState::Succeeded(artifact) => Ok(artifact.clone()),
            JobState::Running => Err(ArtifactLookup::Running),
            JobState::Failed(_) => Err(ArtifactLookup::Unavailable(job.status())),
        }
    }

    /// Request cancellation. Cancelling a finished job changes nothing.
    pub async fn cancel(&self, id: CorrelationId) -> Option<JobView> {
        let jobs = self.jobs.lock().await;
        let job = jobs.get(&id)?;
        if matches!(job.state, JobState::Running) {
            tracing::info!(correlation_id = %id, "cancelling generation");
            job.cancel.cancel();
        }
        Some(job.view(id))
    }

    pub async fn cancel_all(&self) {
        for job in self.jobs.lock().await.values() {
            job.cancel.cancel();
        }
    }

    /// Cancel every running job and wait until all of their runs have ended.
    /// Jobs submitted afterwards are still tracked but no longer awaited.
    pub async fn shutdown(&self) {
        self.cancel_all().await;
        self.tasks.close();
        self.tasks.wait().await;
        tracing::debug!("all jobs finished");
    }

    /// Drop jobs finished more than `retention` ago. Returns how many went.
    pub async fn evict_expired(&self, retention: Duration) -> usize {
        let expired: Vec<(CorrelationId, Job)> = {
            let mut jobs = self.jobs.lock().await;
            let ids: Vec<_> = jobs
                .iter()
                .filter(|(_, job)| {
                    job.finished_at
                        .is_some_and(|(_, at)| at.elapsed() >= retention)
                })
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| jobs.remove(&id).map(|job| (id, job)))
                .collect()
        };

        for (id, job) in &expired {
            // Failed runs schedule their own workspace removal.
            if let JobState::Succeeded(artifact) = &job.state
                && let Err(e) = self.orchestrator.release(artifact)
            {
                tracing::warn!(correlation_id = %id, error = %e, "failed to remove workspace");
            }
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "evicted finished jobs");
        }
        expired.len()
    }

    /// Run `evict_expired` every `interval` until the registry is dropped.
    pub fn spawn_eviction(&self, retention: Duration, interval: Duration) {
        let jobs = Arc::downgrade(&self.jobs);
        let orchestrator = self.orchestrator.clone();
        let tasks = self.tasks.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(jobs) = jobs.upgrade() else {
                    break;
                };
                let registry = JobRegistry {
                    orchestrator: orchestrator.clone(),
                    jobs,
                    tasks: tasks.clone(),
                };
                registry.evict_expired(retention).await;
            }
        });
    }
}
