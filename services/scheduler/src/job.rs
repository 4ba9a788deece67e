//! One batch job's lifecycle state machine.
//!
//! A job wraps a catalog entry plus the container it currently owns. The
//! status graph is strict:
//!
//! ```text
//! Pending -> Running <-> Paused
//!              |   \
//!              v    v
//!          Completed Error -> (Running, while retry budget remains)
//! ```
//!
//! A container handle exists iff the job is Running or Paused; every exit
//! from those states removes the container and releases the handle
//! exactly once. Operations that find the state graph violated return
//! [`JobError::Precondition`] - that is a policy bug to fix, not a
//! runtime condition to recover from.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use coloc_events::{Event, EventSink};

use crate::catalog::JobSpec;
use crate::docker::ApiError;
use crate::runtime::{ContainerHandle, ContainerRuntime, ERROR_MARKER, SUCCESS_MARKER};

/// Consecutive errors after which a job is permanently failed.
pub const MAX_JOB_RETRIES: u32 = 3;

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Error,
}

/// Errors from job lifecycle operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// The operation was called in a state that forbids it. Indicates a
    /// bug in the calling policy.
    #[error("precondition violated for job {name}: {detail}")]
    Precondition { name: String, detail: String },

    /// The job exceeded its retry budget and refuses to start.
    #[error("job {name} permanently failed after {attempts} attempts")]
    RetriesExhausted { name: String, attempts: u32 },

    /// The container runtime rejected the call.
    #[error(transparent)]
    Runtime(#[from] ApiError),
}

/// One batch job.
pub struct Job {
    spec: JobSpec,
    status: JobStatus,
    cores: Vec<usize>,
    handle: Option<ContainerHandle>,
    error_count: u32,
    runtime: Arc<dyn ContainerRuntime>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.spec.name)
            .field("status", &self.status)
            .field("cores", &self.cores)
            .field("error_count", &self.error_count)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

impl Job {
    /// Create a Pending job from a catalog entry.
    pub fn new(
        spec: JobSpec,
        runtime: Arc<dyn ContainerRuntime>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            spec,
            status: JobStatus::Pending,
            cores: Vec::new(),
            handle: None,
            error_count: 0,
            runtime,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Parallelism class declared in the catalog. Never changes, even
    /// when the job is borrowed into another class's slot.
    pub fn class(&self) -> usize {
        self.spec.class
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Cores granted at the last start/update_cores call.
    pub fn cores(&self) -> &[usize] {
        &self.cores
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// True once the retry budget is spent; such a job never starts again.
    pub fn retries_exhausted(&self) -> bool {
        self.error_count > MAX_JOB_RETRIES
    }

    /// Engine ID of the owned container, if any. Exposed for tests.
    pub fn container_id(&self) -> Option<&str> {
        self.handle.as_ref().map(|h| h.id.as_str())
    }

    fn precondition(&self, detail: impl Into<String>) -> JobError {
        JobError::Precondition {
            name: self.spec.name.clone(),
            detail: detail.into(),
        }
    }

    /// Launch the job's container pinned to `cores`.
    ///
    /// The command template is rendered with one thread per granted core.
    /// A launch rejected by the runtime counts against the retry budget.
    pub async fn start(&mut self, cores: &[usize]) -> Result<(), JobError> {
        if self.retries_exhausted() {
            return Err(JobError::RetriesExhausted {
                name: self.spec.name.clone(),
                attempts: self.error_count,
            });
        }
        if !matches!(self.status, JobStatus::Pending | JobStatus::Error) {
            return Err(self.precondition(format!("start from {:?}", self.status)));
        }
        if cores.is_empty() {
            return Err(self.precondition("start with an empty core set"));
        }

        let mut cores = cores.to_vec();
        cores.sort_unstable();
        let threads = cores.len();
        let command = self.spec.render_command(threads);

        let handle = match self
            .runtime
            .launch(&self.spec.name, &self.spec.image, &command, &cores)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                self.error_count += 1;
                self.status = JobStatus::Error;
                warn!(
                    job = %self.spec.name,
                    error = %e,
                    error_count = self.error_count,
                    "Launch failed"
                );
                return Err(e.into());
            }
        };

        self.handle = Some(handle);
        self.cores = cores;
        self.status = JobStatus::Running;

        info!(job = %self.spec.name, cores = ?self.cores, threads, "Job started");
        self.events
            .record(Event::job_started(&self.spec.name, &self.cores, threads));
        Ok(())
    }

    /// Suspend the running container.
    pub async fn pause(&mut self) -> Result<(), JobError> {
        if self.status != JobStatus::Running {
            return Err(self.precondition(format!("pause from {:?}", self.status)));
        }
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| self.precondition("pause without a container"))?;

        self.runtime.pause(handle).await?;
        self.status = JobStatus::Paused;

        info!(job = %self.spec.name, "Job paused");
        self.events.record(Event::job_paused(&self.spec.name));
        Ok(())
    }

    /// Resume the paused container.
    pub async fn resume(&mut self) -> Result<(), JobError> {
        if self.status != JobStatus::Paused {
            return Err(self.precondition(format!("resume from {:?}", self.status)));
        }
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| self.precondition("resume without a container"))?;

        self.runtime.unpause(handle).await?;
        self.status = JobStatus::Running;

        info!(job = %self.spec.name, "Job unpaused");
        self.events.record(Event::job_unpaused(&self.spec.name));
        Ok(())
    }

    /// Re-pin the live container to `cores` without restarting it.
    ///
    /// No-op when the granted set is already `cores`.
    pub async fn update_cores(&mut self, cores: &[usize]) -> Result<(), JobError> {
        if !matches!(self.status, JobStatus::Running | JobStatus::Paused) {
            return Err(self.precondition(format!("update_cores from {:?}", self.status)));
        }
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| self.precondition("update_cores without a container"))?;

        let mut cores = cores.to_vec();
        cores.sort_unstable();
        if cores == self.cores {
            return Ok(());
        }

        self.runtime.set_cores(handle, &cores).await?;
        self.cores = cores;

        info!(job = %self.spec.name, cores = ?self.cores, "Job cores updated");
        self.events
            .record(Event::job_cores_updated(&self.spec.name, &self.cores));
        Ok(())
    }

    /// Inspect the container logs for termination markers.
    ///
    /// Success marker without error marker: Completed, container removed.
    /// Error marker: Error, error counter bumped, container force-removed.
    /// Neither: status unchanged (a Paused job stays Paused).
    pub async fn poll_completion(&mut self) -> Result<JobStatus, JobError> {
        let Some(handle) = self.handle.as_ref() else {
            return Ok(JobStatus::Pending);
        };

        let logs = self.runtime.logs(handle).await?;
        let done = logs.contains(SUCCESS_MARKER);
        let error = logs.contains(ERROR_MARKER);

        if done && !error {
            self.release_container().await;
            self.status = JobStatus::Completed;
            self.cores.clear();

            info!(job = %self.spec.name, "Job completed");
            self.events.record(Event::job_completed(&self.spec.name));
        } else if error {
            self.release_container().await;
            self.status = JobStatus::Error;
            self.cores.clear();
            self.error_count += 1;

            warn!(
                job = %self.spec.name,
                error_count = self.error_count,
                "Job reported an error"
            );
            self.events
                .record(Event::job_errored(&self.spec.name, self.error_count));
        }

        Ok(self.status)
    }

    /// Remove the container and drop the handle. Removal failures are
    /// logged; the handle is released regardless so it is never freed
    /// twice.
    async fn release_container(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.runtime.remove(&handle).await {
                warn!(job = %self.spec.name, error = %e, "Failed to remove container");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_catalog;
    use crate::runtime::MockRuntime;
    use coloc_events::MemoryEventLog;

    fn test_job(name: &str, runtime: Arc<MockRuntime>) -> Job {
        let spec = default_catalog()
            .into_iter()
            .find(|s| s.name == name)
            .unwrap();
        Job::new(spec, runtime, Arc::new(MemoryEventLog::new()))
    }

    #[tokio::test]
    async fn test_handle_exists_iff_running_or_paused() {
        let runtime = Arc::new(MockRuntime::new());
        let mut job = test_job("vips", Arc::clone(&runtime));
        assert!(job.container_id().is_none());

        job.start(&[1, 2]).await.unwrap();
        assert!(job.container_id().is_some());

        job.pause().await.unwrap();
        assert!(job.container_id().is_some());

        job.resume().await.unwrap();
        runtime.mark_done("vips");
        assert_eq!(job.poll_completion().await.unwrap(), JobStatus::Completed);
        assert!(job.container_id().is_none());
    }

    #[tokio::test]
    async fn test_pause_resume_preserves_handle_identity() {
        let runtime = Arc::new(MockRuntime::new());
        let mut job = test_job("canneal", Arc::clone(&runtime));

        job.start(&[2, 3]).await.unwrap();
        let before = job.container_id().unwrap().to_string();

        job.pause().await.unwrap();
        job.resume().await.unwrap();

        assert_eq!(job.status(), JobStatus::Running);
        assert_eq!(job.container_id().unwrap(), before);
    }

    #[tokio::test]
    async fn test_start_renders_threads_from_core_count() {
        let runtime = Arc::new(MockRuntime::new());
        let mut job = test_job("ferret", Arc::clone(&runtime));

        job.start(&[3, 1]).await.unwrap();
        // Cores are normalized to ascending order.
        assert_eq!(job.cores(), &[1, 3]);
    }

    #[tokio::test]
    async fn test_pause_requires_running() {
        let runtime = Arc::new(MockRuntime::new());
        let mut job = test_job("dedup", runtime);

        let err = job.pause().await.unwrap_err();
        assert!(matches!(err, JobError::Precondition { .. }));
    }

    #[tokio::test]
    async fn test_poll_error_increments_counter_and_removes_container() {
        let runtime = Arc::new(MockRuntime::new());
        let mut job = test_job("dedup", Arc::clone(&runtime));

        job.start(&[0]).await.unwrap();
        runtime.mark_error("dedup");

        assert_eq!(job.poll_completion().await.unwrap(), JobStatus::Error);
        assert_eq!(job.error_count(), 1);
        assert!(job.container_id().is_none());
        assert!(runtime
            .calls()
            .iter()
            .any(|c| matches!(c, crate::runtime::LifecycleCall::Remove { name } if name == "dedup")));
    }

    #[tokio::test]
    async fn test_poll_leaves_paused_job_paused() {
        let runtime = Arc::new(MockRuntime::new());
        let mut job = test_job("radix", runtime);

        job.start(&[0]).await.unwrap();
        job.pause().await.unwrap();

        assert_eq!(job.poll_completion().await.unwrap(), JobStatus::Paused);
        assert_eq!(job.status(), JobStatus::Paused);
    }

    #[tokio::test]
    async fn test_start_refuses_after_retry_budget() {
        let runtime = Arc::new(MockRuntime::new());
        let mut job = test_job("freqmine", Arc::clone(&runtime));

        for _ in 0..4 {
            job.start(&[0, 1]).await.unwrap();
            runtime.mark_error("freqmine");
            assert_eq!(job.poll_completion().await.unwrap(), JobStatus::Error);
        }

        assert_eq!(job.error_count(), 4);
        assert!(job.retries_exhausted());
        let err = job.start(&[0, 1]).await.unwrap_err();
        assert!(matches!(err, JobError::RetriesExhausted { .. }));
        assert_eq!(job.status(), JobStatus::Error);
    }

    #[tokio::test]
    async fn test_failed_launch_counts_against_budget() {
        let runtime = Arc::new(MockRuntime::failing());
        let mut job = test_job("blackscholes", runtime);

        let err = job.start(&[0, 1]).await.unwrap_err();
        assert!(matches!(err, JobError::Runtime(_)));
        assert_eq!(job.status(), JobStatus::Error);
        assert_eq!(job.error_count(), 1);
        assert!(job.container_id().is_none());
    }

    #[tokio::test]
    async fn test_update_cores_skips_when_unchanged() {
        let runtime = Arc::new(MockRuntime::new());
        let mut job = test_job("vips", Arc::clone(&runtime));

        job.start(&[1, 2]).await.unwrap();
        runtime.clear_calls();

        job.update_cores(&[2, 1]).await.unwrap();
        assert!(runtime.calls().is_empty());

        job.update_cores(&[0, 1, 2]).await.unwrap();
        assert_eq!(
            runtime.calls(),
            vec![crate::runtime::LifecycleCall::SetCores {
                name: "vips".to_string(),
                cores: vec![0, 1, 2],
            }]
        );
        assert_eq!(job.cores(), &[0, 1, 2]);
    }
}
