//! Event type definitions for all scheduler events.
//!
//! Each event is a flat record: a kind tag plus the optional fields that
//! kind carries. Flat records keep the JSON lines trivially convertible
//! into a time-ordered event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The scheduler loop started.
    SchedulerStarted,

    /// The scheduler loop finished (all jobs drained).
    SchedulerFinished,

    /// The latency-critical service was re-pinned to a new core set.
    ServiceCoresChanged,

    /// A job's container was launched.
    JobStarted,

    /// A running job was suspended.
    JobPaused,

    /// A paused job was resumed.
    JobUnpaused,

    /// A live job was re-pinned to a new core set.
    JobCoresUpdated,

    /// A job terminated successfully.
    JobCompleted,

    /// A job hit a transient error and was released for retry.
    JobErrored,

    /// A job exhausted its retry budget and left the system.
    JobFailed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::SchedulerStarted => "scheduler_started",
            EventKind::SchedulerFinished => "scheduler_finished",
            EventKind::ServiceCoresChanged => "service_cores_changed",
            EventKind::JobStarted => "job_started",
            EventKind::JobPaused => "job_paused",
            EventKind::JobUnpaused => "job_unpaused",
            EventKind::JobCoresUpdated => "job_cores_updated",
            EventKind::JobCompleted => "job_completed",
            EventKind::JobErrored => "job_errored",
            EventKind::JobFailed => "job_failed",
        };
        write!(f, "{}", s)
    }
}

/// One scheduler event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// When the transition happened.
    pub occurred_at: DateTime<Utc>,

    /// The kind of transition.
    pub kind: EventKind,

    /// Job name, for job-scoped events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,

    /// Core indices involved in the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cores: Option<Vec<usize>>,

    /// Thread count the job was launched with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,

    /// Free-form detail (error text, elapsed time).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Event {
    fn new(kind: EventKind) -> Self {
        Self {
            occurred_at: Utc::now(),
            kind,
            job: None,
            cores: None,
            threads: None,
            detail: None,
        }
    }

    fn with_job(kind: EventKind, job: &str) -> Self {
        let mut event = Self::new(kind);
        event.job = Some(job.to_string());
        event
    }

    /// The scheduler loop started.
    pub fn scheduler_started() -> Self {
        Self::new(EventKind::SchedulerStarted)
    }

    /// The scheduler loop finished; `detail` carries the elapsed time.
    pub fn scheduler_finished(detail: impl Into<String>) -> Self {
        let mut event = Self::new(EventKind::SchedulerFinished);
        event.detail = Some(detail.into());
        event
    }

    /// The latency-critical service now owns `cores`.
    pub fn service_cores_changed(cores: &[usize]) -> Self {
        let mut event = Self::new(EventKind::ServiceCoresChanged);
        event.cores = Some(cores.to_vec());
        event
    }

    /// Job `job` was launched on `cores` with `threads` threads.
    pub fn job_started(job: &str, cores: &[usize], threads: usize) -> Self {
        let mut event = Self::with_job(EventKind::JobStarted, job);
        event.cores = Some(cores.to_vec());
        event.threads = Some(threads);
        event
    }

    /// Job `job` was suspended.
    pub fn job_paused(job: &str) -> Self {
        Self::with_job(EventKind::JobPaused, job)
    }

    /// Job `job` was resumed.
    pub fn job_unpaused(job: &str) -> Self {
        Self::with_job(EventKind::JobUnpaused, job)
    }

    /// Job `job` was re-pinned to `cores` without restarting.
    pub fn job_cores_updated(job: &str, cores: &[usize]) -> Self {
        let mut event = Self::with_job(EventKind::JobCoresUpdated, job);
        event.cores = Some(cores.to_vec());
        event
    }

    /// Job `job` terminated successfully.
    pub fn job_completed(job: &str) -> Self {
        Self::with_job(EventKind::JobCompleted, job)
    }

    /// Job `job` hit a transient error; `attempt` is the new error count.
    pub fn job_errored(job: &str, attempt: u32) -> Self {
        let mut event = Self::with_job(EventKind::JobErrored, job);
        event.detail = Some(format!("attempt {}", attempt));
        event
    }

    /// Job `job` exhausted its retry budget.
    pub fn job_failed(job: &str, attempts: u32) -> Self {
        let mut event = Self::with_job(EventKind::JobFailed, job);
        event.detail = Some(format!("permanently failed after {} attempts", attempts));
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::JobCoresUpdated).unwrap();
        assert_eq!(json, "\"job_cores_updated\"");
    }

    #[test]
    fn test_event_roundtrip() {
        let event = Event::job_started("vips", &[1, 2], 2);
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_empty_fields_are_omitted() {
        let event = Event::job_paused("dedup");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("cores"));
        assert!(!json.contains("threads"));
        assert!(json.contains("\"job\":\"dedup\""));
    }
}
