//! Class-based scheduling policy.
//!
//! Jobs are partitioned at admission into parallelism classes (one FIFO
//! queue per class) and each class owns a single running slot. Every tick
//! the policy receives the ordered set of cores not claimed by the
//! latency-critical service and converges the slots to it:
//!
//! 1. Reconcile: poll every occupied slot; completed jobs leave the
//!    system, errored jobs go to the back of their class queue until the
//!    retry budget is spent.
//! 2. Full grant: with every queue empty and exactly one slot occupied,
//!    that job gets the entire available set.
//! 3. Dispatch: walk classes from largest to smallest, carving the
//!    available set from the top; a class that still fits gets its slot
//!    ensured (resume, re-pin, or start, borrowing from other queues
//!    when its own is empty), a class that no longer fits gets its slot
//!    paused.
//!
//! Scheduling is deterministic and idempotent: repeating a tick with
//! unchanged inputs issues no lifecycle calls.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use coloc_events::{Event, EventSink};

use crate::catalog::JobSpec;
use crate::job::{Job, JobError, JobStatus};
use crate::runtime::ContainerRuntime;

/// Scheduling strategy over the per-tick available core set.
#[async_trait]
pub trait Policy: Send {
    /// Admit a job from the catalog.
    fn add_job(&mut self, spec: JobSpec);

    /// Decide and apply all state transitions for this tick.
    async fn schedule(&mut self, available: &[usize]) -> Result<(), JobError>;

    /// True once every queue and every slot is empty.
    fn is_completed(&self) -> bool;
}

struct ClassState {
    /// Core count this class is entitled to.
    size: usize,

    /// Pending jobs, strict FIFO.
    queue: VecDeque<Job>,

    /// The one job currently occupying this class's share of cores.
    slot: Option<Job>,
}

/// Policy over an ordered list of parallelism classes.
pub struct ClassPolicy {
    /// Ascending by size.
    classes: Vec<ClassState>,
    completed: bool,
    runtime: Arc<dyn ContainerRuntime>,
    events: Arc<dyn EventSink>,
}

impl ClassPolicy {
    /// Build a policy over the given class sizes (ascending, unique).
    pub fn new(
        sizes: &[usize],
        runtime: Arc<dyn ContainerRuntime>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        assert!(!sizes.is_empty(), "policy needs at least one class");
        assert!(
            sizes.windows(2).all(|w| w[0] < w[1]),
            "class sizes must be ascending and unique"
        );
        assert!(sizes[0] > 0, "class size 0 is meaningless");

        let classes = sizes
            .iter()
            .map(|&size| ClassState {
                size,
                queue: VecDeque::new(),
                slot: None,
            })
            .collect();

        Self {
            classes,
            completed: false,
            runtime,
            events,
        }
    }

    /// The strategy for catalogs of 1-core and 2-core jobs.
    pub fn one_and_two_cores(
        runtime: Arc<dyn ContainerRuntime>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::new(&[1, 2], runtime, events)
    }

    /// The strategy for catalogs of 2-core and 3-core jobs.
    pub fn two_and_three_cores(
        runtime: Arc<dyn ContainerRuntime>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::new(&[2, 3], runtime, events)
    }

    /// Class a job is admitted to: the largest class no bigger than its
    /// declared parallelism, or the smallest class as a floor.
    fn admission_index(&self, class: usize) -> usize {
        self.classes
            .iter()
            .rposition(|c| c.size <= class)
            .unwrap_or(0)
    }

    /// Job occupying the slot of the class with the given size.
    pub fn slot_job(&self, size: usize) -> Option<&Job> {
        self.classes
            .iter()
            .find(|c| c.size == size)
            .and_then(|c| c.slot.as_ref())
    }

    /// Names queued for the class with the given size, front first.
    pub fn queued_names(&self, size: usize) -> Vec<&str> {
        self.classes
            .iter()
            .find(|c| c.size == size)
            .map(|c| c.queue.iter().map(|j| j.name()).collect())
            .unwrap_or_default()
    }

    fn all_queues_empty(&self) -> bool {
        self.classes.iter().all(|c| c.queue.is_empty())
    }

    fn all_empty(&self) -> bool {
        self.all_queues_empty() && self.classes.iter().all(|c| c.slot.is_none())
    }

    /// Poll every occupied slot and retire completed or errored jobs.
    async fn reconcile(&mut self) -> Result<(), JobError> {
        for idx in 0..self.classes.len() {
            let Some(mut job) = self.classes[idx].slot.take() else {
                continue;
            };

            match job.poll_completion().await? {
                JobStatus::Completed => {
                    // Job logged its own completion; nothing left to hold.
                }
                JobStatus::Error => {
                    if job.retries_exhausted() {
                        error!(
                            job = %job.name(),
                            attempts = job.error_count(),
                            "Job permanently failed, removing from scheduling"
                        );
                        self.events
                            .record(Event::job_failed(job.name(), job.error_count()));
                    } else {
                        let back = self.admission_index(job.class());
                        self.classes[back].queue.push_back(job);
                    }
                }
                _ => {
                    self.classes[idx].slot = Some(job);
                }
            }
        }
        Ok(())
    }

    /// With every queue empty and a single occupied slot, give that job
    /// the whole available set.
    async fn try_full_grant(&mut self, available: &[usize]) -> Result<bool, JobError> {
        if available.is_empty() || !self.all_queues_empty() {
            return Ok(false);
        }

        let mut occupied = self.classes.iter_mut().filter_map(|c| c.slot.as_mut());
        let (Some(job), None) = (occupied.next(), occupied.next()) else {
            return Ok(false);
        };

        job.update_cores(available).await?;
        if job.status() == JobStatus::Paused {
            job.resume().await?;
        }
        Ok(true)
    }

    /// Pop the next startable job for class `idx`, preferring its own
    /// queue and borrowing from the other queues largest-first.
    fn pop_candidate(&mut self, idx: usize) -> Option<Job> {
        let mut order: Vec<usize> = vec![idx];
        order.extend((0..self.classes.len()).rev().filter(|&i| i != idx));

        for i in order {
            while let Some(job) = self.classes[i].queue.pop_front() {
                if job.retries_exhausted() {
                    error!(
                        job = %job.name(),
                        attempts = job.error_count(),
                        "Job permanently failed, removing from scheduling"
                    );
                    self.events
                        .record(Event::job_failed(job.name(), job.error_count()));
                    continue;
                }
                return Some(job);
            }
        }
        None
    }

    /// Converge one class's slot onto the top of the remaining cores.
    ///
    /// An occupied slot is left in place while its cores stay inside the
    /// remaining set and cover the class width; it is re-pinned (never
    /// evicted) when the set shrank underneath it, a larger class claimed
    /// its cores, or an earlier shrink narrowed it below the class size.
    /// A full-granted job holding more cores than the class keeps them.
    /// An empty slot is filled from the queues. Returns the cores the
    /// slot now holds, so the caller can withhold them from smaller
    /// classes.
    async fn ensure_slot(&mut self, idx: usize, remaining: &[usize]) -> Result<Vec<usize>, JobError> {
        let size = self.classes[idx].size;
        let target: Vec<usize> = remaining[remaining.len() - size..].to_vec();

        if let Some(job) = self.classes[idx].slot.as_mut() {
            let fits = job.cores().len() >= size
                && job.cores().iter().all(|c| remaining.contains(c));
            match job.status() {
                JobStatus::Running => {
                    if !fits {
                        job.update_cores(&target).await?;
                    }
                }
                JobStatus::Paused => {
                    if !fits {
                        job.update_cores(&target).await?;
                    }
                    job.resume().await?;
                }
                _ => {}
            }
            return Ok(job.cores().to_vec());
        }

        if let Some(mut job) = self.pop_candidate(idx) {
            match job.start(&target).await {
                Ok(()) => {
                    self.classes[idx].slot = Some(job);
                    return Ok(target);
                }
                Err(JobError::Runtime(e)) => {
                    // The launch already counted against the retry budget;
                    // the slot stays empty until the next tick.
                    warn!(job = %job.name(), error = %e, "Launch rejected by runtime");
                    if job.retries_exhausted() {
                        error!(
                            job = %job.name(),
                            attempts = job.error_count(),
                            "Job permanently failed, removing from scheduling"
                        );
                        self.events
                            .record(Event::job_failed(job.name(), job.error_count()));
                    } else {
                        let back = self.admission_index(job.class());
                        self.classes[back].queue.push_back(job);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Vec::new())
    }

    /// Pause a class that no longer fits. A paused job still holds a
    /// cpuset, so if the shrink left it on reserved cores it is re-pinned
    /// onto whatever is still available (paused jobs may share cores with
    /// running ones; they consume nothing).
    async fn pause_slot(&mut self, idx: usize, available: &[usize]) -> Result<(), JobError> {
        let width = self.classes[idx].size.min(available.len());
        if let Some(job) = self.classes[idx].slot.as_mut() {
            if job.status() == JobStatus::Running {
                job.pause().await?;
            }
            let contained = job.cores().iter().all(|c| available.contains(c));
            if !contained && !available.is_empty() {
                job.update_cores(&available[..width]).await?;
            }
        }
        Ok(())
    }

    /// Carve the available set from the top, largest class first. Cores
    /// held by a slot leave the remaining set, so running slots never
    /// overlap within a tick.
    async fn dispatch(&mut self, available: &[usize]) -> Result<(), JobError> {
        let mut remaining = available.to_vec();
        for idx in (0..self.classes.len()).rev() {
            let size = self.classes[idx].size;
            if remaining.len() >= size {
                let taken = self.ensure_slot(idx, &remaining).await?;
                remaining.retain(|c| !taken.contains(c));
            } else {
                self.pause_slot(idx, available).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Policy for ClassPolicy {
    fn add_job(&mut self, spec: JobSpec) {
        let idx = self.admission_index(spec.class);
        let job = Job::new(spec, Arc::clone(&self.runtime), Arc::clone(&self.events));
        info!(job = %job.name(), class = job.class(), queue = self.classes[idx].size, "Job admitted");
        self.classes[idx].queue.push_back(job);
        self.completed = false;
    }

    async fn schedule(&mut self, available: &[usize]) -> Result<(), JobError> {
        let mut available = available.to_vec();
        available.sort_unstable();

        self.reconcile().await?;

        if self.all_empty() {
            if !self.completed {
                self.completed = true;
                info!("All batch jobs drained");
            }
            return Ok(());
        }

        if self.try_full_grant(&available).await? {
            return Ok(());
        }

        self.dispatch(&available).await
    }

    fn is_completed(&self) -> bool {
        self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::JobSpec;
    use crate::runtime::{LifecycleCall, MockRuntime};
    use coloc_events::MemoryEventLog;

    fn spec(name: &str, class: usize) -> JobSpec {
        JobSpec {
            name: name.to_string(),
            image: format!("anakli/cca:parsec_{}", name),
            command: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                format!("./run -p {} -n {{threads}}", name),
            ],
            class,
        }
    }

    fn policy_with(
        runtime: &Arc<MockRuntime>,
        sizes: &[usize],
        specs: &[(&str, usize)],
    ) -> ClassPolicy {
        let mut policy = ClassPolicy::new(
            sizes,
            Arc::clone(runtime) as Arc<dyn ContainerRuntime>,
            Arc::new(MemoryEventLog::new()),
        );
        for (name, class) in specs {
            policy.add_job(spec(name, *class));
        }
        policy
    }

    #[test]
    fn test_admission_prefers_largest_fitting_class() {
        let runtime = Arc::new(MockRuntime::new());
        let policy = policy_with(&runtime, &[2, 3], &[("small", 1), ("mid", 2), ("big", 4)]);

        assert_eq!(policy.queued_names(2), vec!["small", "mid"]);
        assert_eq!(policy.queued_names(3), vec!["big"]);
    }

    #[tokio::test]
    async fn test_three_cores_runs_both_classes() {
        let runtime = Arc::new(MockRuntime::new());
        let mut policy = policy_with(&runtime, &[1, 2], &[("a", 1), ("b", 1), ("c", 2)]);

        policy.schedule(&[0, 1, 2]).await.unwrap();

        assert_eq!(policy.slot_job(2).unwrap().name(), "c");
        assert_eq!(policy.slot_job(2).unwrap().cores(), &[1, 2]);
        assert_eq!(policy.slot_job(1).unwrap().name(), "a");
        assert_eq!(policy.slot_job(1).unwrap().cores(), &[0]);
        assert_eq!(policy.queued_names(1), vec!["b"]);
    }

    #[tokio::test]
    async fn test_two_cores_pauses_small_class() {
        let runtime = Arc::new(MockRuntime::new());
        let mut policy = policy_with(&runtime, &[1, 2], &[("a", 1), ("b", 1), ("c", 2)]);

        policy.schedule(&[0, 1, 2]).await.unwrap();
        policy.schedule(&[1, 2]).await.unwrap();

        assert_eq!(policy.slot_job(1).unwrap().status(), JobStatus::Paused);
        assert_eq!(policy.slot_job(2).unwrap().status(), JobStatus::Running);
        // The 2-core job already sits inside the available set; no re-pin.
        assert_eq!(policy.slot_job(2).unwrap().cores(), &[1, 2]);
    }

    #[tokio::test]
    async fn test_full_grant_of_all_cores() {
        let runtime = Arc::new(MockRuntime::new());
        let mut policy = policy_with(&runtime, &[1, 2], &[("vips", 2)]);

        policy.schedule(&[0, 1, 2]).await.unwrap();
        assert_eq!(policy.slot_job(2).unwrap().cores(), &[1, 2]);

        // Queues drained, one slot occupied: grant everything.
        policy.schedule(&[0, 1, 2]).await.unwrap();
        assert_eq!(policy.slot_job(2).unwrap().cores(), &[0, 1, 2]);
        assert!(policy.slot_job(1).is_none());
    }

    #[tokio::test]
    async fn test_fallback_borrowing_keeps_catalog_class() {
        let runtime = Arc::new(MockRuntime::new());
        // Only 1-core jobs; the 2-core slot borrows one.
        let mut policy = policy_with(&runtime, &[1, 2], &[("a", 1), ("b", 1)]);

        policy.schedule(&[0, 1, 2]).await.unwrap();

        let borrowed = policy.slot_job(2).unwrap();
        assert_eq!(borrowed.name(), "a");
        assert_eq!(borrowed.class(), 1);
        assert_eq!(policy.slot_job(1).unwrap().name(), "b");
    }

    #[tokio::test]
    async fn test_error_requeues_at_back_of_original_queue() {
        let runtime = Arc::new(MockRuntime::new());
        let mut policy = policy_with(&runtime, &[1, 2], &[("dedup", 1), ("radix", 1), ("c", 2)]);

        policy.schedule(&[0, 1, 2]).await.unwrap();
        assert_eq!(policy.slot_job(1).unwrap().name(), "dedup");

        runtime.mark_error("dedup");
        policy.schedule(&[0, 1, 2]).await.unwrap();

        // dedup went to the back of q1, radix took the slot.
        assert_eq!(policy.slot_job(1).unwrap().name(), "radix");
        assert_eq!(policy.queued_names(1), vec!["dedup"]);
    }

    #[tokio::test]
    async fn test_exhausted_job_leaves_the_system() {
        let runtime = Arc::new(MockRuntime::new());
        let events = Arc::new(MemoryEventLog::new());
        let mut policy = ClassPolicy::new(
            &[1, 2],
            Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
            Arc::clone(&events) as Arc<dyn EventSink>,
        );
        policy.add_job(spec("dedup", 1));

        runtime.mark_error("dedup");
        let mut ticks = 0;
        while !policy.is_completed() && ticks < 20 {
            policy.schedule(&[0]).await.unwrap();
            ticks += 1;
        }

        // Initial start plus three retries, then the job leaves for good.
        assert!(policy.is_completed());
        assert!(policy.slot_job(1).is_none());
        assert!(policy.queued_names(1).is_empty());
        let launches = runtime
            .calls()
            .iter()
            .filter(|c| matches!(c, LifecycleCall::Launch { .. }))
            .count();
        assert_eq!(launches, 4);
        let failures = events
            .snapshot()
            .iter()
            .filter(|e| e.kind == coloc_events::EventKind::JobFailed)
            .count();
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_schedule_is_idempotent() {
        let runtime = Arc::new(MockRuntime::new());
        let mut policy = policy_with(&runtime, &[1, 2], &[("a", 1), ("c", 2)]);

        policy.schedule(&[0, 1, 2]).await.unwrap();
        runtime.clear_calls();

        policy.schedule(&[0, 1, 2]).await.unwrap();
        policy.schedule(&[0, 1, 2]).await.unwrap();
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_completion_requires_empty_queues_and_slots() {
        let runtime = Arc::new(MockRuntime::new());
        let mut policy = policy_with(&runtime, &[1, 2], &[("a", 1)]);

        policy.schedule(&[0, 1, 2]).await.unwrap();
        assert!(!policy.is_completed());

        runtime.mark_done("a");
        policy.schedule(&[0, 1, 2]).await.unwrap();
        assert!(policy.is_completed());
    }

    #[tokio::test]
    async fn test_single_available_core_runs_small_class() {
        let runtime = Arc::new(MockRuntime::new());
        let mut policy = policy_with(&runtime, &[1, 2], &[("a", 1), ("c", 2)]);

        policy.schedule(&[0, 1, 2]).await.unwrap();
        policy.schedule(&[3]).await.unwrap();

        // Large slot paused, small slot migrated onto the surviving core.
        assert_eq!(policy.slot_job(2).unwrap().status(), JobStatus::Paused);
        let small = policy.slot_job(1).unwrap();
        assert_eq!(small.status(), JobStatus::Running);
        assert_eq!(small.cores(), &[3]);
    }

    #[tokio::test]
    async fn test_no_cores_pauses_everything() {
        let runtime = Arc::new(MockRuntime::new());
        let mut policy = policy_with(&runtime, &[1, 2], &[("a", 1), ("c", 2)]);

        policy.schedule(&[0, 1, 2]).await.unwrap();
        policy.schedule(&[]).await.unwrap();

        assert_eq!(policy.slot_job(1).unwrap().status(), JobStatus::Paused);
        assert_eq!(policy.slot_job(2).unwrap().status(), JobStatus::Paused);
    }

    #[tokio::test]
    async fn test_shrink_migrates_instead_of_evicting() {
        let runtime = Arc::new(MockRuntime::new());
        // A single 2-core class; d stays queued so the full-grant shortcut
        // never fires and the shrink goes through dispatch.
        let mut policy = policy_with(&runtime, &[2], &[("c", 2), ("d", 2)]);

        policy.schedule(&[1, 2, 3]).await.unwrap();
        assert_eq!(policy.slot_job(2).unwrap().cores(), &[2, 3]);

        // Core 3 goes back to the latency service; the job is re-pinned,
        // never paused or restarted.
        runtime.clear_calls();
        policy.schedule(&[1, 2]).await.unwrap();

        let job = policy.slot_job(2).unwrap();
        assert_eq!(job.status(), JobStatus::Running);
        assert_eq!(job.cores(), &[1, 2]);
        assert!(runtime
            .calls()
            .iter()
            .all(|c| matches!(c, LifecycleCall::SetCores { .. })));
    }

    #[tokio::test]
    async fn test_resume_restores_class_width_after_shrink() {
        let runtime = Arc::new(MockRuntime::new());
        let mut policy = policy_with(&runtime, &[2, 3], &[("two", 2), ("three", 3)]);

        policy.schedule(&[1, 2, 3]).await.unwrap();
        assert_eq!(policy.slot_job(3).unwrap().cores(), &[1, 2, 3]);

        // Shrink narrows the paused 3-core job onto the surviving cores.
        policy.schedule(&[2, 3]).await.unwrap();
        assert_eq!(policy.slot_job(3).unwrap().status(), JobStatus::Paused);
        assert_eq!(policy.slot_job(3).unwrap().cores(), &[2, 3]);

        // Growing back resumes the job at its full class width.
        policy.schedule(&[1, 2, 3]).await.unwrap();
        let three = policy.slot_job(3).unwrap();
        assert_eq!(three.status(), JobStatus::Running);
        assert_eq!(three.cores(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_two_and_three_core_strategy_alternates() {
        let runtime = Arc::new(MockRuntime::new());
        let mut policy = policy_with(&runtime, &[2, 3], &[("two", 2), ("three", 3)]);

        // Three cores: only the 3-core class fits.
        policy.schedule(&[1, 2, 3]).await.unwrap();
        assert_eq!(policy.slot_job(3).unwrap().name(), "three");
        assert!(policy.slot_job(2).is_none());

        // Two cores: the 3-core job is paused and vacates core 1, the
        // 2-core job starts.
        policy.schedule(&[2, 3]).await.unwrap();
        assert_eq!(policy.slot_job(3).unwrap().status(), JobStatus::Paused);
        assert_eq!(policy.slot_job(3).unwrap().cores(), &[2, 3]);
        assert_eq!(policy.slot_job(2).unwrap().name(), "two");
        assert_eq!(policy.slot_job(2).unwrap().cores(), &[2, 3]);

        // Back to three cores: the 3-core job resumes, the 2-core job
        // pauses.
        policy.schedule(&[1, 2, 3]).await.unwrap();
        assert_eq!(policy.slot_job(3).unwrap().status(), JobStatus::Running);
        assert_eq!(policy.slot_job(2).unwrap().status(), JobStatus::Paused);
    }
}
