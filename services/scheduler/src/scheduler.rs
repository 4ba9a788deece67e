//! The sample-decide-dispatch loop.
//!
//! One tick: sample per-core CPU usage (the blocking sampling window is
//! the tick period), move the latency-critical service's core budget by
//! at most one step, hand the complement of its cores to the policy, and
//! stop once the policy reports that every batch job has drained.
//!
//! The loop is a single logical thread: every lifecycle call completes
//! before the next sampling window opens, so there is never more than
//! one `schedule` in flight.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info};

use coloc_events::{Event, EventSink};

use crate::config::Config;
use crate::cpu::CpuSampler;
use crate::policy::Policy;
use crate::service::LatencyService;

/// Hysteresis over the latency-critical service's core count.
///
/// Raise 1 -> 2 when the service's single core runs hot; lower 2 -> 1
/// when the combined usage of its two cores falls off. At most one step
/// per tick, so the budget never oscillates within a tick.
#[derive(Debug, Clone)]
pub struct CoreBudget {
    target: usize,
    raise_threshold: f64,
    lower_threshold: f64,
}

impl CoreBudget {
    pub fn new(raise_threshold: f64, lower_threshold: f64) -> Self {
        Self {
            target: 1,
            raise_threshold,
            lower_threshold,
        }
    }

    /// Cores currently reserved for the latency-critical service.
    pub fn target(&self) -> usize {
        self.target
    }

    /// Fold one usage sample into the budget. Returns the new target.
    pub fn update(&mut self, usage: &[f64]) -> usize {
        if self.target == 1 && usage.len() >= 2 && usage[0] > self.raise_threshold {
            self.target = 2;
        } else if self.target == 2 && usage.len() >= 2 && usage[0] + usage[1] < self.lower_threshold {
            self.target = 1;
        }
        self.target
    }
}

/// The core-budget scheduler.
pub struct Scheduler<P: Policy> {
    policy: P,
    sampler: Box<dyn CpuSampler>,
    service: Box<dyn LatencyService>,
    events: Arc<dyn EventSink>,
    budget: CoreBudget,
    total_cores: usize,
}

impl<P: Policy> Scheduler<P> {
    pub fn new(
        config: &Config,
        policy: P,
        sampler: Box<dyn CpuSampler>,
        service: Box<dyn LatencyService>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            policy,
            sampler,
            service,
            events,
            budget: CoreBudget::new(config.raise_threshold, config.lower_threshold),
            total_cores: config.total_cores,
        }
    }

    /// Run until the policy drains. Returns the total elapsed time.
    pub async fn run(&mut self) -> Result<Duration> {
        let started = Instant::now();
        info!(total_cores = self.total_cores, "Starting scheduler loop");
        self.events.record(Event::scheduler_started());

        let mut reserved = self.budget.target();
        let service_cores: Vec<usize> = (0..reserved).collect();
        self.service
            .set_affinity(&service_cores)
            .await
            .context("failed to pin latency service")?;
        self.events
            .record(Event::service_cores_changed(&service_cores));

        loop {
            let usage = self.sampler.sample().await.context("CPU sampling failed")?;

            let target = self.budget.update(&usage);
            if target != reserved {
                reserved = target;
                let service_cores: Vec<usize> = (0..reserved).collect();
                info!(cores = ?service_cores, "Latency service core budget changed");
                self.service
                    .set_affinity(&service_cores)
                    .await
                    .context("failed to re-pin latency service")?;
                self.events
                    .record(Event::service_cores_changed(&service_cores));
            }

            let available: Vec<usize> = (reserved..self.total_cores).collect();
            debug!(?available, "Tick");
            self.policy
                .schedule(&available)
                .await
                .context("scheduling tick failed")?;

            if self.policy.is_completed() {
                break;
            }
        }

        let elapsed = started.elapsed();
        info!(
            elapsed_secs = elapsed.as_secs_f64(),
            "All batch jobs completed"
        );
        self.events.record(Event::scheduler_finished(format!(
            "{:.3}s",
            elapsed.as_secs_f64()
        )));
        Ok(elapsed)
    }
}
