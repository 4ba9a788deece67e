//! Per-core CPU utilization sampling.
//!
//! The default sampler reads `/proc/stat` twice, a sampling window apart,
//! and reports the busy share of each core over that window as a
//! percentage. The blocking window doubles as the scheduler's tick
//! period.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

/// Source of per-core utilization percentages.
#[async_trait]
pub trait CpuSampler: Send {
    /// Sample per-core busy percentages over roughly one tick.
    async fn sample(&mut self) -> Result<Vec<f64>>;
}

/// Jiffy counters for one core, split into busy and total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CoreTimes {
    busy: u64,
    total: u64,
}

/// Parse per-core lines ("cpu0", "cpu1", ...) from /proc/stat contents.
///
/// Columns: user nice system idle iowait irq softirq steal [guest ...].
/// Idle and iowait count as idle; guest time is already folded into user.
fn parse_proc_stat(contents: &str) -> Result<Vec<CoreTimes>> {
    let mut cores = Vec::new();

    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else { continue };
        if !label.starts_with("cpu") || label == "cpu" {
            continue;
        }

        let values: Vec<u64> = fields.map(|f| f.parse().unwrap_or(0)).collect();
        if values.len() < 4 {
            bail!("malformed /proc/stat line: {line}");
        }

        let idle = values[3] + values.get(4).copied().unwrap_or(0);
        let total: u64 = values.iter().take(8).sum();
        cores.push(CoreTimes {
            busy: total - idle,
            total,
        });
    }

    if cores.is_empty() {
        bail!("no per-core lines in /proc/stat");
    }
    Ok(cores)
}

fn busy_percentages(before: &[CoreTimes], after: &[CoreTimes]) -> Vec<f64> {
    before
        .iter()
        .zip(after)
        .map(|(b, a)| {
            let total = a.total.saturating_sub(b.total);
            if total == 0 {
                return 0.0;
            }
            let busy = a.busy.saturating_sub(b.busy);
            busy as f64 / total as f64 * 100.0
        })
        .collect()
}

/// Samples /proc/stat across a fixed window.
pub struct ProcStatSampler {
    window: Duration,
}

impl ProcStatSampler {
    /// Create a sampler with the given window (the tick period).
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    fn read_counters() -> Result<Vec<CoreTimes>> {
        let contents =
            std::fs::read_to_string("/proc/stat").context("failed to read /proc/stat")?;
        parse_proc_stat(&contents)
    }
}

#[async_trait]
impl CpuSampler for ProcStatSampler {
    async fn sample(&mut self) -> Result<Vec<f64>> {
        let before = Self::read_counters()?;
        tokio::time::sleep(self.window).await;
        let after = Self::read_counters()?;
        Ok(busy_percentages(&before, &after))
    }
}

/// Replays a fixed sequence of samples. Used in tests and dry runs;
/// repeats the final sample once the sequence is spent.
pub struct FixedSampler {
    samples: Vec<Vec<f64>>,
    position: usize,
}

impl FixedSampler {
    /// Create a sampler replaying `samples` in order.
    pub fn new(samples: Vec<Vec<f64>>) -> Self {
        assert!(!samples.is_empty(), "fixed sampler needs at least one sample");
        Self {
            samples,
            position: 0,
        }
    }
}

#[async_trait]
impl CpuSampler for FixedSampler {
    async fn sample(&mut self) -> Result<Vec<f64>> {
        let sample = self.samples[self.position.min(self.samples.len() - 1)].clone();
        self.position += 1;
        Ok(sample)
    }
}
