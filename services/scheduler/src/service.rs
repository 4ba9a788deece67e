//! Latency-critical service affinity control.
//!
//! The scheduler owns the low-indexed cores on behalf of one
//! latency-critical process (memcached in the reference deployment).
//! When the core budget moves, the process is re-pinned in place with
//! `taskset`; it is never restarted.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::docker::cpuset;

/// Controller for the latency-critical service's core affinity.
#[async_trait]
pub trait LatencyService: Send + Sync {
    /// Pin the service (and all its threads) to `cores`.
    async fn set_affinity(&self, cores: &[usize]) -> Result<()>;
}

/// Re-pins a memcached process via `taskset`.
pub struct MemcachedService {
    pid: u32,
}

impl MemcachedService {
    /// Find the running memcached process.
    pub async fn discover() -> Result<Self> {
        let output = Command::new("pgrep")
            .args(["-f", "memcached"])
            .output()
            .await
            .context("failed to run pgrep")?;

        if !output.status.success() {
            bail!("no memcached process found");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let pid: u32 = stdout
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .parse()
            .context("unparseable pgrep output")?;

        info!(pid, "Found memcached process");
        Ok(Self { pid })
    }

    /// Use a known pid instead of discovering one.
    pub fn with_pid(pid: u32) -> Self {
        Self { pid }
    }
}

#[async_trait]
impl LatencyService for MemcachedService {
    async fn set_affinity(&self, cores: &[usize]) -> Result<()> {
        if cores.is_empty() {
            bail!("latency service needs at least one core");
        }

        let status = Command::new("taskset")
            .args(["-a", "-p", "-c", &cpuset(cores), &self.pid.to_string()])
            .status()
            .await
            .context("failed to run taskset")?;

        if !status.success() {
            bail!("taskset exited with {status}");
        }

        info!(pid = self.pid, cores = ?cores, "Latency service re-pinned");
        Ok(())
    }
}

/// No-op controller for tests and dry runs.
#[derive(Default)]
pub struct NullLatencyService;

#[async_trait]
impl LatencyService for NullLatencyService {
    async fn set_affinity(&self, _cores: &[usize]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_affinity_rejects_empty_core_set() {
        // Rejected before any process is touched, so a fake pid is safe.
        let service = MemcachedService::with_pid(1);
        assert!(service.set_affinity(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_null_service_accepts_any_core_set() {
        let service = NullLatencyService;
        service.set_affinity(&[]).await.unwrap();
        service.set_affinity(&[0, 1]).await.unwrap();
    }
}
