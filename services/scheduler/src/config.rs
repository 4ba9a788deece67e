//! Configuration for the scheduler.

use std::time::Duration;

use anyhow::Result;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Docker Engine Unix socket.
    pub docker_socket: String,

    /// Number of physical cores on the machine.
    pub total_cores: usize,

    /// Sampling window per tick (also the tick period).
    pub tick_interval: Duration,

    /// Raise the latency service from 1 to 2 cores when the usage of its
    /// single core exceeds this percentage.
    pub raise_threshold: f64,

    /// Lower the latency service from 2 to 1 cores when the combined
    /// usage of its two cores drops below this percentage.
    pub lower_threshold: f64,

    /// Path of the JSON-lines event log.
    pub event_log: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let docker_socket = std::env::var("COLOC_DOCKER_SOCKET")
            .unwrap_or_else(|_| "/var/run/docker.sock".to_string());

        let total_cores = std::env::var("COLOC_TOTAL_CORES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4);

        let tick_interval = std::env::var("COLOC_TICK_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(1));

        let raise_threshold = std::env::var("COLOC_RAISE_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(75.0);

        let lower_threshold = std::env::var("COLOC_LOWER_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(140.0);

        let event_log = std::env::var("COLOC_EVENT_LOG")
            .unwrap_or_else(|_| "scheduler_events.jsonl".to_string());

        let log_level = std::env::var("COLOC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            docker_socket,
            total_cores,
            tick_interval,
            raise_threshold,
            lower_threshold,
            event_log,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        // Only checks the fallback values; env overrides are exercised in
        // deployment, not here, to keep tests hermetic.
        let config = Config {
            docker_socket: "/var/run/docker.sock".to_string(),
            total_cores: 4,
            tick_interval: Duration::from_secs(1),
            raise_threshold: 75.0,
            lower_threshold: 140.0,
            event_log: "scheduler_events.jsonl".to_string(),
            log_level: "info".to_string(),
        };
        assert!(config.raise_threshold < config.lower_threshold);
        assert_eq!(config.total_cores, 4);
    }
}
