//! Core-budget scheduler library.
//!
//! Co-locates one latency-critical service with a population of parallel
//! batch jobs on a small fixed-core machine. Each tick the scheduler
//! samples per-core CPU usage, decides how many cores the latency-critical
//! service needs, hands the complement to a scheduling policy, and the
//! policy drives batch containers through start/pause/resume/migrate so
//! that no batch job ever sits on a core claimed by the service.
//!
//! ## Modules
//!
//! - [`catalog`]: static batch job descriptors (image, command, class)
//! - [`config`]: environment-driven configuration
//! - [`cpu`]: per-core CPU utilization sampling
//! - [`docker`]: Docker Engine API client over the Unix socket
//! - [`job`]: one batch job's lifecycle state machine
//! - [`policy`]: the class-based scheduling policy
//! - [`runtime`]: container runtime seam (Docker or mock)
//! - [`scheduler`]: the sample-decide-dispatch loop
//! - [`service`]: latency-critical service affinity control

pub mod catalog;
pub mod config;
pub mod cpu;
pub mod docker;
pub mod job;
pub mod policy;
pub mod runtime;
pub mod scheduler;
pub mod service;
