//! Container runtime interface and mock implementation.
//!
//! The runtime interface abstracts the container lifecycle operations the
//! scheduler needs:
//! - Launching a container pinned to a core set
//! - Pausing/unpausing execution without destroying the container
//! - Re-pinning a live container (migration)
//! - Reading logs and removing the container
//!
//! A mock implementation is provided for testing and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::docker::{ApiError, DockerClient};

/// Success marker a batch container prints on clean termination.
pub const SUCCESS_MARKER: &str = "[PARSEC] Done.";

/// Error marker a batch container prints on failure.
pub const ERROR_MARKER: &str = "Error";

/// Handle to a container owned by exactly one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Engine-assigned container ID.
    pub id: String,

    /// Container name (the job name).
    pub name: String,
}

/// Container runtime interface.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launch a container named `name` from `image`, running `command`
    /// pinned to `cores`.
    async fn launch(
        &self,
        name: &str,
        image: &str,
        command: &[String],
        cores: &[usize],
    ) -> Result<ContainerHandle, ApiError>;

    /// Suspend execution without destroying the container.
    async fn pause(&self, handle: &ContainerHandle) -> Result<(), ApiError>;

    /// Resume a suspended container.
    async fn unpause(&self, handle: &ContainerHandle) -> Result<(), ApiError>;

    /// Re-pin the container to `cores` without restarting it.
    async fn set_cores(&self, handle: &ContainerHandle, cores: &[usize]) -> Result<(), ApiError>;

    /// Fetch the container's log stream as text.
    async fn logs(&self, handle: &ContainerHandle) -> Result<String, ApiError>;

    /// Force-remove the container.
    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ApiError>;
}

/// Runtime backed by the Docker Engine API.
pub struct DockerRuntime {
    client: DockerClient,
}

impl DockerRuntime {
    /// Create a runtime talking to the Engine socket at `socket_path`.
    pub fn new(socket_path: &str) -> Result<Self, ApiError> {
        let client = DockerClient::new(socket_path);
        if !client.socket_exists() {
            return Err(ApiError::SocketNotFound(socket_path.to_string()));
        }
        Ok(Self { client })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn launch(
        &self,
        name: &str,
        image: &str,
        command: &[String],
        cores: &[usize],
    ) -> Result<ContainerHandle, ApiError> {
        let id = self
            .client
            .create_container(name, image, command, cores)
            .await?;
        self.client.start_container(&id).await?;
        Ok(ContainerHandle {
            id,
            name: name.to_string(),
        })
    }

    async fn pause(&self, handle: &ContainerHandle) -> Result<(), ApiError> {
        self.client.pause_container(&handle.id).await
    }

    async fn unpause(&self, handle: &ContainerHandle) -> Result<(), ApiError> {
        self.client.unpause_container(&handle.id).await
    }

    async fn set_cores(&self, handle: &ContainerHandle, cores: &[usize]) -> Result<(), ApiError> {
        self.client.update_cpuset(&handle.id, cores).await
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<String, ApiError> {
        self.client.container_logs(&handle.id).await
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ApiError> {
        self.client.remove_container(&handle.id).await
    }
}

/// One recorded lifecycle call, for assertions in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleCall {
    Launch { name: String, cores: Vec<usize> },
    Pause { name: String },
    Unpause { name: String },
    SetCores { name: String, cores: Vec<usize> },
    Remove { name: String },
}

/// Mock runtime for testing and dry runs.
///
/// Records every lifecycle call and serves scriptable log output per
/// container name. With `auto_completing`, a container's logs report the
/// success marker after a fixed number of log fetches, so a full run
/// drains without a real engine.
pub struct MockRuntime {
    calls: Mutex<Vec<LifecycleCall>>,
    logs: Mutex<HashMap<String, String>>,
    log_fetches: Mutex<HashMap<String, u64>>,
    id_counter: AtomicU64,
    complete_after: Option<u64>,
    fail_launches: bool,
}

impl MockRuntime {
    /// Create a mock runtime with empty logs.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            logs: Mutex::new(HashMap::new()),
            log_fetches: Mutex::new(HashMap::new()),
            id_counter: AtomicU64::new(0),
            complete_after: None,
            fail_launches: false,
        }
    }

    /// Create a mock runtime whose containers report success after
    /// `fetches` log reads.
    pub fn auto_completing(fetches: u64) -> Self {
        Self {
            complete_after: Some(fetches),
            ..Self::new()
        }
    }

    /// Create a mock runtime that fails all launches.
    pub fn failing() -> Self {
        Self {
            fail_launches: true,
            ..Self::new()
        }
    }

    /// Set the log contents served for container `name`.
    pub fn set_logs(&self, name: &str, contents: &str) {
        self.logs
            .lock()
            .expect("mock lock poisoned")
            .insert(name.to_string(), contents.to_string());
    }

    /// Make container `name` report successful termination.
    pub fn mark_done(&self, name: &str) {
        self.set_logs(name, SUCCESS_MARKER);
    }

    /// Make container `name` report a failure.
    pub fn mark_error(&self, name: &str) {
        self.set_logs(name, ERROR_MARKER);
    }

    /// All lifecycle calls recorded so far, in order.
    pub fn calls(&self) -> Vec<LifecycleCall> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }

    /// Drop the recorded call history.
    pub fn clear_calls(&self) {
        self.calls.lock().expect("mock lock poisoned").clear();
    }

    fn record(&self, call: LifecycleCall) {
        self.calls.lock().expect("mock lock poisoned").push(call);
    }

    fn next_id(&self) -> String {
        let counter = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("ctr_{:016x}", counter)
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn launch(
        &self,
        name: &str,
        image: &str,
        _command: &[String],
        cores: &[usize],
    ) -> Result<ContainerHandle, ApiError> {
        if self.fail_launches {
            return Err(ApiError::Api {
                status: 500,
                message: "mock runtime configured to fail".to_string(),
            });
        }

        debug!(name = %name, image = %image, cores = ?cores, "[MOCK] Launching container");
        self.record(LifecycleCall::Launch {
            name: name.to_string(),
            cores: cores.to_vec(),
        });
        self.log_fetches
            .lock()
            .expect("mock lock poisoned")
            .insert(name.to_string(), 0);

        Ok(ContainerHandle {
            id: self.next_id(),
            name: name.to_string(),
        })
    }

    async fn pause(&self, handle: &ContainerHandle) -> Result<(), ApiError> {
        debug!(name = %handle.name, "[MOCK] Pausing container");
        self.record(LifecycleCall::Pause {
            name: handle.name.clone(),
        });
        Ok(())
    }

    async fn unpause(&self, handle: &ContainerHandle) -> Result<(), ApiError> {
        debug!(name = %handle.name, "[MOCK] Unpausing container");
        self.record(LifecycleCall::Unpause {
            name: handle.name.clone(),
        });
        Ok(())
    }

    async fn set_cores(&self, handle: &ContainerHandle, cores: &[usize]) -> Result<(), ApiError> {
        debug!(name = %handle.name, cores = ?cores, "[MOCK] Updating container cpuset");
        self.record(LifecycleCall::SetCores {
            name: handle.name.clone(),
            cores: cores.to_vec(),
        });
        Ok(())
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<String, ApiError> {
        if let Some(limit) = self.complete_after {
            let mut fetches = self.log_fetches.lock().expect("mock lock poisoned");
            let count = fetches.entry(handle.name.clone()).or_insert(0);
            *count += 1;
            if *count > limit {
                return Ok(SUCCESS_MARKER.to_string());
            }
        }

        Ok(self
            .logs
            .lock()
            .expect("mock lock poisoned")
            .get(&handle.name)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ApiError> {
        debug!(name = %handle.name, "[MOCK] Removing container");
        self.record(LifecycleCall::Remove {
            name: handle.name.clone(),
        });
        Ok(())
    }
}
