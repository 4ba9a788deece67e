//! Docker Engine HTTP API client.
//!
//! This module provides an HTTP client for the Docker Engine's Unix
//! socket API. It covers exactly the container lifecycle the scheduler
//! needs: create/start, pause/unpause, cpuset update, log retrieval,
//! and forced removal.
//!
//! Reference: https://docs.docker.com/engine/api/v1.41/

use std::path::Path;

use hyper::{body::Buf, Body, Client, Method, Request};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

/// Errors from the Docker Engine API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("socket not found: {0}")]
    SocketNotFound(String),
}

impl From<hyper::http::Error> for ApiError {
    fn from(err: hyper::http::Error) -> Self {
        ApiError::Api {
            status: 0,
            message: err.to_string(),
        }
    }
}

/// Format a core set the way the Engine expects cpuset strings ("0,2,3").
pub fn cpuset(cores: &[usize]) -> String {
    cores
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateContainerBody<'a> {
    image: &'a str,
    cmd: &'a [String],
    host_config: HostConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfig {
    cpuset_cpus: String,
}

#[derive(Debug, Deserialize)]
struct CreateContainerReply {
    #[serde(rename = "Id")]
    id: String,
}

/// Docker Engine API client for Unix socket communication.
pub struct DockerClient {
    socket_path: String,
    client: Client<UnixConnector>,
}

impl DockerClient {
    /// Create a new client for the given socket path.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        let socket_path = socket_path.as_ref().to_string_lossy().to_string();
        let client = Client::unix();
        Self {
            socket_path,
            client,
        }
    }

    /// Check if the socket exists.
    pub fn socket_exists(&self) -> bool {
        Path::new(&self.socket_path).exists()
    }

    /// Create a container pinned to `cores`. Returns the container ID.
    pub async fn create_container(
        &self,
        name: &str,
        image: &str,
        command: &[String],
        cores: &[usize],
    ) -> Result<String, ApiError> {
        let body = CreateContainerBody {
            image,
            cmd: command,
            host_config: HostConfig {
                cpuset_cpus: cpuset(cores),
            },
        };
        let path = format!("/containers/create?name={}", name);
        let reply: CreateContainerReply = self.post_json(&path, &body).await?;
        Ok(reply.id)
    }

    /// Start a created container.
    pub async fn start_container(&self, id: &str) -> Result<(), ApiError> {
        self.post_empty(&format!("/containers/{}/start", id)).await
    }

    /// Suspend all processes in a running container.
    pub async fn pause_container(&self, id: &str) -> Result<(), ApiError> {
        self.post_empty(&format!("/containers/{}/pause", id)).await
    }

    /// Resume a paused container.
    pub async fn unpause_container(&self, id: &str) -> Result<(), ApiError> {
        self.post_empty(&format!("/containers/{}/unpause", id))
            .await
    }

    /// Re-pin a live container to `cores` without restarting it.
    pub async fn update_cpuset(&self, id: &str, cores: &[usize]) -> Result<(), ApiError> {
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct UpdateBody {
            cpuset_cpus: String,
        }
        let body = UpdateBody {
            cpuset_cpus: cpuset(cores),
        };
        let path = format!("/containers/{}/update", id);

        let body_bytes = serde_json::to_vec(&body)?;
        let uri = Uri::new(&self.socket_path, &path);

        debug!(path = %path, "POST request to Docker API");

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(Body::from(body_bytes))?;

        self.expect_success(request).await
    }

    /// Fetch the container's combined stdout/stderr log stream.
    ///
    /// The Engine multiplexes streams with binary frame headers; the
    /// caller only scans for text markers, so a lossy UTF-8 view of the
    /// raw bytes is returned.
    pub async fn container_logs(&self, id: &str) -> Result<String, ApiError> {
        let path = format!("/containers/{}/logs?stdout=true&stderr=true", id);
        let uri = Uri::new(&self.socket_path, &path);

        debug!(path = %path, "GET request to Docker API");

        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())?;

        let response = self.client.request(request).await?;
        let status = response.status();
        let body = hyper::body::aggregate(response.into_body()).await?;

        if status.is_success() {
            Ok(String::from_utf8_lossy(body.chunk()).to_string())
        } else {
            let message = String::from_utf8_lossy(body.chunk()).to_string();
            Err(ApiError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }

    /// Force-remove a container.
    pub async fn remove_container(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("/containers/{}?force=true", id);
        let uri = Uri::new(&self.socket_path, &path);

        debug!(path = %path, "DELETE request to Docker API");

        let request = Request::builder()
            .method(Method::DELETE)
            .uri(uri)
            .body(Body::empty())?;

        self.expect_success(request).await
    }

    /// Perform a POST request with a JSON body, expecting a JSON reply.
    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body_bytes = serde_json::to_vec(body)?;
        let uri = Uri::new(&self.socket_path, path);

        debug!(path = %path, "POST request to Docker API");

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(Body::from(body_bytes))?;

        let response = self.client.request(request).await?;
        let status = response.status();
        let body = hyper::body::aggregate(response.into_body()).await?;

        if status.is_success() {
            let result = serde_json::from_reader(body.reader())?;
            Ok(result)
        } else {
            let message = String::from_utf8_lossy(body.chunk()).to_string();
            error!(status = %status, message = %message, "Docker API error");
            Err(ApiError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }

    /// Perform a POST request with no body, expecting an empty reply.
    async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
        let uri = Uri::new(&self.socket_path, path);

        debug!(path = %path, "POST request to Docker API");

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::empty())?;

        self.expect_success(request).await
    }

    /// Dispatch a request, mapping non-2xx replies to `ApiError::Api`.
    async fn expect_success(&self, request: Request<Body>) -> Result<(), ApiError> {
        let response = self.client.request(request).await?;
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let body = hyper::body::aggregate(response.into_body()).await?;
            let message = String::from_utf8_lossy(body.chunk()).to_string();
            error!(status = %status, message = %message, "Docker API error");
            Err(ApiError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}
