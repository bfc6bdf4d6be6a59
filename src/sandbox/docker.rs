//! Docker Engine API client
//!
//! Provides a high-level client for interacting with the Docker Engine HTTP
//! API over its Unix domain socket, plus the two handles the agent core uses:
//! - `DockerContainer` - one-off `exec` runs (implements `Sandbox`)
//! - `DockerTerminal` - the hijacked stdin of a long-running TTY exec
//!   (implements `Terminal`)

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioIo;
use hyperlocal::UnixConnector;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::config::*;
use super::stream::demux;
use super::{ExecOutput, Sandbox, SandboxError, Terminal};

type HyperClient = Client<UnixConnector, Full<Bytes>>;
type Upgraded = TokioIo<hyper::upgrade::Upgraded>;

/// Client for communicating with the Docker Engine API
#[derive(Clone)]
pub struct DockerClient {
    client: HyperClient,
    socket_path: PathBuf,
    api_version: String,
}

impl DockerClient {
    /// Create a new Docker Engine API client
    ///
    /// # Arguments
    /// * `socket_path` - Path to the Docker Unix socket (e.g. /var/run/docker.sock)
    /// * `api_version` - API version prefix (e.g. "v1.41")
    pub fn new(socket_path: impl Into<PathBuf>, api_version: impl Into<String>) -> Self {
        let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build(UnixConnector);

        Self {
            client,
            socket_path: socket_path.into(),
            api_version: api_version.into(),
        }
    }

    /// Path of the socket this client talks to
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn uri(&self, endpoint: &str) -> hyper::Uri {
        let path = format!("/{}{}", self.api_version, endpoint);
        hyperlocal::Uri::new(&self.socket_path, &path).into()
    }

    /// Send a request to the Engine API and return the raw response
    ///
    /// Non-success statuses are turned into `SandboxError`s; a 409 whose
    /// message says the container is not running becomes `NotRunning`.
    async fn send_request<T: Serialize>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&T>,
        upgrade: bool,
    ) -> Result<Response<Incoming>, SandboxError> {
        let json = match body {
            Some(b) => serde_json::to_vec(b)?,
            None => Vec::new(),
        };

        let mut builder = Request::builder()
            .method(method)
            .uri(self.uri(endpoint))
            .header("Content-Type", "application/json");
        if upgrade {
            builder = builder.header("Connection", "Upgrade").header("Upgrade", "tcp");
        }

        let req = builder
            .body(Full::new(Bytes::from(json)))
            .map_err(|e| SandboxError::Transport(e.to_string()))?;

        let res = self
            .client
            .request(req)
            .await
            .map_err(|e| SandboxError::Transport(e.to_string()))?;
        let status = res.status();

        if status.is_success()
            || status == StatusCode::SWITCHING_PROTOCOLS
            || status == StatusCode::NOT_MODIFIED
        {
            return Ok(res);
        }

        let body_bytes = read_body(res).await?;
        let message = serde_json::from_slice::<ApiErrorBody>(&body_bytes)
            .map(|b| b.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body_bytes).trim().to_string());

        if status == StatusCode::CONFLICT && message.contains("is not running") {
            return Err(SandboxError::NotRunning(message));
        }

        Err(SandboxError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn request_json<T: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&T>,
    ) -> Result<R, SandboxError> {
        let res = self.send_request(method, endpoint, body, false).await?;
        let bytes = read_body(res).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn request_empty<T: Serialize>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&T>,
    ) -> Result<(), SandboxError> {
        let res = self.send_request(method, endpoint, body, false).await?;
        read_body(res).await?;
        Ok(())
    }

    /// Create a container and return its id
    pub async fn create_container(&self, config: &ContainerCreate) -> Result<String, SandboxError> {
        let created: IdResponse = self
            .request_json(Method::POST, "/containers/create", Some(config))
            .await?;
        Ok(created.id)
    }

    /// Attach a container to a named network
    pub async fn connect_network(&self, network: &str, container_id: &str) -> Result<(), SandboxError> {
        let endpoint = format!("/networks/{}/connect", network);
        self.request_empty(
            Method::POST,
            &endpoint,
            Some(&NetworkConnect {
                container: container_id.to_string(),
            }),
        )
        .await
    }

    /// Start a created container
    pub async fn start_container(&self, container_id: &str) -> Result<(), SandboxError> {
        let endpoint = format!("/containers/{}/start", container_id);
        self.request_empty::<()>(Method::POST, &endpoint, None).await
    }

    /// Remove a container
    pub async fn remove_container(&self, container_id: &str, force: bool) -> Result<(), SandboxError> {
        let endpoint = format!("/containers/{}?force={}", container_id, force);
        self.request_empty::<()>(Method::DELETE, &endpoint, None).await
    }

    /// Create an exec instance inside a container and return its id
    pub async fn create_exec(&self, container_id: &str, config: &ExecCreate) -> Result<String, SandboxError> {
        let endpoint = format!("/containers/{}/exec", container_id);
        let created: IdResponse = self.request_json(Method::POST, &endpoint, Some(config)).await?;
        Ok(created.id)
    }

    /// Start an exec instance and read its attached output until it closes
    pub async fn start_exec_collect(&self, exec_id: &str) -> Result<Bytes, SandboxError> {
        let endpoint = format!("/exec/{}/start", exec_id);
        let res = self
            .send_request(
                Method::POST,
                &endpoint,
                Some(&ExecStart {
                    detach: false,
                    tty: false,
                }),
                false,
            )
            .await?;
        read_body(res).await
    }

    /// Start a TTY exec instance and hijack the connection
    ///
    /// The returned stream is the exec's terminal: writes go to its stdin,
    /// reads return what the terminal prints.
    pub async fn start_exec_upgraded(&self, exec_id: &str) -> Result<Upgraded, SandboxError> {
        let endpoint = format!("/exec/{}/start", exec_id);
        let res = self
            .send_request(
                Method::POST,
                &endpoint,
                Some(&ExecStart {
                    detach: false,
                    tty: true,
                }),
                true,
            )
            .await?;

        if res.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(SandboxError::Malformed(format!(
                "expected connection upgrade on exec start, got {}",
                res.status()
            )));
        }

        let upgraded = hyper::upgrade::on(res)
            .await
            .map_err(|e| SandboxError::Transport(e.to_string()))?;
        Ok(TokioIo::new(upgraded))
    }

    /// Inspect an exec instance (exit code, running state)
    pub async fn inspect_exec(&self, exec_id: &str) -> Result<ExecInspect, SandboxError> {
        let endpoint = format!("/exec/{}/json", exec_id);
        self.request_json::<(), _>(Method::GET, &endpoint, None).await
    }
}

async fn read_body(res: Response<Incoming>) -> Result<Bytes, SandboxError> {
    Ok(res
        .into_body()
        .collect()
        .await
        .map_err(|e| SandboxError::Transport(e.to_string()))?
        .to_bytes())
}

/// A running container, usable for one-off commands
#[derive(Clone)]
pub struct DockerContainer {
    client: DockerClient,
    id: String,
}

impl DockerContainer {
    pub fn new(client: DockerClient, id: impl Into<String>) -> Self {
        Self {
            client,
            id: id.into(),
        }
    }
}

impl std::fmt::Debug for DockerContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerContainer")
            .field("id", &self.id)
            .field("socket", &self.client.socket_path)
            .finish()
    }
}

#[async_trait]
impl Sandbox for DockerContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_one_off(&self, argv: &[String]) -> Result<ExecOutput, SandboxError> {
        let exec_id = self
            .client
            .create_exec(
                &self.id,
                &ExecCreate {
                    cmd: argv.to_vec(),
                    attach_stdin: false,
                    attach_stdout: true,
                    attach_stderr: true,
                    tty: false,
                },
            )
            .await?;

        let raw = self.client.start_exec_collect(&exec_id).await?;
        let (stdout, stderr) = demux(&raw);
        let inspect = self.client.inspect_exec(&exec_id).await?;

        trace!(
            container = %self.id,
            cmd = ?argv,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            exit_code = ?inspect.exit_code,
            "One-off exec finished"
        );

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: inspect.exit_code,
        })
    }
}

/// Interactive terminal attached to a long-running TTY exec
///
/// What the terminal prints is drained in the background and discarded: the
/// transcript recorded inside the sandbox is the source of truth for output.
pub struct DockerTerminal {
    writer: WriteHalf<Upgraded>,
    drain: JoinHandle<()>,
}

impl DockerTerminal {
    /// Open an interactive shell in a container
    pub async fn open(client: &DockerClient, container_id: &str, shell: &str) -> Result<Self, SandboxError> {
        let exec_id = client
            .create_exec(
                container_id,
                &ExecCreate {
                    cmd: vec![shell.to_string()],
                    attach_stdin: true,
                    attach_stdout: true,
                    attach_stderr: true,
                    tty: true,
                },
            )
            .await?;

        let stream = client.start_exec_upgraded(&exec_id).await?;
        let (mut reader, writer) = tokio::io::split(stream);

        let container = container_id.to_string();
        let drain = tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => trace!(container = %container, bytes = n, "Terminal output drained"),
                    Err(e) => {
                        debug!(container = %container, error = %e, "Terminal stream closed");
                        break;
                    }
                }
            }
        });

        Ok(Self { writer, drain })
    }
}

#[async_trait]
impl Terminal for DockerTerminal {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), SandboxError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

impl Drop for DockerTerminal {
    fn drop(&mut self) {
        self.drain.abort();
    }
}
