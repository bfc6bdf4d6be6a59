//! Sandbox runtime module
//!
//! This module provides the boundary between the agent core and the container
//! runtime the agent's commands execute in:
//! - `Sandbox` - shared, read-mostly operations (one-off commands)
//! - `Terminal` - the single interactive shell commands are injected into
//! - Docker Engine API client over the Unix socket
//! - Provisioning (create, attach network, start, open terminal, remove)
//!
//! # Architecture
//!
//! ```text
//! AgentController ──send_line()──► Terminal (persistent bash, owned by one session)
//!        │
//!        └──run_one_off()──► Sandbox ──► docker exec (pid polling, transcript replay)
//!                              ▲
//!        TerminalTailer ───────┘ (read-only)
//! ```

pub mod config;
pub mod docker;
pub mod manager;
pub mod stream;

use async_trait::async_trait;

pub use docker::{DockerClient, DockerContainer, DockerTerminal};
pub use manager::{ProvisionedSandbox, SandboxManager};

/// Captured result of a one-off command run inside the sandbox
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    /// Standard output bytes
    pub stdout: Vec<u8>,
    /// Standard error bytes
    pub stderr: Vec<u8>,
    /// Exit code, if the runtime reported one
    pub exit_code: Option<i64>,
}

impl ExecOutput {
    /// Standard output decoded lossily as UTF-8
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Standard error decoded lossily as UTF-8
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Error type for sandbox runtime operations
#[derive(Debug)]
pub enum SandboxError {
    /// Could not reach the runtime (socket, connection)
    Transport(String),
    /// The runtime answered with a non-success status
    Api { status: u16, message: String },
    /// The sandbox exists but is not running (tolerated by the tailer)
    NotRunning(String),
    /// The runtime answered with something we could not interpret
    Malformed(String),
    /// Local I/O failure on the terminal stream
    Io(std::io::Error),
}

impl SandboxError {
    /// Whether this error only means the sandbox has stopped
    pub fn is_not_running(&self) -> bool {
        matches!(self, SandboxError::NotRunning(_))
    }
}

impl std::fmt::Display for SandboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxError::Transport(msg) => write!(f, "Sandbox transport error: {}", msg),
            SandboxError::Api { status, message } => {
                write!(f, "Sandbox API error ({}): {}", status, message)
            }
            SandboxError::NotRunning(msg) => write!(f, "Sandbox is not running: {}", msg),
            SandboxError::Malformed(msg) => write!(f, "Malformed sandbox response: {}", msg),
            SandboxError::Io(e) => write!(f, "Terminal I/O error: {}", e),
        }
    }
}

impl std::error::Error for SandboxError {}

impl From<std::io::Error> for SandboxError {
    fn from(e: std::io::Error) -> Self {
        SandboxError::Io(e)
    }
}

impl From<serde_json::Error> for SandboxError {
    fn from(e: serde_json::Error) -> Self {
        SandboxError::Malformed(e.to_string())
    }
}

/// Shared operations on a running sandbox
///
/// Implementations must be safe to call concurrently: the controller and the
/// background tailer both hold a reference.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Identifier of the sandbox (container id)
    fn id(&self) -> &str;

    /// Run a command to completion outside the interactive terminal
    async fn run_one_off(&self, argv: &[String]) -> Result<ExecOutput, SandboxError>;
}

/// The interactive terminal commands are typed into
///
/// Owned by exactly one controller; never shared.
#[async_trait]
pub trait Terminal: Send {
    /// Write raw bytes to the terminal's input
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), SandboxError>;

    /// Write a line, appending the newline if missing
    async fn send_line(&mut self, line: &str) -> Result<(), SandboxError> {
        if line.ends_with('\n') {
            self.write_all(line.as_bytes()).await
        } else {
            let mut owned = String::with_capacity(line.len() + 1);
            owned.push_str(line);
            owned.push('\n');
            self.write_all(owned.as_bytes()).await
        }
    }
}
