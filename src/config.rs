//! Configuration structures consumed by the agent core and the sandbox provisioner
//!
//! These are plain data: the binary builds them from command-line arguments,
//! tests build them with struct-update syntax over `Default`.

use std::path::PathBuf;
use std::time::Duration;

/// How much context is carried from one iteration to the next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// Long outputs are reduced to their last lines and only the most recent
    /// history entries are sent with each next-command request
    Partial,
    /// Full output goes through the summarization pipeline and the whole
    /// history is sent every time
    Full,
}

impl std::str::FromStr for ContextMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "partial" => Ok(ContextMode::Partial),
            "full" => Ok(ContextMode::Full),
            other => Err(format!("unknown context mode '{}' (expected partial or full)", other)),
        }
    }
}

impl std::fmt::Display for ContextMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextMode::Partial => write!(f, "partial"),
            ContextMode::Full => write!(f, "full"),
        }
    }
}

/// Which instruction source drives the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelection {
    /// Hosted chat-completions model, e.g. "gpt-3.5-turbo"
    Remote { model: String },
    /// Local completions server, e.g. "http://localhost:8000"
    Local { url: String },
}

impl SourceSelection {
    /// Short label used in logs and metrics
    pub fn label(&self) -> &str {
        match self {
            SourceSelection::Remote { model } => model,
            SourceSelection::Local { .. } => "local",
        }
    }
}

/// Configuration for one agent session
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// What the agent is asked to accomplish
    pub goal: String,
    /// Context carried between iterations
    pub context_mode: ContextMode,
    /// Maximum number of commands to execute (0 = unlimited)
    pub iteration_limit: usize,
    /// Maximum split depth of the summarization pipeline
    pub recursion_depth_limit: u32,
    /// Instruction source identity
    pub source: SourceSelection,
    /// Lines of output kept when partial mode truncates a long output
    pub tail_lines: usize,
    /// History entries sent with each next-command request in partial mode
    pub history_window: usize,
    /// Pause between iterations
    pub iteration_delay: Duration,
    /// Interval between completion polls while a command is starting
    pub poll_interval: Duration,
    /// Interval between completion polls once a command is known to be running
    pub slow_poll_interval: Duration,
    /// Sentinel file the wrapped command writes its pid to
    pub pid_file: String,
    /// Command replaying the recorded terminal transcript
    pub transcript_command: Vec<String>,
    /// Interval of the background terminal tailer
    pub tail_interval: Duration,
    /// Upper bound for a single instruction-source request
    pub request_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            goal: String::new(),
            context_mode: ContextMode::Partial,
            iteration_limit: 0,
            recursion_depth_limit: 3,
            source: SourceSelection::Remote {
                model: "gpt-3.5-turbo".to_string(),
            },
            tail_lines: 10,
            history_window: 20,
            iteration_delay: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(250),
            slow_poll_interval: Duration::from_millis(1000),
            pid_file: "/tmp/last.pid".to_string(),
            transcript_command: vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                "/tmp/logterm".to_string(),
            ],
            tail_interval: Duration::from_millis(50),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Configuration for provisioning the sandbox container
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Docker Engine API socket
    pub socket_path: PathBuf,
    /// API version prefix used on every request
    pub api_version: String,
    /// Image the sandbox is created from
    pub image: String,
    /// Entry command keeping the container alive
    pub entry_command: Vec<String>,
    /// Network the container is attached to
    pub network: String,
    /// Security options passed through to the runtime
    pub security_options: Vec<String>,
    /// Shell started for the interactive terminal
    pub shell: String,
    /// Lines written to the terminal right after it is attached
    pub init_commands: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/var/run/docker.sock"),
            api_version: "v1.41".to_string(),
            image: "aquarium".to_string(),
            entry_command: vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()],
            network: "aquarium".to_string(),
            security_options: vec!["apparmor:unconfined".to_string()],
            shell: "/bin/bash".to_string(),
            init_commands: vec![
                "su ubuntu".to_string(),
                "cd".to_string(),
                // records everything the terminal shows to the transcript file
                "script -f /tmp/out".to_string(),
                "/bin/bash".to_string(),
            ],
        }
    }
}

/// Process-wide logging configuration
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Enable debug-level output for this crate (prompts, raw responses, terminal)
    pub debug: bool,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// OTLP collector endpoint; tracing export is disabled when None
    pub otlp_endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_mode_parse() {
        assert_eq!("partial".parse::<ContextMode>(), Ok(ContextMode::Partial));
        assert_eq!("full".parse::<ContextMode>(), Ok(ContextMode::Full));
        assert!("everything".parse::<ContextMode>().is_err());
    }

    #[test]
    fn test_source_label() {
        let remote = SourceSelection::Remote { model: "gpt-4".to_string() };
        let local = SourceSelection::Local { url: "http://localhost:8000".to_string() };
        assert_eq!(remote.label(), "gpt-4");
        assert_eq!(local.label(), "local");
    }
}
