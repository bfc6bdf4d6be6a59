//! Completion Detector - infers when a command typed into the terminal has finished
//!
//! The interactive terminal never exits, so there is no exit status to wait
//! on. Instead every command is wrapped so that it records a pid to a
//! sentinel file, and the detector polls `/proc/<pid>` through one-off execs
//! until the process is gone.
//!
//! ```text
//! ls -la  ──wrap──►  /bin/bash -c "echo \$\$>/tmp/last.pid && exec ls -la"
//! cd /tmp ──wrap──►  /bin/bash -c "echo \$\$>/tmp/last.pid; cd /tmp"
//!
//! poll:  cat /tmp/last.pid ──► ls /proc/<pid> ──► gone? done : sleep, repeat
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::sandbox::{Sandbox, SandboxError};

/// Builtins that cannot be the target of `exec`
pub const SHELL_BUILTINS: &[&str] = &[
    "cd", "export", "source", ".", "alias", "unalias", "set", "unset", "eval", "exec", "exit",
    "return", "break", "continue", "declare", "typeset", "local", "readonly", "shift",
];

/// Whether the first whitespace-delimited token of `command` is a shell builtin
pub fn is_shell_builtin(command: &str) -> bool {
    command
        .split_whitespace()
        .next()
        .map(|first| SHELL_BUILTINS.contains(&first))
        .unwrap_or(false)
}

/// Wrap `command` so it records its pid in `pid_file` before running
///
/// Non-builtins replace the wrapper shell through `exec`, so the recorded pid
/// is the command itself. Builtins run inside the wrapper shell, whose pid is
/// recorded instead. The returned line ends with a newline.
pub fn wrap_command(command: &str, pid_file: &str) -> String {
    let escaped = command.replace('"', "\"'\"'\"");
    if is_shell_builtin(command) {
        format!("/bin/bash -c \"echo \\$\\$>{}; {}\"\n", pid_file, escaped)
    } else {
        format!("/bin/bash -c \"echo \\$\\$>{} && exec {}\"\n", pid_file, escaped)
    }
}

/// Polls the sandbox until the last wrapped command has exited
pub struct CompletionDetector {
    sandbox: Arc<dyn Sandbox>,
    pid_file: String,
    poll_interval: Duration,
    slow_poll_interval: Duration,
}

impl CompletionDetector {
    /// Create a new completion detector
    ///
    /// # Arguments
    /// * `sandbox` - Sandbox the one-off checks run in
    /// * `pid_file` - Sentinel file written by `wrap_command`
    /// * `poll_interval` - Delay before each check while the command is starting
    /// * `slow_poll_interval` - Extra delay between checks once it is known to be running
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        pid_file: impl Into<String>,
        poll_interval: Duration,
        slow_poll_interval: Duration,
    ) -> Self {
        Self {
            sandbox,
            pid_file: pid_file.into(),
            poll_interval,
            slow_poll_interval,
        }
    }

    /// Detector using the intervals and sentinel path from `config`
    pub fn from_config(sandbox: Arc<dyn Sandbox>, config: &AgentConfig) -> Self {
        Self::new(
            sandbox,
            config.pid_file.clone(),
            config.poll_interval,
            config.slow_poll_interval,
        )
    }

    /// Sentinel file path
    pub fn pid_file(&self) -> &str {
        &self.pid_file
    }

    /// Wrap a command for this detector's sentinel file
    pub fn wrap(&self, command: &str) -> String {
        wrap_command(command, &self.pid_file)
    }

    /// Pid recorded by the last wrapped command, if any
    pub async fn last_pid(&self) -> Result<Option<u32>, SandboxError> {
        let argv = vec!["cat".to_string(), self.pid_file.clone()];
        let output = self.sandbox.run_one_off(&argv).await?;

        let text = output.stdout_lossy();
        let pid = text.trim();
        if pid.is_empty() {
            // nothing has been run yet, or the file is unreadable
            return Ok(None);
        }
        match pid.parse::<u32>() {
            Ok(pid) => Ok(Some(pid)),
            Err(_) => {
                warn!(pid_file = %self.pid_file, contents = %pid, "Pid file does not contain a pid");
                Ok(None)
            }
        }
    }

    /// Whether the last wrapped command is still running
    pub async fn is_running(&self) -> Result<bool, SandboxError> {
        let pid = match self.last_pid().await? {
            Some(pid) => pid,
            None => return Ok(false),
        };

        let argv = vec!["ls".to_string(), format!("/proc/{}", pid)];
        let output = self.sandbox.run_one_off(&argv).await?;
        Ok(match output.exit_code {
            Some(code) => code == 0,
            None => !output.stderr_lossy().contains("cannot access"),
        })
    }

    /// Block until the last wrapped command has exited
    ///
    /// Returns as soon as the pid is observed absent. Any error from the
    /// sandbox is returned to the caller.
    pub async fn wait_for_completion(&self) -> Result<(), SandboxError> {
        let mut announced = false;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            if !self.is_running().await? {
                return Ok(());
            }
            if !announced {
                info!(sandbox = self.sandbox.id(), "Waiting for command to finish");
                announced = true;
            }
            tokio::time::sleep(self.slow_poll_interval).await;
        }
    }
}
