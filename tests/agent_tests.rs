//! Integration tests for the agent system
//!
//! These tests drive the full controller loop against scripted stand-ins for
//! the sandbox, its terminal and the instruction source.
//! Tests that need a Docker daemon or a model endpoint are marked #[ignore].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use aquarium::agent::{AgentController, AgentError, CommandHistoryEntry, QuitReason, NO_OUTPUT};
use aquarium::config::{AgentConfig, ContextMode, SandboxConfig, SourceSelection};
use aquarium::llm::{InstructionError, InstructionSource};
use aquarium::sandbox::{ExecOutput, Sandbox, SandboxError, Terminal};
use aquarium::tracing::Telemetry;

/// Transcript shared between the scripted terminal and sandbox
#[derive(Default)]
struct Transcript {
    lines: Vec<String>,
    sent: Vec<String>,
}

type SharedTranscript = Arc<Mutex<Transcript>>;

fn new_transcript() -> SharedTranscript {
    Arc::new(Mutex::new(Transcript {
        lines: vec![
            "Script started on 2024-01-01".to_string(),
            "root@sandbox:/# su ubuntu".to_string(),
            "ubuntu@sandbox:/$ cd".to_string(),
            "ubuntu@sandbox:~$ script -f /tmp/out".to_string(),
            "ubuntu@sandbox:~$ /bin/bash".to_string(),
            "ubuntu@sandbox:~$".to_string(),
        ],
        sent: Vec::new(),
    }))
}

/// Terminal that "runs" a command by appending to the transcript
///
/// Commands containing `long-output` print 30 lines, `silent` prints
/// nothing, anything else prints two lines.
struct ScriptedTerminal {
    transcript: SharedTranscript,
}

#[async_trait]
impl Terminal for ScriptedTerminal {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), SandboxError> {
        let line = String::from_utf8_lossy(bytes).trim_end().to_string();
        let mut transcript = self.transcript.lock().unwrap();
        let n = transcript.sent.len();
        transcript.sent.push(line.clone());

        let output_lines = if line.contains("long-output") {
            30
        } else if line.contains("silent") {
            0
        } else {
            2
        };

        // the command is typed after the current prompt
        let prompt = transcript.lines.pop().unwrap_or_default();
        transcript.lines.push(format!("{} {}", prompt, line));
        for i in 0..output_lines {
            transcript.lines.push(format!("output {} line {}", n, i));
        }
        transcript.lines.push(String::new());
        transcript.lines.push("ubuntu@sandbox:~$".to_string());
        Ok(())
    }
}

/// Sandbox answering pid polls and transcript replays
struct ScriptedSandbox {
    transcript: SharedTranscript,
    one_off_calls: AtomicUsize,
    /// Fail every transcript replay with a transport error
    fail_transcript: bool,
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn run_one_off(&self, argv: &[String]) -> Result<ExecOutput, SandboxError> {
        self.one_off_calls.fetch_add(1, Ordering::SeqCst);
        match argv[0].as_str() {
            // the pid file is always empty: every command finishes instantly
            "cat" => Ok(ExecOutput::default()),
            _ if self.fail_transcript => Err(SandboxError::Transport("exec stream closed".into())),
            _ => {
                let transcript = self.transcript.lock().unwrap();
                let mut stdout = b"\x01\x00\x00\x00\x00\x00\x01\x00".to_vec();
                stdout.extend_from_slice(transcript.lines.join("\r\n").as_bytes());
                Ok(ExecOutput {
                    stdout,
                    stderr: Vec::new(),
                    exit_code: Some(0),
                })
            }
        }
    }
}

/// Instruction source replaying a fixed list of commands
#[derive(Default)]
struct ScriptedSource {
    commands: Vec<&'static str>,
    /// Fail the next-command request made with this many history entries
    fail_at_history: Option<usize>,
    next_calls: Mutex<Vec<Vec<CommandHistoryEntry>>>,
    outcome_calls: AtomicUsize,
    truncated_calls: AtomicUsize,
}

impl ScriptedSource {
    fn with_commands(commands: Vec<&'static str>) -> Self {
        Self {
            commands,
            ..Default::default()
        }
    }
}

#[async_trait]
impl InstructionSource for ScriptedSource {
    async fn generate_initial(&self, _goal: &str) -> Result<String, InstructionError> {
        Ok(self.commands[0].to_string())
    }

    async fn generate_next(
        &self,
        _goal: &str,
        history: &[CommandHistoryEntry],
    ) -> Result<String, InstructionError> {
        self.next_calls.lock().unwrap().push(history.to_vec());
        if self.fail_at_history == Some(history.len()) {
            return Err(InstructionError::Transport("connection reset by peer".into()));
        }
        let index = history.len().min(self.commands.len() - 1);
        Ok(self.commands[index].to_string())
    }

    async fn summarize_outcome(&self, command: &str, _output: &str) -> Result<String, InstructionError> {
        self.outcome_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("ran {}", command))
    }

    async fn summarize_truncated(&self, command: &str, tail: &str) -> Result<String, InstructionError> {
        self.truncated_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("ran {} ({} tail lines)", command, tail.lines().count()))
    }

    async fn summarize_fragment(&self, fragment: &str) -> Result<String, InstructionError> {
        Ok(fragment.lines().next().unwrap_or("").to_string())
    }

    async fn summarize_partials(&self, _command: &str, partials: &[String]) -> Result<String, InstructionError> {
        Ok(partials.join(" / "))
    }
}

fn fast_config(iteration_limit: usize) -> AgentConfig {
    AgentConfig {
        goal: "Install nginx".to_string(),
        iteration_limit,
        iteration_delay: Duration::ZERO,
        poll_interval: Duration::ZERO,
        slow_poll_interval: Duration::ZERO,
        ..Default::default()
    }
}

struct Harness {
    controller: AgentController,
    transcript: SharedTranscript,
    sandbox: Arc<ScriptedSandbox>,
    telemetry: Telemetry,
}

fn harness(config: AgentConfig, source: Arc<ScriptedSource>) -> Harness {
    build_harness(config, source, false)
}

fn build_harness(config: AgentConfig, source: Arc<ScriptedSource>, fail_transcript: bool) -> Harness {
    let transcript = new_transcript();
    let sandbox = Arc::new(ScriptedSandbox {
        transcript: transcript.clone(),
        one_off_calls: AtomicUsize::new(0),
        fail_transcript,
    });
    let terminal = Box::new(ScriptedTerminal {
        transcript: transcript.clone(),
    });
    let telemetry = Telemetry::detached().unwrap();
    let controller = AgentController::new(config, source, sandbox.clone(), terminal, telemetry.clone());
    Harness {
        controller,
        transcript,
        sandbox,
        telemetry,
    }
}

/// Test that AgentConfig has sensible defaults
#[test]
fn test_agent_config_defaults() {
    let config = AgentConfig::default();

    assert_eq!(config.context_mode, ContextMode::Partial);
    assert_eq!(config.iteration_limit, 0);
    assert_eq!(config.recursion_depth_limit, 3);
    assert_eq!(
        config.source,
        SourceSelection::Remote {
            model: "gpt-3.5-turbo".to_string()
        }
    );
    assert_eq!(config.tail_lines, 10);
    assert_eq!(config.pid_file, "/tmp/last.pid");
    assert!(config.poll_interval < config.slow_poll_interval);
}

/// Test that SandboxConfig starts the transcript recorder in the terminal
#[test]
fn test_sandbox_config_defaults() {
    let config = SandboxConfig::default();

    assert_eq!(config.image, "aquarium");
    assert_eq!(config.network, "aquarium");
    assert!(config.init_commands.iter().any(|c| c.starts_with("script -f")));
}

/// Test that an iteration limit of 3 runs exactly 3 commands
#[tokio::test]
async fn test_iteration_limit_runs_exact_command_count() {
    let source = Arc::new(ScriptedSource::with_commands(vec!["ls", "pwd", "whoami", "uname -a"]));
    let h = harness(fast_config(3), source.clone());

    let report = h.controller.run().await;

    assert!(matches!(report.reason, QuitReason::IterationLimit));
    assert_eq!(report.commands_executed, 3);
    let sent = h.transcript.lock().unwrap().sent.clone();
    assert_eq!(sent.len(), 3);
    assert!(sent[0].ends_with("exec ls\""));
    assert!(sent[2].ends_with("exec whoami\""));

    // outcomes are summarized lazily, so the third command has none
    let commands: Vec<_> = report.history.iter().map(|e| e.command.as_str()).collect();
    assert_eq!(commands, vec!["ls", "pwd"]);
    assert_eq!(report.history[0].outcome, "ran ls");

    let metrics = h.telemetry.metrics();
    assert_eq!(metrics.commands_executed.get(), 3);
    assert_eq!(metrics.iterations.get(), 3);
}

/// Test that history reaches the instruction source in insertion order
#[tokio::test]
async fn test_history_is_sent_in_order() {
    let source = Arc::new(ScriptedSource::with_commands(vec!["ls", "pwd", "whoami", "id"]));
    let h = harness(fast_config(4), source.clone());

    h.controller.run().await;

    let calls = source.next_calls.lock().unwrap();
    assert_eq!(calls.len(), 3);
    let last: Vec<_> = calls[2].iter().map(|e| e.command.as_str()).collect();
    assert_eq!(last, vec!["ls", "pwd", "whoami"]);
    assert_eq!(calls[0].len(), 1);
}

/// Test that proposed commands are rewritten and wrapped before execution
#[tokio::test]
async fn test_commands_are_rewritten_and_wrapped() {
    let source = Arc::new(ScriptedSource::with_commands(vec!["apt-get install nginx", "cd /etc"]));
    let h = harness(fast_config(2), source);

    let report = h.controller.run().await;

    let sent = h.transcript.lock().unwrap().sent.clone();
    assert_eq!(
        sent[0],
        "/bin/bash -c \"echo \\$\\$>/tmp/last.pid && exec apt-get install -qq -y nginx\""
    );
    assert_eq!(sent[1], "/bin/bash -c \"echo \\$\\$>/tmp/last.pid; cd /etc\"");
    assert_eq!(report.history[0].command, "apt-get install -qq -y nginx");
}

/// Test that a fatal instruction source error ends the loop immediately
#[tokio::test]
async fn test_fatal_error_quits_without_retry() {
    let source = Arc::new(ScriptedSource {
        commands: vec!["ls", "pwd"],
        fail_at_history: Some(1),
        ..Default::default()
    });
    let h = harness(fast_config(0), source.clone());
    let termination = h.controller.termination();

    let report = h.controller.run().await;

    match report.reason {
        QuitReason::Failed(AgentError::Instruction(InstructionError::Transport(_))) => {}
        other => panic!("expected transport failure, got {:?}", other),
    }
    assert_eq!(report.commands_executed, 1);
    assert_eq!(source.next_calls.lock().unwrap().len(), 1);
    assert!(termination.is_triggered());
    // triggering again after QUIT is harmless
    termination.trigger();
}

/// Test that a sandbox failure while reading output ends the loop immediately
#[tokio::test]
async fn test_output_read_failure_quits_without_retry() {
    let source = Arc::new(ScriptedSource::with_commands(vec!["ls", "pwd"]));
    let h = build_harness(fast_config(0), source.clone(), true);
    let termination = h.controller.termination();

    let report = h.controller.run().await;

    match report.reason {
        QuitReason::Failed(AgentError::Sandbox(SandboxError::Transport(_))) => {}
        other => panic!("expected sandbox transport failure, got {:?}", other),
    }
    assert_eq!(report.commands_executed, 1);
    assert!(report.history.is_empty());
    assert_eq!(h.transcript.lock().unwrap().sent.len(), 1);
    assert!(source.next_calls.lock().unwrap().is_empty());
    assert!(termination.is_triggered());
}

/// Test that a termination signal is observed at the iteration boundary
#[tokio::test]
async fn test_cancelled_before_first_iteration() {
    let source = Arc::new(ScriptedSource::with_commands(vec!["ls"]));
    let h = harness(fast_config(0), source);
    h.controller.termination().trigger();

    let report = h.controller.run().await;

    assert!(matches!(report.reason, QuitReason::Cancelled));
    assert_eq!(report.commands_executed, 0);
    assert_eq!(h.sandbox.one_off_calls.load(Ordering::SeqCst), 0);
}

/// Test that partial mode summarizes only the tail of long outputs
#[tokio::test]
async fn test_partial_mode_truncates_long_output() {
    let source = Arc::new(ScriptedSource::with_commands(vec!["cat long-output.txt", "ls"]));
    let h = harness(fast_config(2), source.clone());

    let report = h.controller.run().await;

    assert_eq!(source.truncated_calls.load(Ordering::SeqCst), 1);
    assert_eq!(source.outcome_calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.history[0].outcome, "ran cat long-output.txt (10 tail lines)");
}

/// Test that full mode sends long outputs through the summarizer
#[tokio::test]
async fn test_full_mode_summarizes_whole_output() {
    let source = Arc::new(ScriptedSource::with_commands(vec!["cat long-output.txt", "ls"]));
    let config = AgentConfig {
        context_mode: ContextMode::Full,
        ..fast_config(2)
    };
    let h = harness(config, source.clone());

    let report = h.controller.run().await;

    assert_eq!(source.truncated_calls.load(Ordering::SeqCst), 0);
    assert_eq!(source.outcome_calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.history[0].outcome, "ran cat long-output.txt");
}

/// Test that a command with no attributable output gets the fixed outcome
#[tokio::test]
async fn test_silent_command_gets_no_output_outcome() {
    let source = Arc::new(ScriptedSource::with_commands(vec!["ls", "true silent", "pwd"]));
    let config = AgentConfig {
        context_mode: ContextMode::Full,
        ..fast_config(3)
    };
    let h = harness(config, source.clone());

    let report = h.controller.run().await;

    assert_eq!(report.history[1].command, "true silent");
    assert_eq!(report.history[1].outcome, NO_OUTPUT);
    // only `ls` needed a request
    assert_eq!(source.outcome_calls.load(Ordering::SeqCst), 1);
}

// Integration tests that require external services

/// Test a full session against a real container (requires Docker + API key)
#[tokio::test]
#[ignore = "Requires a Docker daemon with the aquarium image and OPENAI_API_KEY"]
async fn test_real_sandbox_session() {
    use aquarium::sandbox::SandboxManager;

    let config = AgentConfig {
        goal: "Print the kernel version".to_string(),
        iteration_limit: 2,
        ..Default::default()
    };
    let source = aquarium::llm::build_source(&config).unwrap();
    let manager = SandboxManager::new(SandboxConfig::default());
    let sandbox = manager.provision().await.unwrap();
    let id = sandbox.container.id().to_string();

    let controller = AgentController::new(
        config,
        source,
        sandbox.container.clone(),
        Box::new(sandbox.terminal),
        Telemetry::detached().unwrap(),
    );
    let report = controller.run().await;
    manager.destroy(&id).await.unwrap();

    assert!(matches!(report.reason, QuitReason::IterationLimit));
    assert_eq!(report.commands_executed, 2);
}
