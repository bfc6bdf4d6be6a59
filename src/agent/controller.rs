//! Agent Controller - the per-session iteration state machine
//!
//! One controller drives one sandbox. Each pass through the loop asks the
//! instruction source for a command, rewrites it, types it into the terminal,
//! waits for it to finish, and captures what it printed. The outcome of a
//! command is summarized at the start of the following pass, right before it
//! is needed for the next-command request.
//!
//! ```text
//! INIT ─► AWAIT_NEXT_COMMAND ─► REWRITE ─► EXECUTE ─► AWAIT_COMPLETION ─► READ_OUTPUT
//!              ▲                                                              │
//!              └──────────── APPEND_HISTORY ◄── SUMMARIZE ◄──────────────────┘
//!
//! any error / iteration limit / termination ─► QUIT
//! ```
//!
//! The loop is strictly sequential: a new command is never sent before the
//! previous one's completion, read and summarization have finished.

use std::sync::Arc;

use tracing::{debug, error, info, info_span, Instrument};

use super::completion::CompletionDetector;
use super::output::{diff_new_output, OutputReader};
use super::rewriter::CommandRewriter;
use super::session::{CommandHistoryEntry, Session, Termination};
use super::summarize::{SummarizeError, Summarizer};
use crate::config::{AgentConfig, ContextMode};
use crate::llm::{InstructionError, InstructionSource};
use crate::sandbox::{Sandbox, SandboxError, Terminal};
use crate::tracing::Telemetry;

/// States of the iteration loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Init,
    AwaitNextCommand,
    Rewrite,
    Execute,
    AwaitCompletion,
    ReadOutput,
    Summarize,
    AppendHistory,
    Quit,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControllerState::Init => "INIT",
            ControllerState::AwaitNextCommand => "AWAIT_NEXT_COMMAND",
            ControllerState::Rewrite => "REWRITE",
            ControllerState::Execute => "EXECUTE",
            ControllerState::AwaitCompletion => "AWAIT_COMPLETION",
            ControllerState::ReadOutput => "READ_OUTPUT",
            ControllerState::Summarize => "SUMMARIZE",
            ControllerState::AppendHistory => "APPEND_HISTORY",
            ControllerState::Quit => "QUIT",
        };
        write!(f, "{}", name)
    }
}

/// Error type for agent operations
///
/// Every variant is fatal to the session.
#[derive(Debug)]
pub enum AgentError {
    /// Instruction source failure (transport, API, malformed response)
    Instruction(InstructionError),
    /// Sandbox runtime failure (terminal write, pid polling, transcript read)
    Sandbox(SandboxError),
    /// Summarization failure, including an exhausted recursion limit
    Summarize(SummarizeError),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::Instruction(e) => write!(f, "Instruction source error: {}", e),
            AgentError::Sandbox(e) => write!(f, "Sandbox error: {}", e),
            AgentError::Summarize(e) => write!(f, "Summarization error: {}", e),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<InstructionError> for AgentError {
    fn from(e: InstructionError) -> Self {
        AgentError::Instruction(e)
    }
}

impl From<SandboxError> for AgentError {
    fn from(e: SandboxError) -> Self {
        AgentError::Sandbox(e)
    }
}

impl From<SummarizeError> for AgentError {
    fn from(e: SummarizeError) -> Self {
        AgentError::Summarize(e)
    }
}

/// Why a session ended
#[derive(Debug)]
pub enum QuitReason {
    /// The configured iteration limit was reached
    IterationLimit,
    /// Termination was signalled from outside the loop
    Cancelled,
    /// A fatal error ended the loop
    Failed(AgentError),
}

impl QuitReason {
    /// Label used for the `sessions_ended` metric
    pub fn label(&self) -> &'static str {
        match self {
            QuitReason::IterationLimit => "iteration_limit",
            QuitReason::Cancelled => "cancelled",
            QuitReason::Failed(_) => "failed",
        }
    }
}

/// Result of a finished session
#[derive(Debug)]
pub struct SessionReport {
    /// Session identifier
    pub session_id: String,
    /// Commands written to the terminal
    pub commands_executed: usize,
    /// Ordered command/outcome pairs
    pub history: Vec<CommandHistoryEntry>,
    /// Why the loop ended
    pub reason: QuitReason,
}

/// Outcome of a single pass through the loop
enum Step {
    Continue,
    LimitReached,
}

/// Agent Controller driving one sandbox on behalf of an instruction source
pub struct AgentController {
    config: AgentConfig,
    session: Session,
    source: Arc<dyn InstructionSource>,
    terminal: Box<dyn Terminal>,
    rewriter: CommandRewriter,
    detector: CompletionDetector,
    reader: OutputReader,
    summarizer: Summarizer,
    telemetry: Telemetry,
    state: ControllerState,
    commands_executed: usize,
}

impl AgentController {
    /// Create a new agent controller
    ///
    /// # Arguments
    /// * `config` - Session configuration
    /// * `source` - Instruction source deciding commands and summarizing outcomes
    /// * `sandbox` - Shared sandbox handle used for pid polling and transcript reads
    /// * `terminal` - The sandbox's interactive terminal, owned by this controller
    /// * `telemetry` - Process-wide telemetry handle
    pub fn new(
        config: AgentConfig,
        source: Arc<dyn InstructionSource>,
        sandbox: Arc<dyn Sandbox>,
        terminal: Box<dyn Terminal>,
        telemetry: Telemetry,
    ) -> Self {
        let session = Session::new(config.iteration_limit, config.recursion_depth_limit);
        let detector = CompletionDetector::from_config(sandbox.clone(), &config);
        let reader = OutputReader::new(sandbox, config.transcript_command.clone());
        let summarizer = Summarizer::new(source.clone(), config.recursion_depth_limit)
            .with_metrics(telemetry.metrics().clone());

        Self {
            config,
            session,
            source,
            terminal,
            rewriter: CommandRewriter::new(),
            detector,
            reader,
            summarizer,
            telemetry,
            state: ControllerState::Init,
            commands_executed: 0,
        }
    }

    /// Identifier of the session this controller drives
    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    /// Handle that can stop the loop at its next iteration boundary
    pub fn termination(&self) -> Termination {
        self.session.termination.clone()
    }

    /// Transcript reader for this session's sandbox
    pub fn output_reader(&self) -> OutputReader {
        self.reader.clone()
    }

    /// Current state of the loop
    pub fn state(&self) -> ControllerState {
        self.state
    }

    fn transition(&mut self, next: ControllerState) {
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }

    /// Run the loop until the iteration limit, a fatal error, or termination
    pub async fn run(self) -> SessionReport {
        let span = info_span!(
            "agent_session",
            session_id = %self.session.id,
            source = %self.config.source.label(),
            otel.name = "agent_session"
        );
        self.run_loop().instrument(span).await
    }

    async fn run_loop(mut self) -> SessionReport {
        info!(goal = %self.config.goal, mode = %self.config.context_mode, "Starting agent session");
        println!("[AGENT] Session {} started: {}", self.session.id, self.config.goal);

        let reason = loop {
            if self.session.termination.is_triggered() {
                info!("Termination requested, quitting");
                break QuitReason::Cancelled;
            }

            match self.step().await {
                Ok(Step::Continue) => {}
                Ok(Step::LimitReached) => {
                    info!(limit = self.session.iteration_limit, "Iteration limit reached, quitting");
                    break QuitReason::IterationLimit;
                }
                Err(e) => {
                    error!(error = %e, iteration = self.session.iteration, "Fatal error, quitting");
                    println!("[AGENT] ❌ Session {} failed: {}", self.session.id, e);
                    break QuitReason::Failed(e);
                }
            }

            tokio::time::sleep(self.config.iteration_delay).await;
        };

        self.transition(ControllerState::Quit);
        self.session.termination.trigger();
        self.telemetry
            .metrics()
            .sessions_ended
            .with_label_values(&[reason.label()])
            .inc();

        SessionReport {
            session_id: self.session.id.clone(),
            commands_executed: self.commands_executed,
            history: self.session.into_history(),
            reason,
        }
    }

    async fn step(&mut self) -> Result<Step, AgentError> {
        if !self.session.begin_iteration() {
            return Ok(Step::LimitReached);
        }
        self.telemetry.metrics().iterations.inc();

        let span = info_span!("iteration", iteration = self.session.iteration, otel.name = "iteration");
        self.iterate().instrument(span).await?;
        Ok(Step::Continue)
    }

    async fn iterate(&mut self) -> Result<(), AgentError> {
        let proposed = if self.session.is_first_iteration() {
            self.transition(ControllerState::AwaitNextCommand);
            info!("Asking instruction source for the first command");
            self.telemetry.metrics().source_request("command");
            self.source.generate_initial(&self.config.goal).await?
        } else {
            self.transition(ControllerState::Summarize);
            info!("Summarizing output of previous command");
            let previous = self.session.last_command.clone().unwrap_or_default();
            let outcome = self.summarize_previous(&previous).await?;

            self.transition(ControllerState::AppendHistory);
            info!(command = %previous, outcome = %outcome, "Command outcome");
            self.session.record(CommandHistoryEntry::new(previous, outcome));

            self.transition(ControllerState::AwaitNextCommand);
            info!("Asking instruction source for the next command");
            self.telemetry.metrics().source_request("command");
            let history = match self.config.context_mode {
                ContextMode::Partial => self.session.recent_history(self.config.history_window),
                ContextMode::Full => self.session.history(),
            };
            self.source.generate_next(&self.config.goal, history).await?
        };

        self.transition(ControllerState::Rewrite);
        let command = self.rewriter.rewrite(&proposed);

        self.transition(ControllerState::Execute);
        info!(command = %command, "Executing command");
        println!("[AGENT] {} #{}: {}", self.session.id, self.session.iteration, command);
        let wrapped = self.detector.wrap(&command);
        self.terminal.send_line(&wrapped).await?;
        self.commands_executed += 1;
        self.telemetry.metrics().commands_executed.inc();

        self.transition(ControllerState::AwaitCompletion);
        self.detector.wait_for_completion().await?;

        self.transition(ControllerState::ReadOutput);
        let snapshot = self.reader.capture().await?;
        let output = diff_new_output(&self.session.snapshot, &snapshot);
        debug!(lines = output.lines().count(), "Captured command output");
        self.session.update_after_command(command, output, snapshot);

        Ok(())
    }

    /// Outcome of the previous command under the configured context mode
    async fn summarize_previous(&mut self, command: &str) -> Result<String, AgentError> {
        let output = &self.session.last_output;
        if self.config.context_mode == ContextMode::Partial {
            let lines: Vec<&str> = output.split('\n').collect();
            if lines.len() > self.config.tail_lines {
                let tail = lines[lines.len() - self.config.tail_lines..].join("\n");
                debug!(kept = self.config.tail_lines, total = lines.len(), "Summarizing output tail only");
                self.telemetry.metrics().source_request("truncated");
                return Ok(self.source.summarize_truncated(command, &tail).await?);
            }
        }
        Ok(self.summarizer.summarize(command, output).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(ControllerState::AwaitNextCommand.to_string(), "AWAIT_NEXT_COMMAND");
        assert_eq!(ControllerState::Quit.to_string(), "QUIT");
    }

    #[test]
    fn test_quit_reason_labels() {
        assert_eq!(QuitReason::IterationLimit.label(), "iteration_limit");
        assert_eq!(QuitReason::Cancelled.label(), "cancelled");
        let failed = QuitReason::Failed(AgentError::Sandbox(SandboxError::Transport("gone".into())));
        assert_eq!(failed.label(), "failed");
    }

    #[test]
    fn test_agent_error_display_wraps_source() {
        let err: AgentError = InstructionError::MissingApiKey.into();
        assert_eq!(
            err.to_string(),
            "Instruction source error: undefined env var OPENAI_API_KEY"
        );
    }
}
