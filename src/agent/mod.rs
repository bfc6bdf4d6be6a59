//! Agent module for model-driven shell sessions
//!
//! This module provides the loop that lets an instruction source operate a
//! sandboxed terminal one command at a time:
//! - `controller` - the iteration state machine
//! - `rewriter` - non-interactive/quiet normalization of proposed commands
//! - `completion` - pid-file based detection of when a command has finished
//! - `output` - transcript capture, sanitization and diffing
//! - `summarize` - recursive, concurrent summarization of long outputs
//! - `tailer` - passive background logging of the terminal
//!
//! # Architecture
//!
//! ```text
//! Goal → AgentController → InstructionSource (next command)
//!              ↓
//!        CommandRewriter → wrap with pid sentinel
//!              ↓
//!        Terminal.send_line() → bash inside the sandbox
//!              ↓
//!        CompletionDetector polls /proc/<pid> via one-off execs
//!              ↓
//!        OutputReader replays transcript → sanitize → diff
//!              ↓
//!        Summarizer (split + fan out on InputTooLarge) → outcome
//!              ↓
//!        history += {command, outcome} → loop or quit
//! ```

pub mod completion;
pub mod controller;
pub mod output;
pub mod rewriter;
pub mod session;
pub mod summarize;
pub mod tailer;

pub use completion::{is_shell_builtin, wrap_command, CompletionDetector};
pub use controller::{AgentController, AgentError, ControllerState, QuitReason, SessionReport};
pub use output::{diff_new_output, sanitize, OutputReader};
pub use rewriter::CommandRewriter;
pub use session::{CommandHistoryEntry, Session, Termination};
pub use summarize::{SummarizeError, Summarizer, NO_OUTPUT};
pub use tailer::spawn_tailer;
